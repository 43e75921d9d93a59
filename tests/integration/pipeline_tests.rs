// End-to-end pipeline runs through the orchestrator

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kidsvillage_collector::models::{FailureKind, Outcome, Product, Target, TargetState};
use kidsvillage_collector::plugins::SiteAdapter;
use kidsvillage_collector::session::{FetchedPage, HttpSession};
use kidsvillage_collector::{AppError, Orchestrator, ProgressEvent};

use super::*;

#[tokio::test]
async fn test_results_follow_submission_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/shared.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES.to_vec()))
        .mount(&server)
        .await;
    // later targets answer faster, so completion order is reversed
    for (i, id) in ["101", "102", "103", "104"].iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/shop/item.php"))
            .and(query_param("it_id", *id))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(item_page(
                        &format!("Item {}", id),
                        "5000",
                        &["/img/shared.png"],
                    ))
                    .set_delay(Duration::from_millis(200 - 50 * i as u64)),
            )
            .mount(&server)
            .await;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri(), dir.path());
    config.scraper.concurrency = 4;
    let orchestrator = Orchestrator::new(&config).await.unwrap();

    let targets = vec![
        Target::new("101"),
        Target::new(item_url(&server, "102")),
        Target::new("103"),
        Target::new("104"),
    ];
    let results = orchestrator.run(targets.clone(), None, CancellationToken::new()).await;

    assert_eq!(results.len(), 4);
    for (result, target) in results.iter().zip(&targets) {
        assert_eq!(result.target, target.identifier);
        assert!(result.is_done(), "{:?}", result.outcome);
    }
    assert_eq!(results[1].label(), "102");
}

#[tokio::test]
async fn test_done_target_carries_product_images_and_message() {
    let server = MockServer::start().await;
    let page = item_page("봄 맨투맨", "12000", &["/data/item/1712/a.png"]);
    mount_item(&server, "1712", page).await;
    mount_image(&server, "/data/item/1712/a.png", PNG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(&server.uri(), dir.path())).await.unwrap();

    let results = orchestrator
        .run(vec![Target::new("1712").with_selling_price(19800)], None, CancellationToken::new())
        .await;

    let collected = results[0].collected().expect("target should be done");
    assert_eq!(collected.product.title, "봄 맨투맨");
    assert_eq!(collected.images.assets.len(), 1);
    let message = collected.message.as_ref().unwrap();
    assert_eq!(message.product_id, "1712");
    assert!(message.body.starts_with("☑️ 꼬마숲 봄 맨투맨"));
    assert!(message.body.contains("19800"));

    let written = std::fs::read_to_string(dir.path().join("1712/message.txt")).unwrap();
    assert_eq!(written, message.body);
    assert!(dir.path().join("1712/01.png").exists());
    assert!(dir.path().join(".image-index.json").exists());
}

#[tokio::test]
async fn test_rerun_performs_no_image_downloads() {
    let server = MockServer::start().await;
    mount_item(&server, "1712", item_page("Romper", "9000", &["/img/a.png", "/img/b.png"])).await;
    mount_image(&server, "/img/a.png", PNG_BYTES, 1).await;
    mount_image(&server, "/img/b.png", JPEG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server.uri(), dir.path());

    let first = Orchestrator::new(&config).await.unwrap();
    let results = first.run(vec![Target::new("1712")], None, CancellationToken::new()).await;
    assert_eq!(results[0].collected().unwrap().images.downloaded_count(), 2);

    let second = Orchestrator::new(&config).await.unwrap();
    let results = second.run(vec![Target::new("1712")], None, CancellationToken::new()).await;
    let images = &results[0].collected().unwrap().images;
    assert_eq!(images.downloaded_count(), 0);
    assert_eq!(images.reused_count(), 2);
}

#[tokio::test]
async fn test_zero_images_under_floor_fails_with_image_kind() {
    let server = MockServer::start().await;
    mount_item(&server, "1", item_page("No photos", "1000", &[])).await;
    mount_item(&server, "2", item_page("Broken photo", "1000", &["/img/gone.png"])).await;
    Mock::given(method("GET"))
        .and(path("/img/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(&server.uri(), dir.path())).await.unwrap();

    let results = orchestrator
        .run(vec![Target::new("1"), Target::new("2")], None, CancellationToken::new())
        .await;

    for result in &results {
        assert_eq!(result.failure_kind(), Some(FailureKind::Image));
    }
    match &results[1].outcome {
        Outcome::Failed(record) => {
            assert_eq!(record.stage, TargetState::ImageCollecting);
            assert!(record.diagnostic.contains("0 of 1 images stored"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_images_allowed_when_floor_is_zero() {
    let server = MockServer::start().await;
    mount_item(&server, "1", item_page("No photos", "1000", &[])).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri(), dir.path());
    config.images.min_images = 0;
    let orchestrator = Orchestrator::new(&config).await.unwrap();

    let results = orchestrator.run(vec![Target::new("1")], None, CancellationToken::new()).await;
    assert!(results[0].is_done());
}

#[tokio::test]
async fn test_scrape_failures_do_not_abort_the_batch() {
    let server = MockServer::start().await;
    mount_item(&server, "good", item_page("Hat", "3000", &["/img/hat.png"])).await;
    mount_image(&server, "/img/hat.png", PNG_BYTES, 1).await;
    Mock::given(method("GET"))
        .and(path("/shop/item.php"))
        .and(query_param("it_id", "down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    mount_item(&server, "blank", "<html><body></body></html>".to_string()).await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(&server.uri(), dir.path())).await.unwrap();

    let results = orchestrator
        .run(
            vec![Target::new("down"), Target::new("good"), Target::new("blank")],
            None,
            CancellationToken::new(),
        )
        .await;

    assert_eq!(results[0].failure_kind(), Some(FailureKind::Fetch));
    assert!(results[1].is_done());
    assert_eq!(results[2].failure_kind(), Some(FailureKind::Parse));
}

#[tokio::test]
async fn test_failed_login_fails_every_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bbs/login_check.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shop/"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/bbs/login.php"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bbs/login.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shop/item.php"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri(), dir.path());
    config.site.login_url = Some(format!("{}/bbs/login.php", server.uri()));
    config.site.username = Some("shopkeeper".to_string());
    config.site.password = Some("wrong".to_string());
    let orchestrator = Orchestrator::new(&config).await.unwrap();

    let results = orchestrator
        .run(vec![Target::new("1"), Target::new("2")], None, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.failure_kind(), Some(FailureKind::Fetch));
        match &result.outcome {
            Outcome::Failed(record) => assert!(record.diagnostic.starts_with("login failed")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_invalid_template_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("message.txt");
    std::fs::write(&template, "{title} {weight}").unwrap();
    let mut config = test_config("http://127.0.0.1:9", dir.path());
    config.paths.message_template = template;

    let err = Orchestrator::new(&config).await.err().expect("template should be rejected");
    assert!(matches!(err, AppError::Template(_)));
}

#[tokio::test]
async fn test_best_effort_policy_keeps_target_without_message() {
    let server = MockServer::start().await;
    mount_item(&server, "1", item_page("Socks", "2000", &["/img/s.png"])).await;
    mount_image(&server, "/img/s.png", PNG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("message.txt");
    std::fs::write(&template, "{title} {description}").unwrap();

    let mut config = test_config(&server.uri(), dir.path());
    config.paths.message_template = template;
    config.message.required_placeholders = vec!["description".to_string()];
    config.message.policy = kidsvillage_collector::config::MessagePolicy::BestEffort;
    // the fixture page has a description; point the selector elsewhere
    config.site.selectors.description = "#no-such-element".to_string();
    let orchestrator = Orchestrator::new(&config).await.unwrap();

    let results = orchestrator.run(vec![Target::new("1")], None, CancellationToken::new()).await;
    let collected = results[0].collected().expect("best effort keeps the target");
    assert!(collected.message.is_none());
}

#[tokio::test]
async fn test_progress_reports_every_completion() {
    let server = MockServer::start().await;
    mount_item(&server, "1", item_page("A", "1000", &[])).await;
    mount_item(&server, "2", item_page("B", "1000", &[])).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri(), dir.path());
    config.images.min_images = 0;
    let orchestrator = Orchestrator::new(&config).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    orchestrator
        .run(vec![Target::new("1"), Target::new("2")], Some(tx), CancellationToken::new())
        .await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let finished: Vec<&ProgressEvent> = events.iter().filter(|e| e.stage.is_terminal()).collect();
    assert_eq!(finished.len(), 2);
    assert!(events.iter().all(|e| e.total == 2));
    assert_eq!(events.iter().map(|e| e.completed).max(), Some(2));
    assert!(events.iter().any(|e| e.stage == TargetState::Rendering));
}

#[tokio::test]
async fn test_cancel_after_two_of_five_keeps_done_targets() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config("https://fake.example", dir.path());
    config.scraper.concurrency = 1;
    config.images.min_images = 0;
    config.message.write_files = false;
    let orchestrator = Orchestrator::with_adapter(&config, Arc::new(FakeAdapter)).await.unwrap();

    let targets: Vec<Target> = ["fast-1", "fast-2", "slow-3", "slow-4", "slow-5"]
        .into_iter()
        .map(Target::new)
        .collect();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let watcher = async move {
        while let Some(event) = rx.recv().await {
            if event.completed >= 2 {
                trigger.cancel();
            }
        }
    };

    let start = Instant::now();
    let (results, ()) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(orchestrator.run(targets, Some(tx), cancel), watcher) },
    )
    .await
    .expect("cancellation should finish the run promptly");

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(results.len(), 5);
    assert!(results[0].is_done());
    assert!(results[1].is_done());
    for result in &results[2..] {
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
    }
}

/// Adapter that records how many fetches overlap.
#[derive(Default)]
struct InFlightAdapter {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SiteAdapter for InFlightAdapter {
    fn name(&self) -> &str {
        "in_flight"
    }

    fn description(&self) -> &str {
        "counts overlapping fetches"
    }

    fn resolve(&self, target: &Target) -> kidsvillage_collector::Result<Url> {
        FakeAdapter.resolve(target)
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        url: &Url,
    ) -> kidsvillage_collector::Result<FetchedPage> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        FakeAdapter.fetch(session, url).await
    }

    fn parse(
        &self,
        target: &Target,
        page: &FetchedPage,
    ) -> kidsvillage_collector::Result<Product> {
        FakeAdapter.parse(target, page)
    }
}

#[tokio::test]
async fn test_workers_never_exceed_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config("https://fake.example", dir.path());
    config.scraper.concurrency = 2;
    config.images.min_images = 0;
    config.message.write_files = false;
    let adapter = Arc::new(InFlightAdapter::default());
    let orchestrator = Orchestrator::with_adapter(&config, adapter.clone()).await.unwrap();

    let targets: Vec<Target> = (1..=6).map(|i| Target::new(format!("item-{}", i))).collect();
    let results = orchestrator.run(targets, None, CancellationToken::new()).await;

    assert!(results.iter().all(|r| r.is_done()));
    assert_eq!(adapter.peak.load(Ordering::SeqCst), 2);
    assert_eq!(adapter.in_flight.load(Ordering::SeqCst), 0);
}
