// Image manager: download, sniffing, failure isolation and dedup

use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kidsvillage_collector::image_manager::{DedupIndex, ImageManager, INDEX_FILE_NAME};
use kidsvillage_collector::models::{AssetStatus, Product};
use kidsvillage_collector::session::HttpSession;
use kidsvillage_collector::utils::retry::RetryPolicy;

use super::*;

fn product(id: &str, server: &MockServer, image_paths: &[&str]) -> Product {
    let mut product = Product::new(id, item_url(server, id));
    product.title = "Romper".to_string();
    product.price = "9000".to_string();
    product.image_urls = image_paths
        .iter()
        .map(|p| format!("{}{}", server.uri(), p))
        .collect();
    product
}

fn manager(output_dir: &Path, index: Option<Arc<DedupIndex>>) -> ImageManager {
    let session = HttpSession::new(&Default::default()).unwrap();
    ImageManager::with_index(session, output_dir, RetryPolicy::new(1, 5), index, None)
}

#[tokio::test]
async fn test_images_stored_in_order_with_sniffed_extensions() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/a", PNG_BYTES, 1).await;
    mount_image(&server, "/img/b", JPEG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();

    let collection = manager(dir.path(), None)
        .collect(&product("1712", &server, &["/img/a", "/img/b"]))
        .await;

    assert!(collection.failures.is_empty());
    assert_eq!(collection.assets.len(), 2);
    let first = &collection.assets[0];
    assert_eq!(first.position, 1);
    assert_eq!(first.status, AssetStatus::Persisted);
    assert_eq!(first.local_path.as_deref(), Some(dir.path().join("1712/01.png").as_path()));
    assert_eq!(first.byte_size, PNG_BYTES.len() as u64);
    assert!(first.content_hash.is_some());
    assert_eq!(
        collection.assets[1].local_path.as_deref(),
        Some(dir.path().join("1712/02.jpg").as_path())
    );
    assert_eq!(std::fs::read(dir.path().join("1712/01.png")).unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_one_failed_image_does_not_stop_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>login</html>"),
        )
        .mount(&server)
        .await;
    mount_image(&server, "/img/ok", PNG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();

    let collection = manager(dir.path(), None)
        .collect(&product("7", &server, &["/img/missing", "/img/html", "/img/ok"]))
        .await;

    assert_eq!(collection.assets.len(), 1);
    assert_eq!(collection.assets[0].position, 3);
    assert_eq!(collection.failures.len(), 2);
    assert_eq!(collection.failures[0].position, 1);
    assert!(collection.failures[1].message.contains("not an image"));
}

#[tokio::test]
async fn test_shared_image_url_is_downloaded_once_per_run() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/logo", PNG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let images = manager(dir.path(), Some(Arc::new(DedupIndex::in_memory())));

    let first = images.collect(&product("1", &server, &["/img/logo"])).await;
    let second = images.collect(&product("2", &server, &["/img/logo"])).await;

    assert_eq!(first.downloaded_count(), 1);
    assert_eq!(second.reused_count(), 1);
    assert!(second.assets[0].reused);
    assert_eq!(std::fs::read(dir.path().join("2/01.png")).unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_identical_bytes_under_new_url_are_linked() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/front", PNG_BYTES, 1).await;
    mount_image(&server, "/img/front-copy", PNG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(DedupIndex::in_memory());
    let images = manager(dir.path(), Some(Arc::clone(&index)));

    let collection = images
        .collect(&product("1", &server, &["/img/front", "/img/front-copy"]))
        .await;

    assert_eq!(collection.assets.len(), 2);
    assert_eq!(collection.assets[0].content_hash, collection.assets[1].content_hash);
    assert_eq!(index.len(), 1);
    assert_eq!(std::fs::read(dir.path().join("1/02.png")).unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_rerun_with_persisted_index_downloads_nothing() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/a", PNG_BYTES, 1).await;
    mount_image(&server, "/img/b", JPEG_BYTES, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let item = product("1712", &server, &["/img/a", "/img/b"]);

    let index = Arc::new(DedupIndex::load(dir.path().join(INDEX_FILE_NAME)).await.unwrap());
    let first_run = manager(dir.path(), Some(index));
    assert_eq!(first_run.collect(&item).await.downloaded_count(), 2);
    first_run.flush_index().await.unwrap();

    let index = Arc::new(DedupIndex::load(dir.path().join(INDEX_FILE_NAME)).await.unwrap());
    let second_run = manager(dir.path(), Some(index));
    let collection = second_run.collect(&item).await;

    assert_eq!(collection.assets.len(), 2);
    assert_eq!(collection.downloaded_count(), 0);
    assert_eq!(collection.reused_count(), 2);
    // wiremock verifies the expect(1) counts when the server drops
}

#[tokio::test]
async fn test_max_images_caps_the_download() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/a", PNG_BYTES, 1).await;
    mount_image(&server, "/img/b", PNG_BYTES, 0).await;
    let dir = tempfile::tempdir().unwrap();
    let session = HttpSession::new(&Default::default()).unwrap();
    let images = ImageManager::with_index(session, dir.path(), RetryPolicy::none(), None, Some(1));

    let collection = images.collect(&product("1", &server, &["/img/a", "/img/b"])).await;
    assert_eq!(collection.assets.len(), 1);
}

/// PNG magic followed by different payload bytes, so it hashes differently.
fn other_png() -> Vec<u8> {
    let mut bytes = PNG_BYTES.to_vec();
    bytes.extend_from_slice(b"different-pixels");
    bytes
}

#[tokio::test]
async fn test_new_download_does_not_write_through_a_shared_link() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/x", PNG_BYTES, 1).await;
    mount_image(&server, "/img/y", PNG_BYTES, 1).await;
    mount_image(&server, "/img/z", &other_png(), 1).await;
    let dir = tempfile::tempdir().unwrap();
    let images = manager(dir.path(), Some(Arc::new(DedupIndex::in_memory())));

    images.collect(&product("a", &server, &["/img/x"])).await;
    // same bytes under a new URL: b/01.png is linked to a/01.png
    images.collect(&product("b", &server, &["/img/y"])).await;
    // b's first image changes
    let changed = images.collect(&product("b", &server, &["/img/z"])).await;
    assert_eq!(changed.downloaded_count(), 1);

    assert_eq!(std::fs::read(dir.path().join("a/01.png")).unwrap(), PNG_BYTES);
    assert_eq!(std::fs::read(dir.path().join("b/01.png")).unwrap(), other_png());

    // the index still hands out the original bytes for /img/x
    let reused = images.collect(&product("c", &server, &["/img/x"])).await;
    assert_eq!(reused.reused_count(), 1);
    assert_eq!(std::fs::read(dir.path().join("c/01.png")).unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_replaced_stored_copy_is_forgotten_by_the_index() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/x", PNG_BYTES, 2).await;
    mount_image(&server, "/img/w", &other_png(), 1).await;
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(DedupIndex::in_memory());
    let images = manager(dir.path(), Some(Arc::clone(&index)));

    images.collect(&product("a", &server, &["/img/x"])).await;
    // a/01.png was the stored copy for /img/x; it now holds other bytes
    images.collect(&product("a", &server, &["/img/w"])).await;

    let fresh = images.collect(&product("d", &server, &["/img/x"])).await;
    assert_eq!(fresh.downloaded_count(), 1);
    assert_eq!(std::fs::read(dir.path().join("d/01.png")).unwrap(), PNG_BYTES);
    assert_eq!(std::fs::read(dir.path().join("a/01.png")).unwrap(), other_png());
}

#[tokio::test]
async fn test_rerun_prunes_images_no_longer_listed() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/a", PNG_BYTES, 1).await;
    mount_image(&server, "/img/b", JPEG_BYTES, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let images = manager(dir.path(), None);

    images.collect(&product("1", &server, &["/img/a", "/img/b"])).await;
    std::fs::write(dir.path().join("1/message.txt"), "hello").unwrap();
    assert!(dir.path().join("1/01.png").exists());
    assert!(dir.path().join("1/02.jpg").exists());

    // one image left, and its extension changed
    let collection = images.collect(&product("1", &server, &["/img/b"])).await;
    assert_eq!(collection.assets.len(), 1);

    assert!(dir.path().join("1/01.jpg").exists());
    assert!(!dir.path().join("1/01.png").exists());
    assert!(!dir.path().join("1/02.jpg").exists());
    assert!(dir.path().join("1/message.txt").exists());
}
