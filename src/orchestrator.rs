use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{AppConfig, MessagePolicy};
use crate::image_manager::ImageManager;
use crate::message_builder::{MessageBuilder, MessageTemplate};
use crate::models::{
    CollectedProduct, CollectionResult, FailureKind, Target, TargetState, generate_run_id,
};
use crate::plugins::SiteRegistry;
use crate::plugins::manager::SiteAdapterRef;
use crate::scraper::WebScraper;
use crate::session::HttpSession;
use crate::utils::error::{AppError, Result};

pub const MESSAGE_FILE_NAME: &str = "message.txt";

/// Progress notification sent whenever a target changes stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Targets that reached `Done` or `Failed` so far.
    pub completed: usize,
    pub total: usize,
    pub current_target: String,
    pub stage: TargetState,
}

/// Settings the per-target pipeline reads after construction.
#[derive(Debug, Clone)]
struct PipelineSettings {
    min_images: usize,
    message_policy: MessagePolicy,
    write_message_files: bool,
}

struct PipelineContext {
    scraper: WebScraper,
    images: ImageManager,
    messages: MessageBuilder,
    settings: PipelineSettings,
}

struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressEvent>>,
    completed: AtomicUsize,
    total: usize,
}

impl ProgressReporter {
    fn send(&self, completed: usize, target: &Target, stage: TargetState) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(ProgressEvent {
                completed,
                total: self.total,
                current_target: target.identifier.clone(),
                stage,
            });
        }
    }

    fn stage(&self, target: &Target, stage: TargetState) {
        self.send(self.completed.load(Ordering::SeqCst), target, stage);
    }

    fn finished(&self, target: &Target, result: &CollectionResult) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(completed, target, result.state());
    }
}

/// Runs targets through scrape, image collection and message rendering.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    concurrency: usize,
}

impl Orchestrator {
    /// Builds the pipeline for the configured site adapter.
    ///
    /// Fails with [`AppError::Template`] when the message template is invalid;
    /// no target is attempted in that case.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let registry = SiteRegistry::with_defaults(&config.site)?;
        let adapter = registry.get(&config.site.adapter)?;
        Self::with_adapter(config, adapter).await
    }

    pub async fn with_adapter(config: &AppConfig, adapter: SiteAdapterRef) -> Result<Self> {
        let template = MessageTemplate::load(
            &config.paths.message_template,
            &config.message.required_placeholders,
        )?;
        let session = HttpSession::new(&config.scraper)?;
        let scraper = WebScraper::new(adapter, session.clone(), config);
        let images = ImageManager::new(session, config).await?;

        tracing::info!(
            adapter = scraper.adapter_name(),
            concurrency = config.scraper.concurrency,
            template = template.name(),
            output_dir = %config.paths.output_dir.display(),
            "orchestrator ready"
        );

        Ok(Self {
            ctx: Arc::new(PipelineContext {
                scraper,
                images,
                messages: MessageBuilder::new(template),
                settings: PipelineSettings {
                    min_images: config.images.min_images,
                    message_policy: config.message.policy,
                    write_message_files: config.message.write_files,
                },
            }),
            concurrency: config.scraper.concurrency.max(1),
        })
    }

    /// Processes every target and returns one result per target, in input
    /// order. Cancelling `cancel` aborts in-flight work; targets that were not
    /// done by then are reported as cancelled.
    pub async fn run(
        &self,
        targets: Vec<Target>,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Vec<CollectionResult> {
        let run_id = generate_run_id();
        let span = tracing::info_span!("collection_run", run_id = %run_id, targets = targets.len());
        self.run_inner(targets, progress, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        targets: Vec<Target>,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Vec<CollectionResult> {
        let total = targets.len();
        if total == 0 {
            tracing::info!("no targets to process");
            return Vec::new();
        }

        let reporter = Arc::new(ProgressReporter {
            tx: progress,
            completed: AtomicUsize::new(0),
            total,
        });
        let start = std::time::Instant::now();

        let results = match guarded(&cancel, self.ctx.scraper.login()).await {
            Ok(()) => self.dispatch(targets, &reporter, &cancel).await,
            Err(AppError::Cancelled) => finish_all(&targets, &reporter, |t| {
                CollectionResult::cancelled(t.identifier.clone(), TargetState::Pending)
            }),
            Err(e) => {
                tracing::error!(error = %e, "login failed, no target can be scraped");
                let diagnostic = format!("login failed: {}", e);
                finish_all(&targets, &reporter, |t| {
                    CollectionResult::failed(
                        t.identifier.clone(),
                        FailureKind::Fetch,
                        TargetState::Pending,
                        diagnostic.clone(),
                    )
                })
            }
        };

        if let Err(e) = self.ctx.images.flush_index().await {
            tracing::warn!(error = %e, "failed to persist image index");
        }

        for result in &results {
            let outcome = result.failure_kind().map(|k| k.as_str()).unwrap_or("done");
            metrics::counter!("collector_targets_total", "outcome" => outcome).increment(1);
        }

        let done = results.iter().filter(|r| r.is_done()).count();
        tracing::info!(
            total,
            done,
            failed = total - done,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "collection run finished"
        );
        results
    }

    async fn dispatch(
        &self,
        targets: Vec<Target>,
        reporter: &Arc<ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Vec<CollectionResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, CollectionResult)> = JoinSet::new();
        let mut finished: HashMap<usize, CollectionResult> = HashMap::with_capacity(targets.len());

        for (index, target) in targets.iter().enumerate() {
            // Permits are taken here, in submission order, so targets start in
            // the order they were given.
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let result =
                    CollectionResult::cancelled(target.identifier.clone(), TargetState::Pending);
                reporter.finished(target, &result);
                finished.insert(index, result);
                continue;
            };

            let ctx = Arc::clone(&self.ctx);
            let reporter = Arc::clone(reporter);
            let cancel = cancel.clone();
            let target = target.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let result = process_target(&ctx, &target, &reporter, &cancel).await;
                    reporter.finished(&target, &result);
                    (index, result)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    finished.insert(index, result);
                }
                Err(e) => tracing::error!(error = %e, "target worker did not complete"),
            }
        }

        targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                finished.remove(&index).unwrap_or_else(|| {
                    let result = CollectionResult::failed(
                        target.identifier.clone(),
                        FailureKind::Internal,
                        TargetState::Pending,
                        "worker panicked before producing a result",
                    );
                    reporter.finished(target, &result);
                    result
                })
            })
            .collect()
    }
}

async fn process_target(
    ctx: &PipelineContext,
    target: &Target,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> CollectionResult {
    let id = target.identifier.as_str();

    reporter.stage(target, TargetState::Scraping);
    let product = match guarded(cancel, ctx.scraper.scrape(target)).await {
        Ok(product) => product,
        Err(e) => return failure(id, TargetState::Scraping, FailureKind::Fetch, e),
    };
    tracing::info!(
        target_id = id,
        product_id = %product.id,
        title = %product.title,
        "product scraped"
    );

    reporter.stage(target, TargetState::ImageCollecting);
    let images = match guarded(cancel, async { Ok(ctx.images.collect(&product).await) }).await {
        Ok(images) => images,
        Err(e) => return failure(id, TargetState::ImageCollecting, FailureKind::Image, e),
    };
    if images.assets.len() < ctx.settings.min_images {
        let mut diagnostic = format!(
            "{} of {} images stored, at least {} required",
            images.assets.len(),
            product.image_urls.len(),
            ctx.settings.min_images
        );
        if let Some(first) = images.failures.first() {
            diagnostic.push_str(&format!(" (first failure: {})", first.message));
        }
        tracing::warn!(
            target_id = id,
            product_id = %product.id,
            %diagnostic,
            "image floor not met"
        );
        return CollectionResult::failed(
            id,
            FailureKind::Image,
            TargetState::ImageCollecting,
            diagnostic,
        );
    }

    if cancel.is_cancelled() {
        return CollectionResult::cancelled(id, TargetState::Rendering);
    }
    reporter.stage(target, TargetState::Rendering);
    let message = match ctx.messages.render(&product, &images) {
        Ok(message) => Some(message),
        Err(e) if ctx.settings.message_policy == MessagePolicy::BestEffort => {
            tracing::warn!(target_id = id, product_id = %product.id, error = %e, "message skipped");
            None
        }
        Err(e) => return failure(id, TargetState::Rendering, FailureKind::Template, e),
    };

    if let (Some(message), true) = (&message, ctx.settings.write_message_files) {
        let dir = ctx.images.product_dir(&product.id);
        let path = dir.join(MESSAGE_FILE_NAME);
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, message.body.as_bytes()).await
        };
        if let Err(e) = written.await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write message file");
        }
    }

    tracing::info!(
        target_id = id,
        product_id = %product.id,
        images = images.assets.len(),
        image_failures = images.failures.len(),
        "target done"
    );
    CollectionResult::done(
        id,
        CollectedProduct {
            product,
            images,
            message,
        },
    )
}

/// Runs `operation` unless `cancel` fires first, in which case the operation
/// is dropped mid-flight.
async fn guarded<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = operation => result,
    }
}

fn failure(
    target_id: &str,
    stage: TargetState,
    default_kind: FailureKind,
    error: AppError,
) -> CollectionResult {
    let kind = error.kind().unwrap_or(default_kind);
    if kind == FailureKind::Cancelled {
        tracing::debug!(target_id, ?stage, "target cancelled");
        return CollectionResult::cancelled(target_id, stage);
    }
    tracing::warn!(target_id, ?stage, %kind, error = %error, "target failed");
    CollectionResult::failed(target_id, kind, stage, error.to_string())
}

fn finish_all(
    targets: &[Target],
    reporter: &ProgressReporter,
    make: impl Fn(&Target) -> CollectionResult,
) -> Vec<CollectionResult> {
    targets
        .iter()
        .map(|target| {
            let result = make(target);
            reporter.finished(target, &result);
            result
        })
        .collect()
}
