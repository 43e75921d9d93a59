//! Product image retrieval and the on-disk dedup index.
//!
//! Images land at `<output_dir>/<product_id>/<NN>.<ext>`. With dedup on, an
//! image URL seen before (this run or an earlier one against the same output
//! directory) is linked from the stored copy without touching the network,
//! and freshly downloaded bytes that match a stored hash are linked instead of
//! written again.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::AppConfig;
use crate::models::{ImageAsset, ImageCollection, ImageFailure, Product};
use crate::session::HttpSession;
use crate::utils::error::{AppError, Result};
use crate::utils::retry::{RetryPolicy, retry_transient};

pub const INDEX_FILE_NAME: &str = ".image-index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    /// image URL -> content hash
    urls: HashMap<String, String>,
    /// content hash -> stored file
    files: HashMap<String, PathBuf>,
}

/// A stored copy found in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub hash: String,
    pub path: PathBuf,
    pub byte_size: u64,
}

/// Content-hash index shared by every worker of a run.
#[derive(Debug)]
pub struct DedupIndex {
    path: Option<PathBuf>,
    data: Mutex<IndexData>,
}

impl DedupIndex {
    /// Index that lives only for this process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(IndexData::default()),
        }
    }

    /// Loads the index persisted at `path`. A missing file starts empty; an
    /// unreadable one is logged and replaced on the next flush.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<IndexData>(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt image index");
                IndexData::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexData::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            urls = data.urls.len(),
            files = data.files.len(),
            "loaded image index"
        );
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> MutexGuard<'_, IndexData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored copy of a previously fetched URL, if its file still exists.
    pub async fn lookup_url(&self, url: &str) -> Option<StoredImage> {
        let hash = self.lock().urls.get(url).cloned()?;
        self.lookup_hash(&hash).await
    }

    /// Stored copy of the given bytes, if its file still exists.
    pub async fn lookup_hash(&self, hash: &str) -> Option<StoredImage> {
        let path = self.lock().files.get(hash).cloned()?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(StoredImage {
                hash: hash.to_string(),
                path,
                byte_size: meta.len(),
            }),
            _ => {
                tracing::debug!(path = %path.display(), "indexed image vanished, forgetting it");
                self.lock().files.remove(hash);
                None
            }
        }
    }

    /// Remembers `url -> hash` and, unless already known, `hash -> path`.
    pub fn record(&self, url: &str, hash: &str, path: &Path) {
        let mut data = self.lock();
        data.urls.insert(url.to_string(), hash.to_string());
        data.files
            .entry(hash.to_string())
            .or_insert_with(|| path.to_path_buf());
    }

    /// Forgets every hash stored at `path`. Called before the file there is
    /// replaced, so the index never points at bytes that changed under it.
    pub fn release(&self, path: &Path) {
        self.lock().files.retain(|_, stored| stored != path);
    }

    /// Writes the index next to the images. No-op for in-memory indexes.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_vec_pretty(&*self.lock())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

pub struct ImageManager {
    session: HttpSession,
    output_dir: PathBuf,
    retry: RetryPolicy,
    index: Option<Arc<DedupIndex>>,
    max_images: Option<usize>,
}

impl ImageManager {
    /// Builds the manager from settings, loading the persisted dedup index
    /// when dedup is enabled.
    pub async fn new(session: HttpSession, config: &AppConfig) -> Result<Self> {
        let output_dir = config.paths.output_dir.clone();
        let index = if config.images.dedup {
            Some(Arc::new(DedupIndex::load(output_dir.join(INDEX_FILE_NAME)).await?))
        } else {
            None
        };
        Ok(Self::with_index(
            session,
            output_dir,
            config.scraper.retry_policy(),
            index,
            config.images.max_images,
        ))
    }

    pub fn with_index(
        session: HttpSession,
        output_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        index: Option<Arc<DedupIndex>>,
        max_images: Option<usize>,
    ) -> Self {
        Self {
            session,
            output_dir: output_dir.into(),
            retry,
            index,
            max_images,
        }
    }

    pub fn product_dir(&self, product_id: &str) -> PathBuf {
        self.output_dir.join(safe_dir_name(product_id))
    }

    /// Retrieves the product's images in order. A failed image is recorded and
    /// skipped; it never stops the others.
    pub async fn collect(&self, product: &Product) -> ImageCollection {
        let mut collection = ImageCollection::default();
        let urls: Vec<&String> = match self.max_images {
            Some(max) => product.image_urls.iter().take(max).collect(),
            None => product.image_urls.iter().collect(),
        };
        if urls.is_empty() {
            return collection;
        }

        let dir = self.product_dir(&product.id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(
                product_id = %product.id,
                dir = %dir.display(),
                error = %e,
                "cannot create product directory"
            );
            collection.failures = urls
                .iter()
                .enumerate()
                .map(|(i, url)| ImageFailure {
                    source_url: url.to_string(),
                    position: i + 1,
                    message: format!("cannot create {}: {}", dir.display(), e),
                })
                .collect();
            return collection;
        }

        for (i, url) in urls.into_iter().enumerate() {
            let position = i + 1;
            match self.collect_one(&product.id, url, position, &dir).await {
                Ok(asset) => {
                    let source = if asset.reused { "reused" } else { "download" };
                    metrics::counter!("collector_images_total", "source" => source).increment(1);
                    collection.assets.push(asset);
                }
                Err(e) => {
                    metrics::counter!("collector_images_total", "source" => "failed").increment(1);
                    tracing::warn!(
                        product_id = %product.id,
                        position,
                        url = %url,
                        error = %e,
                        "image skipped"
                    );
                    collection.failures.push(ImageFailure {
                        source_url: url.clone(),
                        position,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.prune_stale(&dir, &collection).await;

        tracing::info!(
            product_id = %product.id,
            stored = collection.assets.len(),
            reused = collection.reused_count(),
            failed = collection.failures.len(),
            "images collected"
        );
        collection
    }

    async fn collect_one(
        &self,
        product_id: &str,
        url: &str,
        position: usize,
        dir: &Path,
    ) -> Result<ImageAsset> {
        let mut asset = ImageAsset::pending(product_id, url, position);
        let stem = format!("{:02}", position);

        if let Some(index) = &self.index {
            if let Some(stored) = index.lookup_url(url).await {
                let ext = stored
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("jpg")
                    .to_string();
                let dest = dir.join(format!("{}.{}", stem, ext));
                if stored.path != dest {
                    index.release(&dest);
                    link_or_copy(&stored.path, &dest).await?;
                }
                asset.mark_downloaded(stored.byte_size, stored.hash);
                asset.reused = true;
                asset.mark_persisted(dest);
                tracing::debug!(product_id, position, url, "image reused from index");
                return Ok(asset);
            }
        }

        let session = &self.session;
        let fetched = retry_transient(self.retry, url, move || session.get_bytes(url))
            .await
            .map_err(|e| AppError::Image {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let ext = image_extension(&fetched.bytes, fetched.content_type.as_deref())
            .ok_or_else(|| AppError::Image {
                url: url.to_string(),
                message: format!(
                    "response is not an image (content-type {})",
                    fetched.content_type.as_deref().unwrap_or("unknown")
                ),
            })?;
        let hash = content_hash(&fetched.bytes);
        asset.mark_downloaded(fetched.bytes.len() as u64, hash.clone());

        let dest = dir.join(format!("{}.{}", stem, ext));
        let stored = match &self.index {
            Some(index) => index.lookup_hash(&hash).await,
            None => None,
        };
        let unchanged = stored.as_ref().is_some_and(|stored| stored.path == dest);
        if !unchanged {
            if let Some(index) = &self.index {
                index.release(&dest);
            }
            match stored {
                Some(stored) => link_or_copy(&stored.path, &dest).await?,
                None => replace_file(&dest, &fetched.bytes).await?,
            }
        }

        if let Some(index) = &self.index {
            index.record(url, &hash, &dest);
        }
        asset.mark_persisted(dest);
        Ok(asset)
    }

    /// Removes `NN.<ext>` files left by an earlier run that this run did not
    /// store: positions past the current image count, or an image whose
    /// extension changed. Best effort; a file that cannot be removed is logged.
    async fn prune_stale(&self, dir: &Path, collection: &ImageCollection) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot list product directory");
                return;
            }
        };

        loop {
            let path = match entries.next_entry().await {
                Ok(Some(entry)) => entry.path(),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %e,
                        "cannot list product directory"
                    );
                    break;
                }
            };
            let kept = collection
                .assets
                .iter()
                .any(|asset| asset.local_path.as_deref() == Some(path.as_path()));
            if kept || !is_position_file(&path) {
                continue;
            }
            if let Some(index) = &self.index {
                index.release(&path);
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed stale image"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot remove stale image")
                }
            }
        }
    }

    /// Persists the dedup index, if there is one.
    pub async fn flush_index(&self) -> Result<()> {
        match &self.index {
            Some(index) => index.flush().await,
            None => Ok(()),
        }
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// File extension for image bytes, sniffed from the data first and the
/// `Content-Type` header second. `None` when neither says "image".
pub fn image_extension(bytes: &[u8], content_type: Option<&str>) -> Option<String> {
    if let Ok(format) = image::guess_format(bytes) {
        if let Some(ext) = format.extensions_str().first() {
            return Some(ext.to_string());
        }
    }

    let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    let subtype = mime.strip_prefix("image/")?;
    let ext = match subtype {
        "jpeg" | "pjpeg" => "jpg",
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_alphanumeric()) => other,
        _ => return None,
    };
    Some(ext.to_string())
}

/// Directory name for a product id: anything outside `[A-Za-z0-9._-]` becomes
/// `_`, and dot-only names are rejected.
pub fn safe_dir_name(product_id: &str) -> String {
    let name: String = product_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        content_hash(product_id.as_bytes())[..16].to_string()
    } else {
        name
    }
}

/// `NN.<ext>`: the names `collect` gives stored images.
fn is_position_file(path: &Path) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let has_ext = path.extension().is_some_and(|e| e != "tmp");
    has_ext && stem.len() >= 2 && stem.chars().all(|c| c.is_ascii_digit())
}

/// Writes `bytes` to a sibling temp file and renames it over `dest`. The old
/// file at `dest` may be a hard link shared with another product, so it is
/// replaced rather than truncated.
async fn replace_file(dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn link_or_copy(src: &Path, dest: &Path) -> Result<()> {
    if src == dest {
        return Ok(());
    }
    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Err(e) = tokio::fs::hard_link(src, dest).await {
        tracing::debug!(src = %src.display(), error = %e, "hard link failed, copying");
        tokio::fs::copy(src, dest).await?;
    }
    Ok(())
}
