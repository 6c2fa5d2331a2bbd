//! `DiffStore`: local digest image cache, download protocol, and pixel
//! diff computation (spec §4.3).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use pixeltriage_core::metrics::DiffStoreCounters;
use pixeltriage_core::{Cx, Digest, DiffMetrics, LockLevel, OrderedMutex, RetryConfig, EMPTY_IMAGE_DIGEST};

use crate::coalesce::Coalescer;
use crate::diff;
use crate::error::{DiffStoreError, Result};
use crate::object_store::ObjectStore;
use crate::pool::WorkerPool;
use crate::s3fifo::S3FifoCache;

/// On-disk artifact layout (spec §6).
struct Layout {
    images: PathBuf,
    diffs: PathBuf,
    diffmetrics: PathBuf,
    temp: PathBuf,
}

impl Layout {
    fn new(base_dir: &Path) -> Self {
        Self {
            images: base_dir.join("images"),
            diffs: base_dir.join("diffs"),
            diffmetrics: base_dir.join("diffmetrics"),
            temp: base_dir.join("__temp"),
        }
    }

    fn ensure_all(&self) -> Result<()> {
        for dir in [&self.images, &self.diffs, &self.diffmetrics, &self.temp] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn image_path(&self, digest: &Digest) -> PathBuf {
        self.images.join(format!("{}.png", digest.as_str()))
    }

    fn diff_path(&self, basename: &str) -> PathBuf {
        self.diffs.join(format!("{basename}.png"))
    }

    fn diffmetrics_path(&self, basename: &str) -> PathBuf {
        self.diffmetrics.join(format!("{basename}.json"))
    }
}

pub struct DiffStoreConfig {
    pub bucket: String,
    pub base_dir: PathBuf,
    pub worker_count: usize,
    pub max_uri_get_tries: u32,
    pub lru_capacity: usize,
}

/// Given `(probe, [d1..dN])`, returns local file paths and `DiffMetrics`
/// on request, downloading from the object store as needed, deduplicating
/// concurrent identical requests, and tracking an unavailable-digest set
/// (spec §4.3).
pub struct DiffStore {
    object_store: Arc<dyn ObjectStore>,
    bucket: String,
    layout: Layout,
    max_uri_get_tries: u32,
    retry: RetryConfig,
    images_lock: OrderedMutex<()>,
    diffs_lock: OrderedMutex<()>,
    lru: OrderedMutex<S3FifoCache<String, DiffMetrics>>,
    unavailable: Mutex<HashSet<Digest>>,
    download_coalescer: Coalescer<PathBuf>,
    diff_coalescer: Coalescer<DiffMetrics>,
    pool: WorkerPool,
    pub metrics: DiffStoreCounters,
}

impl DiffStore {
    pub fn new(object_store: Arc<dyn ObjectStore>, config: DiffStoreConfig) -> Result<Self> {
        let layout = Layout::new(&config.base_dir);
        layout.ensure_all()?;
        let mut unavailable = HashSet::new();
        unavailable.insert(Digest::new(EMPTY_IMAGE_DIGEST));
        Ok(Self {
            object_store,
            bucket: config.bucket,
            layout,
            max_uri_get_tries: config.max_uri_get_tries.max(1),
            retry: RetryConfig::default(),
            images_lock: OrderedMutex::new(LockLevel::DiffStoreImagesDir, ()),
            diffs_lock: OrderedMutex::new(LockLevel::DiffStoreDiffsDir, ()),
            lru: OrderedMutex::new(LockLevel::DiffStoreMetricsLru, S3FifoCache::new(config.lru_capacity)),
            unavailable: Mutex::new(unavailable),
            download_coalescer: Coalescer::new(),
            diff_coalescer: Coalescer::new(),
            pool: WorkerPool::new(config.worker_count, "diffstore-worker"),
            metrics: DiffStoreCounters::new(),
        })
    }

    /// Full metrics snapshot: the `Counter`-based fields plus the live
    /// join counts from both singleflight coalescers (spec's ambient
    /// stack: readiness probes consume this).
    #[must_use]
    pub fn metrics_snapshot(&self) -> pixeltriage_core::metrics::DiffStoreMetrics {
        let mut snapshot = self.metrics.snapshot();
        snapshot.coalesce_joins_total = self.download_coalescer.joins.load(std::sync::atomic::Ordering::Relaxed)
            + self.diff_coalescer.joins.load(std::sync::atomic::Ordering::Relaxed);
        snapshot
    }

    /// Digests known to be permanently or currently unavailable (spec
    /// §4.3 "Image availability"). Consumers skip these when assembling
    /// comparison sets.
    #[must_use]
    pub fn unavailable_digests(&self) -> HashSet<Digest> {
        self.unavailable.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn mark_unavailable(&self, digest: &Digest) {
        self.unavailable.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(digest.clone());
    }

    fn is_unavailable(&self, digest: &Digest) -> bool {
        self.unavailable.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains(digest)
    }

    /// Ensures `digest`'s PNG is present under `images/`, downloading from
    /// the object store on a miss (spec §4.3 "Download protocol"). Up to
    /// `max_uri_get_tries` attempts; on repeated MD5 mismatch the digest
    /// is marked unavailable.
    pub fn ensure_local(&self, digest: &Digest, cx: &Cx) -> Result<PathBuf> {
        if self.is_unavailable(digest) {
            return Err(DiffStoreError::Unavailable(digest.as_str().to_string()));
        }
        let final_path = self.layout.image_path(digest);
        if final_path.exists() {
            return Ok(final_path);
        }

        let digest = digest.clone();
        let result = self.download_coalescer.run_or_join(digest.as_str(), || {
            self.download_with_retries(&digest, cx).map_err(|e| e.to_string())
        });
        result.map_err(|_| {
            self.mark_unavailable(&digest);
            DiffStoreError::Download(digest.as_str().to_string())
        })
    }

    fn download_with_retries(&self, digest: &Digest, cx: &Cx) -> Result<PathBuf> {
        let final_path = self.layout.image_path(digest);
        if final_path.exists() {
            return Ok(final_path);
        }
        let object_path = format!("{}.png", digest.as_str());

        for attempt in 0..self.max_uri_get_tries {
            if cx.check().is_err() {
                return Err(DiffStoreError::Cancelled);
            }
            self.metrics.download_attempts_total.inc();
            match self.object_store.get(&self.bucket, &object_path) {
                Ok(obj) => {
                    if verify_md5(&obj.bytes, &obj.md5_base64) {
                        self.write_image_atomically(digest, &obj.bytes)?;
                        return Ok(final_path);
                    }
                    tracing::warn!(digest = digest.as_str(), attempt, "download md5 mismatch, retrying");
                }
                Err(_) => {
                    tracing::warn!(digest = digest.as_str(), attempt, "download failed, retrying");
                }
            }
            self.metrics.download_failures_total.inc();
            if attempt + 1 < self.max_uri_get_tries {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
            }
        }
        Err(DiffStoreError::DownloadMismatch(digest.as_str().to_string(), self.max_uri_get_tries))
    }

    fn write_image_atomically(&self, digest: &Digest, bytes: &[u8]) -> Result<()> {
        let _guard = self.images_lock.lock();
        let tmp_path = self.layout.temp.join(format!("tempfile-{}-{}", digest.as_str(), std::process::id()));
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, self.layout.image_path(digest))?;
        Ok(())
    }

    /// Resolves local paths for a set of digests, downloading any that are
    /// missing, dispatched across the worker pool. Digests that fail to
    /// download are simply absent from the returned map (spec §4.3
    /// "the outer call still completes with the successful subset").
    ///
    /// Takes `self: &Arc<Self>` so each dispatched job can hold its own
    /// owned handle to the store for the lifetime of the worker-pool
    /// thread, rather than borrowing `self` across threads.
    #[must_use]
    pub fn abs_paths(self: &Arc<Self>, digests: &[Digest], cx: &Cx) -> HashMap<Digest, PathBuf> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut submitted = 0usize;
        for digest in digests {
            if self.is_unavailable(digest) {
                continue;
            }
            let tx = tx.clone();
            let digest = digest.clone();
            let cx = cx.clone();
            let this = Arc::clone(self);
            submitted += 1;
            self.pool.submit(Box::new(move || {
                if let Ok(path) = this.ensure_local(&digest, &cx) {
                    let _ = tx.send((digest, path));
                }
            }));
        }
        drop(tx);
        let mut out = HashMap::new();
        for _ in 0..submitted {
            if let Ok((digest, path)) = rx.recv() {
                out.insert(digest, path);
            } else {
                break;
            }
        }
        out
    }

    /// `Get(probe, others)` (spec §4.3 algorithm): ensures `probe` is
    /// local (fatal for the call on failure), then resolves a
    /// `DiffMetrics` for each `other` via the worker pool.
    pub fn get(self: &Arc<Self>, probe: &Digest, others: &[Digest], cx: &Cx) -> Result<HashMap<Digest, DiffMetrics>> {
        self.ensure_local(probe, cx)?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut submitted = 0usize;
        for other in others {
            if self.is_unavailable(other) {
                continue;
            }
            let tx = tx.clone();
            let probe = probe.clone();
            let other = other.clone();
            let cx = cx.clone();
            let this = Arc::clone(self);
            submitted += 1;
            self.pool.submit(Box::new(move || {
                if let Ok(metrics) = this.diff_for_pair(&probe, &other, &cx) {
                    let _ = tx.send((other, metrics));
                }
            }));
        }
        drop(tx);
        let mut out = HashMap::new();
        for _ in 0..submitted {
            if let Ok((other, metrics)) = rx.recv() {
                out.insert(other, metrics);
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn diff_for_pair(&self, a: &Digest, b: &Digest, cx: &Cx) -> Result<DiffMetrics> {
        let basename = Digest::canonical_pair_key(a, b);

        if let Some(cached) = self.lru.lock().get(&basename) {
            self.metrics.cache_hits_total.inc();
            return Ok(cached);
        }
        self.metrics.cache_misses_total.inc();

        if let Some(metrics) = self.load_diskcached_metrics(&basename)? {
            self.lru.lock().insert(basename, metrics.clone());
            return Ok(metrics);
        }

        let a = a.clone();
        let b = b.clone();
        let cx2 = cx.clone();
        let result =
            self.diff_coalescer.run_or_join(&basename, || self.compute_and_persist(&a, &b, &cx2).map_err(|e| e.to_string()));
        match result {
            Ok(metrics) => {
                self.lru.lock().insert(basename, metrics.clone());
                Ok(metrics)
            }
            Err(msg) => Err(DiffStoreError::Decode(msg)),
        }
    }

    fn load_diskcached_metrics(&self, basename: &str) -> Result<Option<DiffMetrics>> {
        let path = self.layout.diffmetrics_path(basename);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let metrics: DiffMetrics = serde_json::from_slice(&bytes)?;
        Ok(Some(metrics))
    }

    fn compute_and_persist(&self, a: &Digest, b: &Digest, cx: &Cx) -> Result<DiffMetrics> {
        let a_path = self.ensure_local(a, cx)?;
        let b_path = self.ensure_local(b, cx)?;
        let a_bytes = std::fs::read(a_path)?;
        let b_bytes = std::fs::read(b_path)?;
        let a_img = diff::decode(&a_bytes).map_err(|_| {
            self.metrics.decode_failures_total.inc();
            DiffStoreError::Decode(a.as_str().to_string())
        })?;
        let b_img = diff::decode(&b_bytes).map_err(|_| {
            self.metrics.decode_failures_total.inc();
            DiffStoreError::Decode(b.as_str().to_string())
        })?;

        let mut result = diff::compute(&a_img, &b_img);
        let basename = Digest::canonical_pair_key(a, b);
        result.metrics.diff_image_path =
            self.layout.diff_path(&basename).to_string_lossy().into_owned();

        {
            let _guard = self.diffs_lock.lock();
            std::fs::write(self.layout.diff_path(&basename), &result.diff_png)?;
        }
        std::fs::write(self.layout.diffmetrics_path(&basename), serde_json::to_vec(&result.metrics)?)?;

        Ok(result.metrics)
    }
}

fn verify_md5(bytes: &[u8], expected_base64: &str) -> bool {
    use base64::Engine as _;
    use md5::Digest as _;
    let digest = md5::Md5::digest(bytes);
    let actual = base64::engine::general_purpose::STANDARD.encode(digest);
    actual == expected_base64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use image::ImageEncoder;

    fn sample_png(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(color));
        let mut bytes = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut bytes);
        encoder.write_image(img.as_raw(), 2, 2, image::ExtendedColorType::Rgba8).unwrap();
        bytes
    }

    fn make_store(tmp: &tempfile::TempDir) -> (Arc<DiffStore>, Arc<MemoryObjectStore>) {
        let object_store = Arc::new(MemoryObjectStore::new());
        let store = DiffStore::new(
            object_store.clone(),
            DiffStoreConfig {
                bucket: "test-bucket".into(),
                base_dir: tmp.path().to_path_buf(),
                worker_count: 2,
                max_uri_get_tries: 3,
                lru_capacity: 64,
            },
        )
        .unwrap();
        (Arc::new(store), object_store)
    }

    #[test]
    fn metrics_snapshot_reflects_coalescer_joins() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _obj) = make_store(&tmp);
        assert_eq!(store.metrics_snapshot().coalesce_joins_total, 0);
        store.download_coalescer.joins.fetch_add(2, std::sync::atomic::Ordering::Relaxed);
        store.diff_coalescer.joins.fetch_add(3, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(store.metrics_snapshot().coalesce_joins_total, 5);
    }

    #[test]
    fn empty_image_digest_is_unavailable_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _obj) = make_store(&tmp);
        assert!(store.unavailable_digests().contains(&Digest::new(EMPTY_IMAGE_DIGEST)));
    }

    #[test]
    fn ensure_local_downloads_and_caches_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, obj) = make_store(&tmp);
        obj.insert("test-bucket", "aaa.png", &sample_png([1, 2, 3, 255]));
        let cx = Cx::new();
        let path = store.ensure_local(&Digest::new("aaa"), &cx).unwrap();
        assert!(path.exists());
        // Second call hits the local cache, no further download attempt needed.
        let path2 = store.ensure_local(&Digest::new("aaa"), &cx).unwrap();
        assert_eq!(path, path2);
    }

    #[test]
    fn get_is_symmetric() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, obj) = make_store(&tmp);
        obj.insert("test-bucket", "aaa.png", &sample_png([0, 0, 0, 255]));
        obj.insert("test-bucket", "bbb.png", &sample_png([255, 255, 255, 255]));
        let cx = Cx::new();
        let a = Digest::new("aaa");
        let b = Digest::new("bbb");
        let ab = store.get(&a, std::slice::from_ref(&b), &cx).unwrap();
        let ba = store.get(&b, std::slice::from_ref(&a), &cx).unwrap();
        assert_eq!(ab[&b].combined_metric, ba[&a].combined_metric);
        assert_eq!(ab[&b].pixel_diff_percent, ba[&a].pixel_diff_percent);
    }

    #[test]
    fn repeated_download_failure_marks_digest_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _obj) = make_store(&tmp);
        let cx = Cx::new();
        assert!(store.ensure_local(&Digest::new("missing"), &cx).is_err());
        assert!(store.unavailable_digests().contains(&Digest::new("missing")));
    }
}
