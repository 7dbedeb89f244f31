use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Explicit staging directories, passed in at construction instead of living
/// as ambient process-wide paths.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Where raw uploads land.
    pub inbound_dir: PathBuf,
    /// Where transform results are written before streaming.
    pub outbound_dir: PathBuf,
}

/// Time source for the deferred-deletion queue. Production uses the system
/// clock; tests inject a manual one so sweep policy is checked without
/// wall-clock waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A staged upload, owned exclusively by the request that created it.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub id: String,
    pub original_filename: String,
    pub stored_path: PathBuf,
    pub size_bytes: u64,
    pub declared_mime: Option<String>,
}

struct PendingDelete {
    path: PathBuf,
    not_before: Instant,
}

/// Manages the two staging directories: collision-free names, deferred
/// deletion with a grace window, and immediate best-effort removal for
/// error paths.
pub struct TempStore {
    config: StagingConfig,
    pending: Mutex<Vec<PendingDelete>>,
    clock: Arc<dyn Clock>,
}

impl TempStore {
    pub fn new(config: StagingConfig) -> std::io::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StagingConfig, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.inbound_dir)?;
        std::fs::create_dir_all(&config.outbound_dir)?;
        Ok(Self {
            config,
            pending: Mutex::new(Vec::new()),
            clock,
        })
    }

    pub fn inbound_dir(&self) -> &Path {
        &self.config.inbound_dir
    }

    pub fn outbound_dir(&self) -> &Path {
        &self.config.outbound_dir
    }

    /// Generate a collision-resistant artifact name:
    /// `<prefix>-<millis>-<nonce>.<ext>`. Unique names are what make the
    /// shared staging directories safe for concurrent writers.
    pub fn unique_name(prefix: &str, ext: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let nonce: u32 = rand::random();
        if ext.is_empty() {
            format!("{prefix}-{millis}-{nonce}")
        } else {
            format!("{prefix}-{millis}-{nonce}.{ext}")
        }
    }

    /// Write an in-memory payload into the inbound staging directory.
    pub async fn stage(
        &self,
        data: &[u8],
        original_filename: &str,
        declared_mime: Option<String>,
    ) -> std::io::Result<UploadedAsset> {
        self.stage_stream(std::io::Cursor::new(data), original_filename, declared_mime)
            .await
    }

    /// Stream an upload into the inbound staging directory without holding
    /// the whole payload in memory.
    pub async fn stage_stream(
        &self,
        mut reader: impl AsyncRead + Unpin + Send,
        original_filename: &str,
        declared_mime: Option<String>,
    ) -> std::io::Result<UploadedAsset> {
        let ext = Path::new(original_filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = Self::unique_name("upload", &ext);
        let stored_path = self.config.inbound_dir.join(&name);

        let file = tokio::fs::File::create(&stored_path).await?;
        let mut writer = BufWriter::new(file);
        let size_bytes = match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                self.delete_now(&stored_path);
                return Err(e);
            }
        };
        writer.flush().await?;

        debug!("Staged upload {} ({} bytes)", name, size_bytes);
        Ok(UploadedAsset {
            id: name,
            original_filename: original_filename.to_string(),
            stored_path,
            size_bytes,
            declared_mime,
        })
    }

    /// Allocate a path in the outbound staging directory for a transform
    /// result. The caller writes the file; the name is already unique.
    pub fn output_path(&self, filename: &str) -> PathBuf {
        self.config.outbound_dir.join(filename)
    }

    /// Queue a path for removal at or after `delay` from now. Idempotent:
    /// sweeping a path whose file is already gone is not an error.
    pub fn schedule_delete(&self, path: &Path, delay: Duration) {
        let not_before = self.clock.now() + delay;
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.push(PendingDelete {
            path: path.to_path_buf(),
            not_before,
        });
    }

    /// Immediate best-effort removal, used on error paths so failed requests
    /// never leak disk space. A missing file is swallowed.
    pub fn delete_now(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove staged file {}: {}", path.display(), e);
            }
        }
    }

    /// Remove every tracked path whose grace window has elapsed. Returns the
    /// number of entries swept.
    pub fn sweep_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<PendingDelete> = {
            let mut pending = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut kept = Vec::with_capacity(pending.len());
            let mut due = Vec::new();
            for entry in pending.drain(..) {
                if entry.not_before <= now {
                    due.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            *pending = kept;
            due
        };

        let count = due.len();
        for entry in due {
            self.delete_now(&entry.path);
        }
        count
    }

    /// Drop every tracked path regardless of its grace window. Used at
    /// shutdown so the staging directories start empty next boot.
    pub fn purge_pending(&self) -> usize {
        let drained: Vec<PendingDelete> = {
            let mut pending = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.drain(..).collect()
        };
        let count = drained.len();
        for entry in drained {
            self.delete_now(&entry.path);
        }
        count
    }

    pub fn pending_deletes(&self) -> usize {
        match self.pending.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Background sweep loop. Spawned once at startup.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let swept = self.sweep_due();
            if swept > 0 {
                debug!("Cleanup sweep removed {} staged file(s)", swept);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct ManualClock {
        start: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }
    }

    fn store_with_clock(dir: &Path, clock: Arc<dyn Clock>) -> TempStore {
        let config = StagingConfig {
            inbound_dir: dir.join("uploads"),
            outbound_dir: dir.join("output"),
        };
        TempStore::with_clock(config, clock).unwrap()
    }

    #[tokio::test]
    async fn stage_writes_bytes_under_unique_names() {
        let dir = tempdir().unwrap();
        let store = store_with_clock(dir.path(), Arc::new(SystemClock));

        let a = store.stage(b"first", "a.png", None).await.unwrap();
        let b = store.stage(b"second", "a.png", None).await.unwrap();

        assert_ne!(a.stored_path, b.stored_path);
        assert_eq!(a.size_bytes, 5);
        assert_eq!(std::fs::read(&a.stored_path).unwrap(), b"first");
        assert!(a.stored_path.starts_with(store.inbound_dir()));
        assert!(a.id.ends_with(".png"));
    }

    #[tokio::test]
    async fn delete_now_swallows_missing_files() {
        let dir = tempdir().unwrap();
        let store = store_with_clock(dir.path(), Arc::new(SystemClock));
        // Must not panic or log an error for a path that never existed.
        store.delete_now(&dir.path().join("uploads/no-such-file.png"));
    }

    #[tokio::test]
    async fn sweep_respects_the_grace_window() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = store_with_clock(dir.path(), clock.clone());

        let asset = store.stage(b"payload", "x.png", None).await.unwrap();
        store.schedule_delete(&asset.stored_path, Duration::from_secs(60));

        assert_eq!(store.sweep_due(), 0);
        assert!(asset.stored_path.exists());

        clock.advance(Duration::from_secs(59));
        assert_eq!(store.sweep_due(), 0);
        assert!(asset.stored_path.exists());

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.sweep_due(), 1);
        assert!(!asset.stored_path.exists());
        assert_eq!(store.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn sweeping_an_already_deleted_path_is_idempotent() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = store_with_clock(dir.path(), clock.clone());

        let asset = store.stage(b"payload", "x.png", None).await.unwrap();
        store.schedule_delete(&asset.stored_path, Duration::from_secs(1));
        store.delete_now(&asset.stored_path);

        clock.advance(Duration::from_secs(5));
        // The entry is swept without error even though the file is gone.
        assert_eq!(store.sweep_due(), 1);
    }

    #[tokio::test]
    async fn purge_ignores_grace_windows() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = store_with_clock(dir.path(), clock.clone());

        let a = store.stage(b"a", "a.png", None).await.unwrap();
        let b = store.stage(b"b", "b.png", None).await.unwrap();
        store.schedule_delete(&a.stored_path, Duration::from_secs(3600));
        store.schedule_delete(&b.stored_path, Duration::from_secs(3600));

        assert_eq!(store.purge_pending(), 2);
        assert!(!a.stored_path.exists());
        assert!(!b.stored_path.exists());
    }
}
