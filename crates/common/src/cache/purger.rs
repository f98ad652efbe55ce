//! Background sweeper that keeps cache disk usage between the watermarks.
//!
//! Each pass walks the selector directory and asks [`decide`] what to do with
//! every file. Decisions are re-evaluated against a fresh usage sample per
//! file, so a sweep stops evicting once usage has dropped below the low
//! watermark.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use super::{CacheConfig, CacheState};

/// Non-cached files older than this are garbage from crashed writers or fills.
pub const ORPHAN_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Fraction of the filesystem in use, `1 - free / total`.
pub trait UsageProbe: Send + Sync + std::fmt::Debug {
    fn usage(&self, path: &Path) -> io::Result<f64>;
}

/// Reads usage from `statvfs(2)` on the filesystem holding the cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl UsageProbe for StatvfsProbe {
    fn usage(&self, path: &Path) -> io::Result<f64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        let total = stat.blocks() as f64;
        if total == 0.0 {
            return Ok(0.0);
        }
        Ok(1.0 - stat.blocks_available() as f64 / total)
    }
}

/// A settable usage value.
#[derive(Debug, Default)]
pub struct FixedUsage(AtomicU64);

impl FixedUsage {
    pub fn new(usage: f64) -> Self {
        Self(AtomicU64::new(usage.to_bits()))
    }

    pub fn set(&self, usage: f64) {
        self.0.store(usage.to_bits(), Ordering::SeqCst);
    }
}

impl UsageProbe for FixedUsage {
    fn usage(&self, _path: &Path) -> io::Result<f64> {
        Ok(f64::from_bits(self.0.load(Ordering::SeqCst)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeDecision {
    Keep,
    /// A `.cached` copy that can be dropped; the permanent store still has it.
    Evict,
    /// A stale non-cached file left behind by a dead writer or fill.
    Garbage,
}

/// Decide the fate of one cache file.
pub fn decide(
    state: CacheState,
    age: Duration,
    size: u64,
    usage: f64,
    config: &CacheConfig,
) -> PurgeDecision {
    if state != CacheState::Cached {
        return if age <= ORPHAN_AGE {
            PurgeDecision::Keep
        } else {
            PurgeDecision::Garbage
        };
    }

    let eligible = config.age_eligible_for_eviction;
    if usage < config.low_watermark {
        return PurgeDecision::Keep;
    }
    if usage >= config.high_watermark && age >= eligible {
        return PurgeDecision::Evict;
    }
    if age > eligible && usage > config.low_watermark {
        // integer division: anything but young-and-large scores zero
        let secs = age.as_secs().max(1);
        if size / secs.saturating_mul(secs) == 0 {
            return PurgeDecision::Evict;
        }
    }
    PurgeDecision::Keep
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub evicted: usize,
    pub garbage: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
pub struct CachePurger {
    config: Arc<CacheConfig>,
    dir: PathBuf,
    probe: Arc<dyn UsageProbe>,
}

impl CachePurger {
    pub fn new(config: Arc<CacheConfig>, probe: Arc<dyn UsageProbe>) -> Self {
        let dir = config.dir();
        Self { config, dir, probe }
    }

    pub fn usage(&self) -> io::Result<f64> {
        self.probe.usage(&self.dir)
    }

    /// One pass over the cache directory.
    pub async fn sweep(&self) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e),
        };
        let now = SystemTime::now();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some((id, state)) = name.to_str().and_then(CacheState::parse_file_name) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // raced with a rename or another delete
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            report.scanned += 1;

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            let usage = self.usage()?;

            let decision = decide(state, age, meta.len(), usage, &self.config);
            if decision == PurgeDecision::Keep {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(file_id = %id, error = %e, "failed to purge cache file");
                    continue;
                }
            }
            report.bytes_freed += meta.len();
            match decision {
                PurgeDecision::Evict => {
                    report.evicted += 1;
                    tracing::debug!(file_id = %id, ?age, size = meta.len(), usage, "evicted");
                }
                PurgeDecision::Garbage => {
                    report.garbage += 1;
                    tracing::info!(file_id = %id, state = state.extension(), ?age, "removed stale cache file");
                }
                PurgeDecision::Keep => {}
            }
        }
        Ok(report)
    }

    /// Sweep every `walk_sleep` until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.walk_sleep);
        tracing::info!(dir = %self.dir.display(), walk_sleep = ?self.config.walk_sleep, "cache purger started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.evicted + report.garbage > 0 => {
                            tracing::info!(?report, "cache sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "cache sweep failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("cache purger shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileId;

    fn config(root: &Path) -> CacheConfig {
        CacheConfig {
            root: root.to_path_buf(),
            selector: "sel".into(),
            low_watermark: 0.5,
            high_watermark: 0.75,
            age_eligible_for_eviction: Duration::from_secs(300),
            ..Default::default()
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_below_low_watermark_keeps_everything() {
        let cfg = config(Path::new("/tmp"));
        let d = decide(CacheState::Cached, secs(10_000), 1, 0.2, &cfg);
        assert_eq!(d, PurgeDecision::Keep);
    }

    #[test]
    fn test_above_high_watermark_evicts_eligible() {
        let cfg = config(Path::new("/tmp"));
        assert_eq!(
            decide(CacheState::Cached, secs(300), u64::MAX, 0.8, &cfg),
            PurgeDecision::Evict
        );
        assert_eq!(
            decide(CacheState::Cached, secs(299), 1, 0.8, &cfg),
            PurgeDecision::Keep
        );
    }

    #[test]
    fn test_between_watermarks_uses_size_over_age_squared() {
        let cfg = config(Path::new("/tmp"));
        // 1000s old: age² = 1_000_000
        assert_eq!(
            decide(CacheState::Cached, secs(1000), 999_999, 0.6, &cfg),
            PurgeDecision::Evict
        );
        assert_eq!(
            decide(CacheState::Cached, secs(1000), 1_000_000, 0.6, &cfg),
            PurgeDecision::Keep
        );
        // not yet eligible
        assert_eq!(
            decide(CacheState::Cached, secs(300), 1, 0.6, &cfg),
            PurgeDecision::Keep
        );
    }

    #[test]
    fn test_orphans_are_garbage_after_a_week() {
        let cfg = config(Path::new("/tmp"));
        for state in [
            CacheState::Uploading,
            CacheState::Uploaded,
            CacheState::Caching,
        ] {
            assert_eq!(decide(state, ORPHAN_AGE, 1, 0.99, &cfg), PurgeDecision::Keep);
            assert_eq!(
                decide(state, ORPHAN_AGE + secs(1), 1, 0.0, &cfg),
                PurgeDecision::Garbage
            );
        }
    }

    #[tokio::test]
    async fn test_sweep_evicts_old_cached_files() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = Arc::new(config(temp.path()));
        std::fs::create_dir_all(cfg.dir()).unwrap();

        let old = FileId::generate();
        let fresh = FileId::generate();
        let pending = FileId::generate();
        let old_path = cfg.dir().join(CacheState::Cached.file_name(&old));
        std::fs::write(&old_path, b"old").unwrap();
        std::fs::write(cfg.dir().join(CacheState::Cached.file_name(&fresh)), b"new").unwrap();
        std::fs::write(cfg.dir().join(CacheState::Uploaded.file_name(&pending)), b"p").unwrap();
        std::fs::write(cfg.dir().join("unrelated.txt"), b"x").unwrap();

        let file = std::fs::File::options().write(true).open(&old_path).unwrap();
        file.set_modified(SystemTime::now() - secs(3600)).unwrap();

        let probe = Arc::new(FixedUsage::new(0.9));
        let purger = CachePurger::new(cfg.clone(), probe.clone());
        let report = purger.sweep().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.evicted, 1);
        assert!(!old_path.exists());
        assert!(cfg.dir().join(CacheState::Cached.file_name(&fresh)).exists());
        assert!(cfg.dir().join(CacheState::Uploaded.file_name(&pending)).exists());

        probe.set(0.1);
        let report = purger.sweep().await.unwrap();
        assert_eq!(report.evicted, 0);
    }

    #[tokio::test]
    async fn test_sweep_missing_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = Arc::new(config(&temp.path().join("nope")));
        let purger = CachePurger::new(cfg, Arc::new(FixedUsage::new(1.0)));
        assert_eq!(purger.sweep().await.unwrap(), SweepReport::default());
    }

    #[test]
    fn test_statvfs_probe() {
        let temp = tempfile::tempdir().unwrap();
        let usage = StatvfsProbe.usage(temp.path()).unwrap();
        assert!((0.0..=1.0).contains(&usage));
    }
}
