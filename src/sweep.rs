//! Background cleanup of orphaned artifacts.
//!
//! Runs every `interval`, deleting files in the artifact directory whose last
//! access is older than `max_age`. Individual failures, unreadable entries
//! included, are counted and skipped.
//! The loop stops at the next sleep or file boundary once its token is
//! cancelled.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Consecutive directory read errors after which a pass gives up.
const MAX_ENTRY_ERRORS: usize = 8;

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Sweeper {
    dir: PathBuf,
    interval: Duration,
    max_age: Duration,
}

impl Sweeper {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            max_age,
        }
    }

    /// Run the loop on the current runtime until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    pub async fn run(self, token: CancellationToken) {
        log::info!(
            "Artifact sweep started for {} (every {:?}, max age {:?})",
            self.dir.display(),
            self.interval,
            self.max_age
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.sweep_once(SystemTime::now(), Some(&token)).await {
                Ok(report) if report.removed > 0 || report.failed > 0 => log::info!(
                    "Artifact sweep removed {} of {} files ({} failed)",
                    report.removed,
                    report.scanned,
                    report.failed
                ),
                Ok(_) => {}
                Err(e) => log::warn!("Artifact sweep of {} failed: {e}", self.dir.display()),
            }
        }
        log::info!("Artifact sweep stopped");
    }

    /// One pass over the directory, judging ages against `now`.
    pub async fn sweep_once(
        &self,
        now: SystemTime,
        token: Option<&CancellationToken>,
    ) -> io::Result<SweepReport> {
        self.sweep_with(now, token, |path| async move { remove(&path).await })
            .await
    }

    async fn sweep_with<F, Fut>(
        &self,
        now: SystemTime,
        token: Option<&CancellationToken>,
        remove: F,
    ) -> io::Result<SweepReport>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e),
        };

        let mut entry_errors = 0;
        loop {
            if token.is_some_and(|t| t.is_cancelled()) {
                break;
            }
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => {
                    entry_errors = 0;
                    entry
                }
                Ok(None) => break,
                Err(e) => {
                    report.failed += 1;
                    entry_errors += 1;
                    log::warn!("Could not read entry in {}: {e}", self.dir.display());
                    if entry_errors >= MAX_ENTRY_ERRORS {
                        break;
                    }
                    continue;
                }
            };
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("Skipping {}: {e}", path.display());
                    continue;
                }
            };
            report.scanned += 1;

            let last_used = metadata.accessed().or_else(|_| metadata.modified());
            let expired = match last_used {
                Ok(at) => now.duration_since(at).map_or(false, |age| age > self.max_age),
                Err(_) => false,
            };
            if !expired {
                continue;
            }

            match remove(path.clone()).await {
                Ok(()) => {
                    report.removed += 1;
                    log::debug!("Swept stale artifact {}", path.display());
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Could not sweep {}: {e}", path.display());
                }
            }
        }
        Ok(report)
    }
}

async fn remove(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        // Someone else (the stream's own cleanup) got there first.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};

    const HOUR: Duration = Duration::from_secs(3600);

    fn touch(dir: &Path, name: &str, age: Duration, now: SystemTime) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF").unwrap();
        let at = now - age;
        let times = FileTimes::new().set_accessed(at).set_modified(at);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_times(times)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn removes_only_expired_files() {
        let tmp = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = touch(tmp.path(), "old.pdf", 3 * HOUR, now);
        let older = touch(tmp.path(), "older.pdf", 30 * HOUR, now);
        let fresh = touch(tmp.path(), "fresh.pdf", HOUR, now);
        let just_now = touch(tmp.path(), "new.pdf", Duration::ZERO, now);
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();

        let sweeper = Sweeper::new(tmp.path(), HOUR, 2 * HOUR);
        let report = sweeper.sweep_once(now, None).await.unwrap();

        assert_eq!(report, SweepReport { scanned: 4, removed: 2, failed: 0 });
        assert!(!old.exists());
        assert!(!older.exists());
        assert!(fresh.exists());
        assert!(just_now.exists());
        assert!(tmp.path().join("subdir").exists());
    }

    #[tokio::test]
    async fn failed_removal_is_counted_and_pass_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let a = touch(tmp.path(), "a.pdf", 5 * HOUR, now);
        let locked = touch(tmp.path(), "locked.pdf", 5 * HOUR, now);
        let c = touch(tmp.path(), "c.pdf", 5 * HOUR, now);

        let sweeper = Sweeper::new(tmp.path(), HOUR, HOUR);
        let report = sweeper
            .sweep_with(now, None, |path| async move {
                if path.file_name().and_then(|n| n.to_str()) == Some("locked.pdf") {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    remove(&path).await
                }
            })
            .await
            .unwrap();

        assert_eq!(report, SweepReport { scanned: 3, removed: 2, failed: 1 });
        assert!(!a.exists());
        assert!(!c.exists());
        assert!(locked.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_an_empty_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let sweeper = Sweeper::new(tmp.path().join("nope"), HOUR, HOUR);
        let report = sweeper.sweep_once(SystemTime::now(), None).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(tmp.path(), "a.pdf", 5 * HOUR, now);
        touch(tmp.path(), "b.pdf", 5 * HOUR, now);

        let token = CancellationToken::new();
        token.cancel();
        let sweeper = Sweeper::new(tmp.path(), HOUR, HOUR);
        let report = sweeper.sweep_once(now, Some(&token)).await.unwrap();
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn loop_exits_on_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let handle = Sweeper::new(tmp.path(), Duration::from_secs(1800), HOUR).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweep loop did not stop")
            .unwrap();
    }
}
