//! Guest token cache shared by every process on the host.
//!
//! The token lives in `<dir>/guest_token.json` as `{token, set_time}`.
//! Reads and the read-modify-write on refresh run under an exclusive
//! `flock` on `<dir>/guest_token.json.lock`, so a process never overwrites
//! another's freshly issued token with a stale one.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sociallink_common::{ResolveError, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::from_api;
use crate::traits::XApi;

const TOKEN_FILE: &str = "guest_token.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestToken {
    pub token: String,
    /// Issue time, seconds since the Unix epoch.
    pub set_time: f64,
}

impl GuestToken {
    pub fn is_fresh(&self, ttl: Duration, now: f64) -> bool {
        !self.token.is_empty() && now - self.set_time < ttl.as_secs_f64()
    }
}

pub struct GuestTokenManager {
    api: Arc<dyn XApi>,
    file: PathBuf,
    lock_file: PathBuf,
    ttl: Duration,
    memo: Mutex<Option<GuestToken>>,
}

impl GuestTokenManager {
    pub fn new(api: Arc<dyn XApi>, cache_dir: &Path, ttl: Duration) -> Self {
        let file = cache_dir.join(TOKEN_FILE);
        let lock_file = cache_dir.join(format!("{TOKEN_FILE}.lock"));
        Self {
            api,
            file,
            lock_file,
            ttl,
            memo: Mutex::new(None),
        }
    }

    /// A usable token, or `None` when one could not be obtained. With
    /// `force_refresh` the freshness check is skipped and a new token is
    /// always issued.
    pub async fn get(&self, force_refresh: bool) -> Option<String> {
        let mut memo = self.memo.lock().await;
        if !force_refresh {
            if let Some(t) = memo.as_ref().filter(|t| t.is_fresh(self.ttl, now_secs())) {
                return Some(t.token.clone());
            }
        }

        match self.load_or_issue(force_refresh).await {
            Ok(token) => {
                let value = token.token.clone();
                *memo = Some(token);
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "Guest token unavailable");
                None
            }
        }
    }

    async fn load_or_issue(&self, force_refresh: bool) -> Result<GuestToken> {
        let _lock = self.lock().await?;

        if !force_refresh {
            if let Some(cached) = self.read_file().await {
                if cached.is_fresh(self.ttl, now_secs()) {
                    debug!(path = %self.file.display(), "Guest token reused from cache file");
                    return Ok(cached);
                }
            }
        }

        let token = self.api.activate_guest().await.map_err(from_api)?;
        let issued = GuestToken {
            token,
            set_time: now_secs(),
        };
        self.write_file(&issued).await?;
        info!(forced = force_refresh, "Guest token issued");
        Ok(issued)
    }

    async fn lock(&self) -> Result<FileLock> {
        let path = self.lock_file.clone();
        tokio::task::spawn_blocking(move || FileLock::acquire(&path))
            .await
            .map_err(|e| ResolveError::Network(format!("lock task failed: {e}")))?
            .map_err(ResolveError::from)
    }

    async fn read_file(&self) -> Option<GuestToken> {
        let raw = tokio::fs::read_to_string(&self.file).await.ok()?;
        match serde_json::from_str::<GuestToken>(&raw) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(path = %self.file.display(), error = %e, "Ignoring unreadable guest token cache");
                None
            }
        }
    }

    async fn write_file(&self, token: &GuestToken) -> Result<()> {
        let body = serde_json::to_vec(token)?;
        tokio::fs::write(&self.file, body).await?;
        Ok(())
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Exclusive advisory lock, released when dropped (the fd closes).
struct FileLock {
    _file: File,
}

impl FileLock {
    /// Blocks until the lock is held. Creates the directory if needed.
    fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        flock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

fn flock_exclusive(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        loop {
            // SAFETY: flock is a standard POSIX call on a descriptor owned by `file`.
            #[allow(unsafe_code)]
            let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(())
    }
}
