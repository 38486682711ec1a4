//! Bearer token caching with expiry tracking.
//!
//! Tokens survive process restarts through a small JSON cache file written
//! with owner-only permissions. A safety margin is subtracted from the
//! provider-reported expiry so a token is never used right at the edge of
//! its lifetime.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Seconds subtracted from the reported expiry before a token is reused.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 300;

/// A bearer token with its absolute expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token is still safe to use at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_SAFETY_MARGIN_SECS) < self.expires_at
    }
}

/// Two-level token cache: process memory backed by a JSON file.
///
/// A corrupt or unreadable cache file is treated as a miss, never an error;
/// the worst case is one extra credential exchange.
pub struct CredentialCache {
    path: PathBuf,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialCache {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Mutex::new(None),
        }
    }

    /// Return a token that is still valid at `now`, if one is cached.
    pub fn load_valid(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        if let Ok(guard) = self.cached.lock() {
            if let Some(token) = guard.as_ref() {
                if token.is_valid_at(now) {
                    return Some(token.clone());
                }
            }
        }

        let token = self.load_from_file()?;
        if !token.is_valid_at(now) {
            return None;
        }
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(token.clone());
        }
        Some(token)
    }

    fn load_from_file(&self) -> Option<CachedToken> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "token cache unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "token cache corrupt");
                None
            }
        }
    }

    /// Persist a freshly exchanged token and update the in-memory copy.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the cache file can't be
    /// written. Callers treat this as non-fatal; the token itself is
    /// still usable for the current cycle.
    pub fn store(&self, token: &CachedToken) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(token).map_err(io::Error::other)?;
        fs::write(&self.path, bytes)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(token.clone());
        }
        Ok(())
    }
}
