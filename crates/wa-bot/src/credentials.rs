//! Tenant credential directories
//!
//! The WhatsApp client keeps its pairing data under one directory per tenant.
//! Removing it is best effort: a busy directory is retried a bounded number
//! of times, anything else is logged and given up on.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use wa_core::{SessionConfig, TenantId};

/// `EBUSY` on Linux and macOS
const EBUSY: i32 = 16;

/// Result of removing a tenant's credential directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// Nothing to remove
    Missing,
    /// Still busy after every attempt
    Exhausted { attempts: u32 },
    Failed(String),
}

/// Locates and removes tenant credential directories
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
    max_attempts: u32,
    backoff: Duration,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            root: root.into(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.auth_dir.clone(),
            config.cleanup_max_attempts,
            config.cleanup_backoff(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Credential directory of `tenant`
    ///
    /// ASCII letters, digits and `-` are kept; every other byte, `_` included,
    /// becomes `_XX` in upper-case hex. Distinct tenants never share a
    /// directory and none can leave `root`.
    pub fn path_for(&self, tenant: &TenantId) -> PathBuf {
        let mut name = String::from("session-");
        for byte in tenant.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("_{:02X}", byte));
            }
        }
        self.root.join(name)
    }

    /// Remove the tenant's credential directory
    pub async fn remove(&self, tenant: &TenantId) -> CleanupOutcome {
        let path = self.path_for(tenant);
        let outcome = self
            .remove_with(&path, |p| async move { tokio::fs::remove_dir_all(p).await })
            .await;

        match &outcome {
            CleanupOutcome::Removed => info!(tenant = %tenant, path = %path.display(), "Removed credentials"),
            CleanupOutcome::Missing => debug!(tenant = %tenant, "No credentials to remove"),
            CleanupOutcome::Exhausted { attempts } => warn!(
                tenant = %tenant,
                attempts,
                "Credential directory still busy, giving up"
            ),
            CleanupOutcome::Failed(e) => warn!(tenant = %tenant, error = %e, "Failed to remove credentials"),
        }
        outcome
    }

    async fn remove_with<F, Fut>(&self, path: &Path, mut op: F) -> CleanupOutcome
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(path.to_path_buf()).await {
                Ok(()) => return CleanupOutcome::Removed,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return CleanupOutcome::Missing,
                Err(e) if is_busy(&e) => {
                    if attempt >= self.max_attempts {
                        return CleanupOutcome::Exhausted { attempts: attempt };
                    }
                    debug!(attempt, path = %path.display(), "Credential directory busy, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return CleanupOutcome::Failed(e.to_string()),
            }
        }
    }
}

fn is_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ResourceBusy || err.raw_os_error() == Some(EBUSY)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn store(root: &Path, attempts: u32) -> CredentialStore {
        CredentialStore::new(root, attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_path_for_escapes_tenant() {
        let store = store(Path::new("/auth"), 1);
        assert_eq!(
            store.path_for(&TenantId::from("acme-01")),
            PathBuf::from("/auth/session-acme-01")
        );
        assert_eq!(
            store.path_for(&TenantId::from("../etc")),
            PathBuf::from("/auth/session-_2E_2E_2Fetc")
        );
        assert_eq!(
            store.path_for(&TenantId::from("caf\u{e9}")),
            PathBuf::from("/auth/session-caf_C3_A9")
        );
    }

    #[test]
    fn test_path_for_keeps_tenants_apart() {
        let store = store(Path::new("/auth"), 1);
        let dotted = store.path_for(&TenantId::from("acme.br"));
        let underscored = store.path_for(&TenantId::from("acme_br"));

        assert_eq!(dotted, PathBuf::from("/auth/session-acme_2Ebr"));
        assert_eq!(underscored, PathBuf::from("/auth/session-acme_5Fbr"));
        assert_ne!(dotted, underscored);
    }

    #[tokio::test]
    async fn test_remove_leaves_similar_tenant_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1);
        let dotted = TenantId::from("acme.br");
        let underscored = TenantId::from("acme_br");
        std::fs::create_dir_all(store.path_for(&dotted)).unwrap();
        std::fs::create_dir_all(store.path_for(&underscored)).unwrap();

        assert_eq!(store.remove(&dotted).await, CleanupOutcome::Removed);
        assert!(!store.path_for(&dotted).exists());
        assert!(store.path_for(&underscored).exists());
    }

    #[tokio::test]
    async fn test_remove_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 3);
        let tenant = TenantId::from("acme");

        let path = store.path_for(&tenant);
        std::fs::create_dir_all(path.join("Default")).unwrap();
        std::fs::write(path.join("Default").join("Cookies"), b"x").unwrap();

        assert_eq!(store.remove(&tenant).await, CleanupOutcome::Removed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 3);
        assert_eq!(store.remove(&TenantId::from("ghost")).await, CleanupOutcome::Missing);
    }

    #[tokio::test]
    async fn test_busy_is_retried_until_success() {
        let store = store(Path::new("/auth"), 5);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let outcome = store
            .remove_with(Path::new("/auth/session-acme"), move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(io::Error::from(io::ErrorKind::ResourceBusy))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(outcome, CleanupOutcome::Removed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_busy_retries_are_bounded() {
        let store = store(Path::new("/auth"), 4);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let outcome = store
            .remove_with(Path::new("/auth/session-acme"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from_raw_os_error(EBUSY)) }
            })
            .await;

        assert_eq!(outcome, CleanupOutcome::Exhausted { attempts: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let store = store(Path::new("/auth"), 4);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let outcome = store
            .remove_with(Path::new("/auth/session-acme"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) }
            })
            .await;

        assert!(matches!(outcome, CleanupOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
