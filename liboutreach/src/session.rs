//! Session artifact storage and resolution
//!
//! Session artifacts are opaque JSON blobs produced by the external login
//! flow, one file per account under `<data_dir>/sessions/<handle>.json`.
//! The resolver turns a stored artifact into a live `ClientHandle`: it loads
//! the artifact, attaches the account's proxy binding, and runs the injected
//! liveness check. Failures are classified so the engine can route them to
//! the operator decision point.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::accounts::AccountRegistry;
use crate::error::{Result, SessionError};
use crate::proxy::{ProxyAssigner, ProxyBinding};
use crate::types::{Account, ConnectionStatus};

/// A resolved, validated session ready for platform calls
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub account: String,
    /// Opaque artifact payload, passed through to the connector
    pub artifact: serde_json::Value,
    pub proxy: Option<ProxyBinding>,
}

/// Platform liveness check for a loaded session
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Classifies an invalid session as expired or challenge-gated
    async fn validate(&self, handle: &ClientHandle) -> std::result::Result<(), SessionError>;
}

/// Per-account session artifact files
#[derive(Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        SessionStore {
            dir: data_dir.as_ref().join("sessions"),
        }
    }

    fn artifact_path(&self, handle: &str) -> PathBuf {
        let handle = handle.trim().trim_start_matches('@');
        self.dir.join(format!("{}.json", handle))
    }

    pub fn has_session(&self, handle: &str) -> bool {
        self.artifact_path(handle).exists()
    }

    /// Load an account's artifact
    ///
    /// A missing file is `SessionError::Missing`; an unreadable or
    /// non-JSON file is treated as `SessionError::Expired`.
    pub fn load(&self, handle: &str) -> std::result::Result<serde_json::Value, SessionError> {
        let path = self.artifact_path(handle);
        if !path.exists() {
            return Err(SessionError::Missing(handle.to_string()));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|_| SessionError::Expired(handle.to_string()))?;
        serde_json::from_str(&content).map_err(|_| SessionError::Expired(handle.to_string()))
    }

    /// Persist an artifact produced by the login flow
    pub fn save(&self, handle: &str, artifact: &serde_json::Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| crate::error::OutreachError::SessionStore(e.to_string()))?;
        let path = self.artifact_path(handle);
        let content = serde_json::to_string_pretty(artifact)
            .map_err(|e| crate::error::OutreachError::SessionStore(e.to_string()))?;
        std::fs::write(&path, content)
            .map_err(|e| crate::error::OutreachError::SessionStore(e.to_string()))?;
        debug!(handle, path = %path.display(), "Saved session artifact");
        Ok(())
    }

    pub fn remove(&self, handle: &str) {
        let _ = std::fs::remove_file(self.artifact_path(handle));
    }
}

/// Resolves accounts to live client handles
pub struct SessionResolver {
    store: SessionStore,
    validator: Arc<dyn SessionValidator>,
    proxies: Arc<ProxyAssigner>,
    registry: AccountRegistry,
    /// Global fallback template for accounts without their own proxy
    default_proxy: Option<String>,
}

impl SessionResolver {
    pub fn new(
        store: SessionStore,
        validator: Arc<dyn SessionValidator>,
        proxies: Arc<ProxyAssigner>,
        registry: AccountRegistry,
        default_proxy: Option<String>,
    ) -> Self {
        SessionResolver {
            store,
            validator,
            proxies,
            registry,
            default_proxy,
        }
    }

    /// Resolve an account to a validated handle
    ///
    /// Updates the account's registry status as a side effect: Connected on
    /// success, AuthRequired when the session is expired or challenge-gated.
    /// No internal retries; the caller decides what a failure means.
    pub async fn resolve(&self, account: &Account) -> Result<ClientHandle> {
        let artifact = match self.store.load(&account.handle) {
            Ok(artifact) => artifact,
            Err(e) => {
                self.mark(account, ConnectionStatus::AuthRequired);
                return Err(e.into());
            }
        };

        let template = account.proxy.as_deref().or(self.default_proxy.as_deref());
        let proxy = self.proxies.ensure_binding(&account.handle, template).await?;

        let handle = ClientHandle {
            account: account.handle.clone(),
            artifact,
            proxy,
        };

        if let Err(e) = self.validator.validate(&handle).await {
            self.mark(account, ConnectionStatus::AuthRequired);
            return Err(e.into());
        }

        self.mark(account, ConnectionStatus::Connected);
        info!(account = %account.handle, "Session resolved");
        Ok(handle)
    }

    /// Drop the account's proxy binding after a send-path proxy failure so
    /// the next resolution mints a fresh session id
    pub async fn discard_proxy(&self, account: &str, detail: &str) {
        self.proxies.record_failure(account, detail).await;
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn mark(&self, account: &Account, status: ConnectionStatus) {
        // Status tracking is best effort; a registry write failure must not
        // turn a successful resolution into an error.
        if let Err(e) = self.registry.set_status(&account.alias, status) {
            debug!(account = %account.alias, "Could not update registry status: {}", e);
        }
    }
}
