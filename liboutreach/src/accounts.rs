//! Sender account registry
//!
//! This module tracks the accounts available to campaigns and the responder,
//! their aliases, proxy templates, and active flags, and persists that state
//! to a TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::{AccountError, Result};
use crate::types::Account;

/// Registry of sender accounts
///
/// Manages account registration, alias lookup, and state persistence.
/// Thread-safe via Arc<RwLock<RegistryState>>.
#[derive(Clone)]
pub struct AccountRegistry {
    /// Path to the registry file (accounts.toml)
    registry_file: PathBuf,
    state: Arc<RwLock<RegistryState>>,
}

/// Registry state persisted to TOML
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryState {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl AccountRegistry {
    /// Create a registry with default file location
    ///
    /// Uses XDG Base Directory spec: ~/.config/outreach/accounts.toml
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AccountError::RegistryFile("XDG config directory not found".to_string())
        })?;
        Self::with_path(config_dir.join("outreach").join("accounts.toml"))
    }

    /// Create a registry with a custom file path
    pub fn with_path(registry_file: PathBuf) -> Result<Self> {
        let mut registry = Self {
            registry_file,
            state: Arc::new(RwLock::new(RegistryState::default())),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Validate account alias format
    ///
    /// Rules:
    /// - Alphanumeric characters, hyphens, and underscores only
    /// - Maximum 64 characters
    /// - Cannot be empty
    /// - Cannot be a reserved word
    pub fn validate_alias(alias: &str) -> Result<()> {
        if alias.is_empty() {
            return Err(AccountError::InvalidAlias("alias cannot be empty".to_string()).into());
        }

        if alias.len() > 64 {
            return Err(AccountError::InvalidAlias(format!(
                "alias too long: {} characters (max 64)",
                alias.len()
            ))
            .into());
        }

        if !alias
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AccountError::InvalidAlias(format!(
                "invalid alias '{}': must be alphanumeric with hyphens/underscores only",
                alias
            ))
            .into());
        }

        let reserved = ["all", "none", "list"];
        if reserved.contains(&alias.to_lowercase().as_str()) {
            return Err(AccountError::ReservedAlias(alias.to_string()).into());
        }

        Ok(())
    }

    /// Register an account, replacing any existing entry with the same alias
    pub fn register(&self, account: Account) -> Result<()> {
        Self::validate_alias(&account.alias)?;

        {
            let mut state = self.state.write().unwrap();
            state.accounts.retain(|a| a.alias != account.alias);
            state.accounts.push(account);
        }

        self.save()
    }

    /// Remove an account by alias
    pub fn unregister(&self, alias: &str) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            let before = state.accounts.len();
            state.accounts.retain(|a| a.alias != alias);
            if state.accounts.len() == before {
                return Err(AccountError::NotFound(alias.to_string()).into());
            }
        }

        self.save()
    }

    /// Look up an account by alias
    pub fn get(&self, alias: &str) -> Option<Account> {
        let state = self.state.read().unwrap();
        state.accounts.iter().find(|a| a.alias == alias).cloned()
    }

    /// All registered accounts
    pub fn list(&self) -> Vec<Account> {
        self.state.read().unwrap().accounts.clone()
    }

    /// Accounts with the active flag set
    pub fn active(&self) -> Vec<Account> {
        let state = self.state.read().unwrap();
        state.accounts.iter().filter(|a| a.active).cloned().collect()
    }

    /// Resolve a list of aliases to accounts, failing on the first unknown one
    pub fn resolve(&self, aliases: &[String]) -> Result<Vec<Account>> {
        aliases
            .iter()
            .map(|alias| {
                self.get(alias)
                    .ok_or_else(|| AccountError::NotFound(alias.clone()).into())
            })
            .collect()
    }

    /// Record the latest session health for an account
    pub fn set_status(&self, alias: &str, status: crate::types::ConnectionStatus) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            let account = state
                .accounts
                .iter_mut()
                .find(|a| a.alias == alias)
                .ok_or_else(|| AccountError::NotFound(alias.to_string()))?;
            account.status = status;
        }

        self.save()
    }

    /// Flip an account's active flag
    pub fn set_active(&self, alias: &str, active: bool) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            let account = state
                .accounts
                .iter_mut()
                .find(|a| a.alias == alias)
                .ok_or_else(|| AccountError::NotFound(alias.to_string()))?;
            account.active = active;
        }

        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.registry_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AccountError::RegistryFile(format!("Failed to create directory: {}", e))
            })?;
        }

        let state = self.state.read().unwrap();
        let toml_content = toml::to_string_pretty(&*state)
            .map_err(|e| AccountError::RegistryFile(format!("Failed to serialize state: {}", e)))?;

        std::fs::write(&self.registry_file, toml_content).map_err(|e| {
            AccountError::RegistryFile(format!("Failed to write registry file: {}", e))
        })?;

        Ok(())
    }

    /// Load state from disk
    ///
    /// Handles missing file gracefully by using default state.
    /// Handles corrupted file gracefully by logging a warning and using defaults.
    fn load(&mut self) -> Result<()> {
        if !self.registry_file.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.registry_file).map_err(|e| {
            AccountError::RegistryFile(format!("Failed to read registry file: {}", e))
        })?;

        match toml::from_str::<RegistryState>(&content) {
            Ok(loaded) => {
                let mut state = self.state.write().unwrap();
                *state = loaded;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Corrupted account registry file, using defaults: {}", e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_registry() -> (TempDir, AccountRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let registry =
            AccountRegistry::with_path(temp_dir.path().join("accounts.toml")).unwrap();
        (temp_dir, registry)
    }

    #[test]
    fn test_validate_alias_valid() {
        assert!(AccountRegistry::validate_alias("ana").is_ok());
        assert!(AccountRegistry::validate_alias("work-account").is_ok());
        assert!(AccountRegistry::validate_alias("prod_123").is_ok());
    }

    #[test]
    fn test_validate_alias_invalid() {
        assert!(AccountRegistry::validate_alias("").is_err());

        let long_alias = "a".repeat(65);
        assert!(AccountRegistry::validate_alias(&long_alias).is_err());

        assert!(AccountRegistry::validate_alias("bad alias").is_err()); // space
        assert!(AccountRegistry::validate_alias("bad@alias").is_err()); // @
        assert!(AccountRegistry::validate_alias("bad.alias").is_err()); // .

        // Reserved words, case insensitive
        assert!(AccountRegistry::validate_alias("all").is_err());
        assert!(AccountRegistry::validate_alias("ALL").is_err());
        assert!(AccountRegistry::validate_alias("none").is_err());
        assert!(AccountRegistry::validate_alias("list").is_err());
    }

    #[test]
    fn test_register_and_get() {
        let (_dir, registry) = scratch_registry();

        registry.register(Account::new("ana.lopez", "ana")).unwrap();

        let account = registry.get("ana").unwrap();
        assert_eq!(account.handle, "ana.lopez");
        assert!(account.active);
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_register_replaces_same_alias() {
        let (_dir, registry) = scratch_registry();

        registry.register(Account::new("old.handle", "ana")).unwrap();
        registry.register(Account::new("new.handle", "ana")).unwrap();

        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get("ana").unwrap().handle, "new.handle");
    }

    #[test]
    fn test_unregister() {
        let (_dir, registry) = scratch_registry();

        registry.register(Account::new("ana.lopez", "ana")).unwrap();
        registry.unregister("ana").unwrap();

        assert!(registry.get("ana").is_none());
        assert!(registry.unregister("ana").is_err());
    }

    #[test]
    fn test_active_filter() {
        let (_dir, registry) = scratch_registry();

        registry.register(Account::new("a", "ana")).unwrap();
        registry.register(Account::new("b", "bo")).unwrap();
        registry.set_active("bo", false).unwrap();

        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alias, "ana");
    }

    #[test]
    fn test_set_status_persists() {
        use crate::types::ConnectionStatus;

        let (_dir, registry) = scratch_registry();
        registry.register(Account::new("a", "ana")).unwrap();

        registry
            .set_status("ana", ConnectionStatus::AuthRequired)
            .unwrap();
        assert_eq!(
            registry.get("ana").unwrap().status,
            ConnectionStatus::AuthRequired
        );

        assert!(registry
            .set_status("ghost", ConnectionStatus::Connected)
            .is_err());
    }

    #[test]
    fn test_resolve_unknown_alias_errors() {
        let (_dir, registry) = scratch_registry();
        registry.register(Account::new("a", "ana")).unwrap();

        let result = registry.resolve(&["ana".to_string(), "ghost".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_state_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("accounts.toml");

        {
            let registry = AccountRegistry::with_path(path.clone()).unwrap();
            registry.register(Account::new("ana.lopez", "ana")).unwrap();
            registry.set_active("ana", false).unwrap();
        }

        let registry = AccountRegistry::with_path(path).unwrap();
        let account = registry.get("ana").unwrap();
        assert_eq!(account.handle, "ana.lopez");
        assert!(!account.active);
    }

    #[test]
    fn test_corrupted_registry_file_graceful() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("accounts.toml");
        std::fs::write(&path, "invalid toml {{{").unwrap();

        let registry = AccountRegistry::with_path(path).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_missing_registry_file_graceful() {
        let temp_dir = TempDir::new().unwrap();
        let registry =
            AccountRegistry::with_path(temp_dir.path().join("nonexistent.toml")).unwrap();
        assert!(registry.list().is_empty());
    }
}
