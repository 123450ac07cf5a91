//! Error types for Outreach

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl OutreachError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OutreachError::InvalidInput(_) => 3,
            OutreachError::Session(_) => 2,
            OutreachError::Proxy(_) => 1,
            OutreachError::Config(_) => 1,
            OutreachError::Ledger(_) => 1,
            OutreachError::Account(_) => 3,
            OutreachError::SessionStore(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Invalid account alias: {0}")]
    InvalidAlias(String),

    #[error("Reserved alias '{0}' cannot be used")]
    ReservedAlias(String),

    #[error("Account '{0}' not found")]
    NotFound(String),

    #[error("Registry file error: {0}")]
    RegistryFile(String),
}

/// Session resolution failures.
///
/// Carries the account handle so callers can route the failure to the
/// per-account decision point without extra bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no stored session for @{0}")]
    Missing(String),

    #[error("stored session for @{0} is no longer valid")]
    Expired(String),

    #[error("@{0} requires a verification challenge in the official app")]
    ChallengeRequired(String),
}

impl SessionError {
    pub fn account(&self) -> &str {
        match self {
            SessionError::Missing(a)
            | SessionError::Expired(a)
            | SessionError::ChallengeRequired(a) => a,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("proxy unreachable: {0}")]
    Unreachable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = OutreachError::InvalidInput("empty target list".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_session_error() {
        let error = OutreachError::Session(SessionError::Expired("ana".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_proxy_error() {
        let error = OutreachError::Proxy(ProxyError::Unreachable("timeout".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = OutreachError::Config(ConfigError::MissingField("storage.data_dir".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_session_error_account_accessor() {
        assert_eq!(SessionError::Missing("ana".to_string()).account(), "ana");
        assert_eq!(SessionError::Expired("bo".to_string()).account(), "bo");
        assert_eq!(
            SessionError::ChallengeRequired("cy".to_string()).account(),
            "cy"
        );
    }

    #[test]
    fn test_session_error_formatting() {
        let error = OutreachError::Session(SessionError::Missing("ana".to_string()));
        assert_eq!(
            format!("{}", error),
            "Session error: no stored session for @ana"
        );
    }

    #[test]
    fn test_config_invalid_formatting() {
        let error = ConfigError::Invalid("delay_min_secs must not exceed delay_max_secs".to_string());
        assert!(format!("{}", error).contains("delay_min_secs"));
    }

    #[test]
    fn test_error_conversion_from_session_error() {
        let err: OutreachError = SessionError::ChallengeRequired("ana".to_string()).into();
        assert!(matches!(err, OutreachError::Session(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_err() -> Result<()> {
            Err(OutreachError::InvalidInput("test".to_string()))
        }
        assert!(returns_err().is_err());
    }
}
