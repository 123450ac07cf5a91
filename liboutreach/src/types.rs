//! Core data types for Outreach

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sender account registered with the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Platform handle, stored without a leading '@'
    pub handle: String,
    /// Short local name used on the command line
    pub alias: String,
    /// Inactive accounts are skipped by campaigns and the responder
    #[serde(default = "default_active")]
    pub active: bool,
    /// Raw proxy URL template, may contain a `{session}` placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Last observed session health, updated on resolution
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// Session health as of the last resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    AuthRequired,
}

impl Account {
    pub fn new(handle: impl Into<String>, alias: impl Into<String>) -> Self {
        Account {
            handle: handle.into(),
            alias: alias.into(),
            active: true,
            proxy: None,
            status: ConnectionStatus::Unknown,
            created_at: Some(Utc::now()),
        }
    }
}

/// A recipient pulled from a target list, stored without a leading '@'
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Target(pub String);

impl Target {
    /// Normalizes raw list input: trims whitespace and strips one leading '@'.
    /// Returns None for blank lines.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Target(trimmed.trim_start_matches('@').to_string()))
    }

    /// Key used for contacted-set lookups
    pub fn dedup_key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Terminal classification of a single send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// Message accepted by the platform
    Success,
    /// Platform throttled the account; retryable after a penalty
    RateLimited,
    /// Session rejected mid-campaign
    AuthRequired,
    /// Account flagged for manual verification
    ChallengeRequired,
    /// Target does not exist or cannot receive messages; never retried
    PermanentTarget(String),
    /// Network-level failure; retryable with backoff
    TransientNetwork(String),
}

impl SendOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendOutcome::RateLimited | SendOutcome::TransientNetwork(_)
        )
    }
}

/// One line of the append-only contact ledger.
///
/// Field names are fixed by the on-disk format and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendRecord {
    pub ts: DateTime<Utc>,
    pub account: String,
    #[serde(rename = "to")]
    pub target: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SendRecord {
    pub fn success(account: &str, target: &Target) -> Self {
        SendRecord {
            ts: Utc::now(),
            account: account.to_string(),
            target: target.0.clone(),
            ok: true,
            detail: None,
        }
    }

    pub fn failure(account: &str, target: &Target, detail: impl Into<String>) -> Self {
        SendRecord {
            ts: Utc::now(),
            account: account.to_string(),
            target: target.0.clone(),
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Where a dispatch worker currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Resolving,
    WaitingForSlot,
    Sending,
    CoolingDown,
    Skipped,
    Paused,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Resolving => "resolving",
            WorkerState::WaitingForSlot => "waiting_for_slot",
            WorkerState::Sending => "sending",
            WorkerState::CoolingDown => "cooling_down",
            WorkerState::Skipped => "skipped",
            WorkerState::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

/// Result of a proxy reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// Probe succeeded; carries the masked egress IP
    Reachable(String),
    Unreachable(String),
}
