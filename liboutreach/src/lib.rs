//! Outreach - concurrent multi-account direct-message dispatch
//!
//! This library provides the core machinery for running paced outreach
//! campaigns and an inbox auto-responder across many sender accounts:
//! session resolution, sticky proxy assignment, an append-only contact
//! ledger, rate governance, and the dispatch engine itself. Platform access
//! is injected behind the `Connector` trait.

pub mod accounts;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod events;
pub mod governor;
pub mod ledger;
pub mod logging;
pub mod proxy;
pub mod responder;
pub mod session;
pub mod targets;
pub mod types;

// Re-export commonly used types
pub use accounts::AccountRegistry;
pub use config::Config;
pub use engine::{CampaignSpec, CampaignSummary, DispatchEngine};
pub use error::{OutreachError, Result};
pub use ledger::ContactLedger;
pub use responder::AutoResponder;
pub use types::{Account, SendOutcome, SendRecord, Target, WorkerState};
