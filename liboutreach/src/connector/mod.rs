//! Platform and operator ports
//!
//! The engine and responder never talk to a platform directly; everything
//! goes through the `Connector` trait. The mock connector lives here too and
//! is available to all builds, so binaries can run in loopback mode and tests
//! can script outcomes.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::ClientHandle;
use crate::types::{SendOutcome, Target};

pub mod mock;

pub use mock::MockConnector;

/// One message inside a thread snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: String,
    /// Handle of the author, without '@'
    pub sender: String,
    pub text: String,
}

/// A recent conversation as seen from one account's inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    /// Counterpart handle, without '@'
    pub peer: String,
    /// Oldest first; the last entry is the newest message
    pub messages: Vec<ThreadMessage>,
}

impl ThreadSnapshot {
    pub fn newest(&self) -> Option<&ThreadMessage> {
        self.messages.last()
    }
}

/// Platform operations used by the engine and the responder
#[async_trait]
pub trait Connector: Send + Sync {
    /// Deliver one direct message. Infrastructure failures (ledger, task
    /// plumbing) are Err; platform-level refusals are Ok(outcome).
    async fn send_direct(
        &self,
        handle: &ClientHandle,
        target: &Target,
        message: &str,
    ) -> Result<SendOutcome>;

    /// Unread or recently active threads, newest activity first
    async fn recent_threads(
        &self,
        handle: &ClientHandle,
        limit: usize,
    ) -> Result<Vec<ThreadSnapshot>>;

    /// Answer an existing thread
    async fn send_reply(
        &self,
        handle: &ClientHandle,
        thread_id: &str,
        message: &str,
    ) -> Result<SendOutcome>;
}

/// What the operator chose at an attention point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Drop the failed account, keep the rest of the campaign going
    ContinueWithoutAccount,
    /// Halt every worker; remaining targets stay queued
    PauseAll,
}

/// Operator decision point for per-account failures
///
/// Called from a worker task; implementations may block on user input.
#[async_trait]
pub trait DecisionPort: Send + Sync {
    async fn decide(&self, account: &str, reason: &str) -> FailureDecision;
}

/// Produces reply text for an inbound thread
///
/// Implementations must fall back to a canned reply rather than fail;
/// the responder loop never skips a thread because generation errored.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn reply_for(&self, thread: &ThreadSnapshot) -> String;
}

/// Canned-reply generator
pub struct TemplateReplier {
    reply: String,
}

impl TemplateReplier {
    pub fn new(reply: impl Into<String>) -> Self {
        TemplateReplier {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for TemplateReplier {
    async fn reply_for(&self, _thread: &ThreadSnapshot) -> String {
        self.reply.clone()
    }
}
