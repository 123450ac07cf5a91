//! Inbox auto-responder
//!
//! One poller task per account sweeps recent threads on a fixed cadence and
//! answers new inbound messages. A thread is answered at most once per
//! distinct newest-message id: the reply state file remembers the last
//! answered id per thread, and threads whose newest message is our own or
//! already answered are skipped before the reply generator is ever invoked.
//!
//! A session failure pauses only that account's poller; the others keep
//! sweeping. On stop the in-flight thread is finished and state persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connector::{Connector, ReplyGenerator};
use crate::error::{OutreachError, Result};
use crate::events::{Event, EventBus};
use crate::session::SessionResolver;
use crate::types::{Account, SendOutcome};

/// Persisted map of account -> thread id -> last answered message id
pub struct ReplyStateStore {
    path: PathBuf,
    state: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ReplyStateStore {
    /// Open the state file, tolerating a missing or corrupted file
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Corrupted reply state file, starting fresh: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        ReplyStateStore {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn last_answered(&self, account: &str, thread_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.get(account)?.get(thread_id).cloned()
    }

    /// Record an answer and persist the whole map
    pub async fn mark_answered(
        &self,
        account: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .entry(account.to_string())
            .or_default()
            .insert(thread_id.to_string(), message_id.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutreachError::SessionStore(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&*state)
            .map_err(|e| OutreachError::SessionStore(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| OutreachError::SessionStore(e.to_string()))?;
        Ok(())
    }
}

/// What a responder run produced
#[derive(Debug, Clone)]
pub struct ResponderSummary {
    pub replied: usize,
    pub accounts: usize,
    pub duration: Duration,
}

struct ResponderShared {
    resolver: SessionResolver,
    connector: Arc<dyn Connector>,
    generator: Arc<dyn ReplyGenerator>,
    state: ReplyStateStore,
    events: EventBus,
    poll_interval: Duration,
    threads_per_sweep: usize,
}

/// Runs inbox pollers for a set of accounts
pub struct AutoResponder {
    shared: Arc<ResponderShared>,
}

impl AutoResponder {
    pub fn new(
        resolver: SessionResolver,
        connector: Arc<dyn Connector>,
        generator: Arc<dyn ReplyGenerator>,
        state: ReplyStateStore,
        events: EventBus,
        poll_interval: Duration,
        threads_per_sweep: usize,
    ) -> Self {
        AutoResponder {
            shared: Arc::new(ResponderShared {
                resolver,
                connector,
                generator,
                state,
                events,
                poll_interval,
                threads_per_sweep,
            }),
        }
    }

    /// Poll until cancelled; returns totals across all accounts
    pub async fn run(
        self,
        accounts: Vec<Account>,
        cancel: CancellationToken,
    ) -> Result<ResponderSummary> {
        if accounts.is_empty() {
            return Err(OutreachError::InvalidInput(
                "responder needs at least one account".to_string(),
            ));
        }

        let started = Instant::now();
        let account_count = accounts.len();
        info!(accounts = account_count, "Starting responder");

        let mut handles = Vec::new();
        for account in accounts {
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(poll_account(shared, account, cancel)));
        }

        let mut replied = 0usize;
        for handle in handles {
            replied += handle.await.map_err(|e| {
                OutreachError::InvalidInput(format!("poller task failed: {}", e))
            })?;
        }

        self.shared.events.emit(Event::ResponderStopped { replied });
        info!(replied, "Responder stopped");

        Ok(ResponderSummary {
            replied,
            accounts: account_count,
            duration: started.elapsed(),
        })
    }
}

async fn poll_account(
    shared: Arc<ResponderShared>,
    account: Account,
    cancel: CancellationToken,
) -> usize {
    let mut replied = 0usize;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let client = match shared.resolver.resolve(&account).await {
            Ok(client) => client,
            Err(e) => {
                warn!(account = %account.handle, "Poller stopping: {}", e);
                shared.events.emit(Event::ResponderAccountPaused {
                    account: account.handle.clone(),
                    reason: e.to_string(),
                });
                break;
            }
        };

        let threads = match shared
            .connector
            .recent_threads(&client, shared.threads_per_sweep)
            .await
        {
            Ok(threads) => threads,
            Err(e) => {
                warn!(account = %account.handle, "Inbox fetch failed: {}", e);
                Vec::new()
            }
        };

        for thread in threads {
            // An in-flight thread is always finished before stopping, but
            // the rest of the sweep is abandoned on shutdown
            if cancel.is_cancelled() {
                break;
            }
            let newest = match thread.newest() {
                Some(newest) => newest.clone(),
                None => continue,
            };
            if newest.sender == account.handle {
                continue;
            }
            if shared
                .state
                .last_answered(&account.handle, &thread.thread_id)
                .await
                .as_deref()
                == Some(newest.id.as_str())
            {
                continue;
            }

            let reply = shared.generator.reply_for(&thread).await;
            match shared
                .connector
                .send_reply(&client, &thread.thread_id, &reply)
                .await
            {
                Ok(SendOutcome::Success) => {
                    if let Err(e) = shared
                        .state
                        .mark_answered(&account.handle, &thread.thread_id, &newest.id)
                        .await
                    {
                        warn!(account = %account.handle, "Could not persist reply state: {}", e);
                    }
                    shared.events.emit(Event::ReplySent {
                        account: account.handle.clone(),
                        thread_id: thread.thread_id.clone(),
                    });
                    replied += 1;
                }
                Ok(other) => {
                    warn!(
                        account = %account.handle,
                        thread = %thread.thread_id,
                        "Reply not delivered: {:?}",
                        other
                    );
                }
                Err(e) => {
                    warn!(
                        account = %account.handle,
                        thread = %thread.thread_id,
                        "Reply failed: {}",
                        e
                    );
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.poll_interval) => {}
        }
    }

    replied
}
