//! Campaign dispatch engine
//!
//! Runs one worker task per active account against a shared FIFO target
//! queue. Each worker resolves its session, then cycles through
//! waiting-for-slot, sending, and cooling-down until the queue or its
//! per-account budget is exhausted. Auth-class failures stop the worker at
//! an operator decision point instead of silently dropping the account.
//!
//! A target is never re-enqueued once dequeued: retryable outcomes are
//! retried locally on the same target, bounded by the configured attempt
//! count, and then recorded as failed.

use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connector::{Connector, DecisionPort, FailureDecision};
use crate::error::{OutreachError, Result};
use crate::events::{Event, EventBus};
use crate::governor::RateGovernor;
use crate::ledger::ContactLedger;
use crate::session::SessionResolver;
use crate::types::{Account, SendOutcome, SendRecord, Target, WorkerState};

/// One campaign run: who sends, to whom, saying what
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    pub accounts: Vec<Account>,
    pub targets: Vec<Target>,
    /// Message templates; one is picked at random per send
    pub messages: Vec<String>,
    /// Successful sends allowed per account in this run
    pub max_per_account: Option<usize>,
}

/// Per-account outcome of a campaign
#[derive(Debug, Clone)]
pub struct AccountReport {
    pub account: String,
    pub sent: usize,
    pub failed: usize,
    pub final_state: WorkerState,
}

/// What a campaign run produced
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub reports: Vec<AccountReport>,
    pub sent: usize,
    pub failed: usize,
    pub paused: bool,
    pub duration: Duration,
}

struct Shared {
    resolver: SessionResolver,
    connector: Arc<dyn Connector>,
    decisions: Arc<dyn DecisionPort>,
    ledger: ContactLedger,
    governor: RateGovernor,
    events: EventBus,
    queue: Mutex<VecDeque<Target>>,
    messages: Vec<String>,
    max_per_account: Option<usize>,
    retry_attempts: u32,
    /// Child of the run's cancel token; tripped by Pause decisions and
    /// ledger failures
    pause: CancellationToken,
}

impl Shared {
    fn transition(&self, account: &str, state: WorkerState) {
        self.events.emit(Event::WorkerTransition {
            account: account.to_string(),
            state,
        });
    }

    async fn dequeue(&self) -> Option<Target> {
        self.queue.lock().await.pop_front()
    }

    fn pick_message(&self) -> String {
        // thread_rng is not held across an await
        self.messages
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Append to the ledger; a write failure pauses the whole run
    async fn record(&self, record: SendRecord) -> bool {
        match self.ledger.record(&record).await {
            Ok(()) => {
                self.events.emit(Event::SendRecorded {
                    account: record.account,
                    target: record.target,
                    ok: record.ok,
                    detail: record.detail,
                });
                true
            }
            Err(e) => {
                error!("Ledger write failed, pausing campaign: {}", e);
                self.events.emit(Event::CampaignPaused {
                    reason: format!("ledger write failed: {}", e),
                });
                self.pause.cancel();
                false
            }
        }
    }

    /// Route a failure to the operator. Returns the worker's final state.
    async fn attention(&self, account: &str, reason: &str) -> WorkerState {
        warn!(account, reason, "Account needs attention");
        self.events.emit(Event::AttentionRequired {
            account: account.to_string(),
            reason: reason.to_string(),
        });
        match self.decisions.decide(account, reason).await {
            FailureDecision::ContinueWithoutAccount => {
                self.events.emit(Event::AccountSkipped {
                    account: account.to_string(),
                    reason: reason.to_string(),
                });
                WorkerState::Skipped
            }
            FailureDecision::PauseAll => {
                self.events.emit(Event::CampaignPaused {
                    reason: format!("@{}: {}", account, reason),
                });
                self.pause.cancel();
                WorkerState::Paused
            }
        }
    }
}

/// Orchestrates campaign runs
pub struct DispatchEngine {
    resolver: SessionResolver,
    connector: Arc<dyn Connector>,
    decisions: Arc<dyn DecisionPort>,
    ledger: ContactLedger,
    governor: RateGovernor,
    events: EventBus,
    retry_attempts: u32,
}

impl DispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: SessionResolver,
        connector: Arc<dyn Connector>,
        decisions: Arc<dyn DecisionPort>,
        ledger: ContactLedger,
        governor: RateGovernor,
        events: EventBus,
        retry_attempts: u32,
    ) -> Self {
        DispatchEngine {
            resolver,
            connector,
            decisions,
            ledger,
            governor,
            events,
            retry_attempts,
        }
    }

    /// Run a campaign to completion, pause, or cancellation
    ///
    /// In-flight sends always finish; cancellation is only observed between
    /// sends and during waits.
    pub async fn run(
        self,
        spec: CampaignSpec,
        cancel: CancellationToken,
    ) -> Result<CampaignSummary> {
        if spec.accounts.is_empty() {
            return Err(OutreachError::InvalidInput(
                "campaign needs at least one account".to_string(),
            ));
        }
        if spec.messages.iter().all(|m| m.trim().is_empty()) {
            return Err(OutreachError::InvalidInput(
                "campaign needs at least one message template".to_string(),
            ));
        }

        let pending = self.ledger.filter_pending(spec.targets).await;
        let accounts: Vec<String> = spec.accounts.iter().map(|a| a.handle.clone()).collect();
        info!(
            accounts = accounts.len(),
            pending = pending.len(),
            "Starting campaign"
        );
        self.events.emit(Event::CampaignStarted {
            accounts,
            pending: pending.len(),
        });

        let shared = Arc::new(Shared {
            resolver: self.resolver,
            connector: self.connector,
            decisions: self.decisions,
            ledger: self.ledger,
            governor: self.governor,
            events: self.events.clone(),
            queue: Mutex::new(pending.into()),
            messages: spec.messages,
            max_per_account: spec.max_per_account,
            retry_attempts: self.retry_attempts.max(1),
            pause: cancel.child_token(),
        });

        let started = Instant::now();
        let mut handles = Vec::new();
        for account in spec.accounts {
            handles.push(tokio::spawn(run_worker(Arc::clone(&shared), account)));
        }

        let mut reports = Vec::new();
        for handle in handles {
            // A panicked worker is a bug; surface it as an engine error
            let report = handle
                .await
                .map_err(|e| OutreachError::InvalidInput(format!("worker task failed: {}", e)))?;
            reports.push(report);
        }

        let sent = reports.iter().map(|r| r.sent).sum();
        let failed = reports.iter().map(|r| r.failed).sum();
        let paused = reports
            .iter()
            .any(|r| r.final_state == WorkerState::Paused);

        if !paused {
            self.events.emit(Event::CampaignCompleted { sent, failed });
        }
        info!(sent, failed, paused, "Campaign finished");

        Ok(CampaignSummary {
            reports,
            sent,
            failed,
            paused,
            duration: started.elapsed(),
        })
    }
}

async fn run_worker(shared: Arc<Shared>, account: Account) -> AccountReport {
    let governor = shared.governor.clone();
    let handle_name = account.handle.clone();
    let mut sent = 0usize;
    let mut failed = 0usize;

    let finish = |state: WorkerState, sent: usize, failed: usize| AccountReport {
        account: handle_name.clone(),
        sent,
        failed,
        final_state: state,
    };

    // A slot covers the whole turn: resolution, the send attempt, and the
    // cooldown all happen under one permit. The first permit is acquired
    // before resolving and carried into the first turn.
    shared.transition(&account.handle, WorkerState::WaitingForSlot);
    let first = tokio::select! {
        _ = shared.pause.cancelled() => {
            shared.transition(&account.handle, WorkerState::Paused);
            return finish(WorkerState::Paused, sent, failed);
        }
        permit = governor.acquire_slot() => permit,
    };

    shared.transition(&account.handle, WorkerState::Resolving);
    let client = match shared.resolver.resolve(&account).await {
        Ok(client) => client,
        // Session and sticky-proxy failures both stop at the decision
        // point; the operator chooses skip or pause, never the engine
        Err(e) => {
            let reason = match &e {
                OutreachError::Session(s) => s.to_string(),
                OutreachError::Proxy(p) => p.to_string(),
                other => {
                    error!(account = %account.handle, "Session resolution failed: {}", other);
                    other.to_string()
                }
            };
            drop(first);
            let state = shared.attention(&account.handle, &reason).await;
            shared.transition(&account.handle, state);
            return finish(state, sent, failed);
        }
    };
    let mut carried = Some(first);

    loop {
        if shared.pause.is_cancelled() {
            shared.transition(&account.handle, WorkerState::Paused);
            return finish(WorkerState::Paused, sent, failed);
        }
        if let Some(budget) = shared.max_per_account {
            if sent >= budget {
                info!(account = %account.handle, sent, "Send budget reached");
                break;
            }
        }

        let permit = match carried.take() {
            Some(permit) => permit,
            None => {
                shared.transition(&account.handle, WorkerState::WaitingForSlot);
                tokio::select! {
                    _ = shared.pause.cancelled() => {
                        shared.transition(&account.handle, WorkerState::Paused);
                        return finish(WorkerState::Paused, sent, failed);
                    }
                    permit = governor.acquire_slot() => permit,
                }
            }
        };

        // Residual throttle penalty from a previous turn
        tokio::select! {
            _ = shared.pause.cancelled() => {
                shared.transition(&account.handle, WorkerState::Paused);
                return finish(WorkerState::Paused, sent, failed);
            }
            _ = governor.wait_until_eligible(&account.handle) => {}
        }

        let target = match shared.dequeue().await {
            Some(target) => target,
            None => {
                shared.transition(&account.handle, WorkerState::Idle);
                break;
            }
        };
        // The queue was pre-filtered, but another account may have reached
        // this target through a concurrent run sharing the ledger
        if shared.ledger.already_contacted(&target).await {
            carried = Some(permit);
            continue;
        }

        shared.transition(&account.handle, WorkerState::Sending);

        let mut attempt = 1u32;
        let turn = loop {
            let message = shared.pick_message();
            let outcome = match shared.connector.send_direct(&client, &target, &message).await {
                Ok(outcome) => outcome,
                Err(e) => SendOutcome::TransientNetwork(e.to_string()),
            };

            match outcome {
                SendOutcome::Success => {
                    if !shared
                        .record(SendRecord::success(&account.handle, &target))
                        .await
                    {
                        break TurnEnd::Paused;
                    }
                    sent += 1;
                    break TurnEnd::Sent;
                }
                SendOutcome::PermanentTarget(detail) => {
                    if !shared
                        .record(SendRecord::failure(&account.handle, &target, detail))
                        .await
                    {
                        break TurnEnd::Paused;
                    }
                    failed += 1;
                    break TurnEnd::Failed;
                }
                SendOutcome::RateLimited => {
                    let penalty = governor.penalize(&account.handle).await;
                    if attempt >= shared.retry_attempts {
                        if !shared
                            .record(SendRecord::failure(
                                &account.handle,
                                &target,
                                "rate_limited",
                            ))
                            .await
                        {
                            break TurnEnd::Paused;
                        }
                        failed += 1;
                        break TurnEnd::Failed;
                    }
                    warn!(
                        account = %account.handle,
                        penalty_secs = penalty.as_secs(),
                        "Rate limited, backing off"
                    );
                    tokio::select! {
                        _ = shared.pause.cancelled() => break TurnEnd::Paused,
                        _ = tokio::time::sleep(penalty) => {}
                    }
                }
                SendOutcome::TransientNetwork(detail) => {
                    if attempt >= shared.retry_attempts {
                        // Repeated network failures through a tunnel suggest
                        // the exit is dead, not the target
                        if client.proxy.is_some() {
                            shared.resolver.discard_proxy(&account.handle, &detail).await;
                        }
                        if !shared
                            .record(SendRecord::failure(&account.handle, &target, detail))
                            .await
                        {
                            break TurnEnd::Paused;
                        }
                        failed += 1;
                        break TurnEnd::Failed;
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1).min(6));
                    warn!(
                        account = %account.handle,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "Transient send failure: {}",
                        detail
                    );
                    tokio::select! {
                        _ = shared.pause.cancelled() => break TurnEnd::Paused,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                outcome @ (SendOutcome::AuthRequired | SendOutcome::ChallengeRequired) => {
                    let reason = match outcome {
                        SendOutcome::ChallengeRequired => "verification challenge required",
                        _ => "authentication rejected mid-campaign",
                    };
                    if !shared
                        .record(SendRecord::failure(&account.handle, &target, reason))
                        .await
                    {
                        break TurnEnd::Paused;
                    }
                    failed += 1;
                    break TurnEnd::Attention(reason.to_string());
                }
            }
            attempt += 1;
        };

        match turn {
            TurnEnd::Sent | TurnEnd::Failed => {
                // The cooldown wait happens under the permit, so an account
                // mid-turn counts against the concurrency cap until its
                // delay has elapsed
                shared.transition(&account.handle, WorkerState::CoolingDown);
                governor.observe_send(&account.handle).await;
                tokio::select! {
                    _ = shared.pause.cancelled() => {
                        shared.transition(&account.handle, WorkerState::Paused);
                        return finish(WorkerState::Paused, sent, failed);
                    }
                    _ = governor.wait_until_eligible(&account.handle) => {}
                }
                shared.transition(&account.handle, WorkerState::Idle);
                drop(permit);
            }
            TurnEnd::Paused => {
                shared.transition(&account.handle, WorkerState::Paused);
                return finish(WorkerState::Paused, sent, failed);
            }
            TurnEnd::Attention(reason) => {
                // Release the slot before blocking on the operator so the
                // other workers keep moving while the decision is pending
                drop(permit);
                let state = shared.attention(&account.handle, &reason).await;
                shared.transition(&account.handle, state);
                return finish(state, sent, failed);
            }
        }
    }

    shared.transition(&account.handle, WorkerState::Idle);
    finish(WorkerState::Idle, sent, failed)
}

enum TurnEnd {
    Sent,
    Failed,
    Paused,
    Attention(String),
}
