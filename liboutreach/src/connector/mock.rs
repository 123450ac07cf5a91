//! Mock connector for testing and loopback runs
//!
//! This module provides a configurable mock connector that can script send
//! outcomes per target, record every call, simulate latency, and track
//! concurrency. It is available to all builds so the binaries can run in
//! loopback mode without platform credentials or network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::connector::{
    Connector, DecisionPort, FailureDecision, ThreadMessage, ThreadSnapshot,
};
use crate::error::Result;
use crate::session::ClientHandle;
use crate::types::{SendOutcome, Target};

/// A call observed by the mock connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub account: String,
    pub target: String,
    pub message: String,
}

#[derive(Default)]
struct MockState {
    /// Scripted outcomes per target; popped front-to-back so a target can
    /// fail once and then succeed
    scripts: HashMap<String, Vec<SendOutcome>>,
    sent: Vec<SentCall>,
    replies: Vec<SentCall>,
    threads: HashMap<String, Vec<ThreadSnapshot>>,
}

/// Scriptable connector
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        MockConnector {
            state: Arc::new(Mutex::new(MockState::default())),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mock that sleeps for `delay` inside every send
    pub fn with_delay(delay: Duration) -> Self {
        let mut mock = Self::new();
        mock.delay = delay;
        mock
    }

    /// Queue outcomes for a target; unscripted targets always succeed
    pub fn script(&self, target: &str, outcomes: Vec<SendOutcome>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(target.to_lowercase(), outcomes);
    }

    /// Set the threads an account's inbox will return
    pub fn set_threads(&self, account: &str, threads: Vec<ThreadSnapshot>) {
        let mut state = self.state.lock().unwrap();
        state.threads.insert(account.to_string(), threads);
    }

    pub fn sent_calls(&self) -> Vec<SentCall> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn reply_calls(&self) -> Vec<SentCall> {
        self.state.lock().unwrap().replies.clone()
    }

    /// Highest number of sends observed in flight at once
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, target: &str) -> SendOutcome {
        let mut state = self.state.lock().unwrap();
        match state.scripts.get_mut(&target.to_lowercase()) {
            Some(outcomes) if !outcomes.is_empty() => outcomes.remove(0),
            _ => SendOutcome::Success,
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn send_direct(
        &self,
        handle: &ClientHandle,
        target: &Target,
        message: &str,
    ) -> Result<SendOutcome> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let outcome = self.next_outcome(&target.0);
        {
            let mut state = self.state.lock().unwrap();
            state.sent.push(SentCall {
                account: handle.account.clone(),
                target: target.0.clone(),
                message: message.to_string(),
            });
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn recent_threads(
        &self,
        handle: &ClientHandle,
        limit: usize,
    ) -> Result<Vec<ThreadSnapshot>> {
        let state = self.state.lock().unwrap();
        let mut threads = state
            .threads
            .get(&handle.account)
            .cloned()
            .unwrap_or_default();
        threads.truncate(limit);
        Ok(threads)
    }

    async fn send_reply(
        &self,
        handle: &ClientHandle,
        thread_id: &str,
        message: &str,
    ) -> Result<SendOutcome> {
        let mut state = self.state.lock().unwrap();
        state.replies.push(SentCall {
            account: handle.account.clone(),
            target: thread_id.to_string(),
            message: message.to_string(),
        });
        Ok(SendOutcome::Success)
    }
}

/// Decision port with a fixed answer, recording each consultation
pub struct MockDecision {
    decision: FailureDecision,
    asked: Mutex<Vec<(String, String)>>,
}

impl MockDecision {
    pub fn always(decision: FailureDecision) -> Arc<Self> {
        Arc::new(MockDecision {
            decision,
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn consultations(&self) -> Vec<(String, String)> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionPort for MockDecision {
    async fn decide(&self, account: &str, reason: &str) -> FailureDecision {
        self.asked
            .lock()
            .unwrap()
            .push((account.to_string(), reason.to_string()));
        self.decision
    }
}

/// Convenience constructor for thread fixtures
pub fn thread(thread_id: &str, peer: &str, messages: &[(&str, &str, &str)]) -> ThreadSnapshot {
    ThreadSnapshot {
        thread_id: thread_id.to_string(),
        peer: peer.to_string(),
        messages: messages
            .iter()
            .map(|(id, sender, text)| ThreadMessage {
                id: id.to_string(),
                sender: sender.to_string(),
                text: text.to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(account: &str) -> ClientHandle {
        ClientHandle {
            account: account.to_string(),
            artifact: json!({}),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn test_unscripted_target_succeeds() {
        let mock = MockConnector::new();
        let outcome = mock
            .send_direct(&handle("ana"), &Target("bob".to_string()), "hi")
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Success);

        let calls = mock.sent_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].account, "ana");
        assert_eq!(calls[0].target, "bob");
    }

    #[tokio::test]
    async fn test_scripted_outcomes_pop_in_order() {
        let mock = MockConnector::new();
        mock.script(
            "bob",
            vec![SendOutcome::RateLimited, SendOutcome::Success],
        );

        let h = handle("ana");
        let t = Target("bob".to_string());
        assert_eq!(
            mock.send_direct(&h, &t, "hi").await.unwrap(),
            SendOutcome::RateLimited
        );
        assert_eq!(
            mock.send_direct(&h, &t, "hi").await.unwrap(),
            SendOutcome::Success
        );
        // Script exhausted, back to default
        assert_eq!(
            mock.send_direct(&h, &t, "hi").await.unwrap(),
            SendOutcome::Success
        );
    }

    #[tokio::test]
    async fn test_script_lookup_is_case_insensitive() {
        let mock = MockConnector::new();
        mock.script("Bob", vec![SendOutcome::PermanentTarget("gone".to_string())]);

        let outcome = mock
            .send_direct(&handle("ana"), &Target("bob".to_string()), "hi")
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::PermanentTarget(_)));
    }

    #[tokio::test]
    async fn test_concurrency_tracking() {
        let mock = MockConnector::with_delay(Duration::from_millis(30));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let mock = mock.clone();
            tasks.push(tokio::spawn(async move {
                mock.send_direct(
                    &handle("ana"),
                    &Target(format!("target{}", i)),
                    "hi",
                )
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(mock.max_concurrent_sends() >= 2);
        assert_eq!(mock.sent_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_threads_and_replies() {
        let mock = MockConnector::new();
        mock.set_threads(
            "ana",
            vec![thread("t1", "bob", &[("m1", "bob", "hey there")])],
        );

        let threads = mock.recent_threads(&handle("ana"), 10).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].newest().unwrap().text, "hey there");

        mock.send_reply(&handle("ana"), "t1", "hello!").await.unwrap();
        let replies = mock.reply_calls();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].target, "t1");
    }

    #[tokio::test]
    async fn test_thread_limit_respected() {
        let mock = MockConnector::new();
        mock.set_threads(
            "ana",
            vec![
                thread("t1", "bob", &[]),
                thread("t2", "carla", &[]),
                thread("t3", "dan", &[]),
            ],
        );

        let threads = mock.recent_threads(&handle("ana"), 2).await.unwrap();
        assert_eq!(threads.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_decision_records_consultations() {
        let decision = MockDecision::always(FailureDecision::ContinueWithoutAccount);
        assert_eq!(
            decision.decide("ana", "session expired").await,
            FailureDecision::ContinueWithoutAccount
        );
        assert_eq!(
            decision.consultations(),
            vec![("ana".to_string(), "session expired".to_string())]
        );
    }
}
