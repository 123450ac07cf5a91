//! Sticky proxy assignment
//!
//! Accounts that carry a proxy template get a per-account binding: the
//! `{session}` placeholder in the template is replaced with a generated
//! session id, the egress is probed for reachability, and the binding is
//! pinned until its sticky window expires. Rebinding mints a fresh session
//! id, which rotates the egress IP on session-aware proxy providers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ProxyError, Result};
use crate::types::ConnectivityStatus;

const PROBE_URL: &str = "https://api.ipify.org";

/// An active proxy session pinned to one account
#[derive(Debug, Clone)]
pub struct ProxyBinding {
    /// Template with `{session}` substituted
    pub url: String,
    pub session_id: String,
    pub expires_at: Instant,
    /// Egress IP with the last octet masked
    pub masked_ip: String,
    pub latency: Duration,
}

impl ProxyBinding {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Reachability check against a candidate proxy URL
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// Returns the egress IP and round-trip latency on success
    async fn probe(&self, proxy_url: &str) -> Result<(String, Duration)>;
}

/// Probe that routes a small HTTP request through the candidate proxy
pub struct HttpProbe {
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        HttpProbe { timeout }
    }
}

#[async_trait]
impl ProxyProbe for HttpProbe {
    async fn probe(&self, proxy_url: &str) -> Result<(String, Duration)> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ProxyError::Unreachable(format!("invalid proxy url: {}", e)))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;

        let start = Instant::now();
        let response = client
            .get(PROBE_URL)
            .send()
            .await
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;
        let ip = response
            .text()
            .await
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;

        Ok((ip.trim().to_string(), start.elapsed()))
    }
}

/// Mask an IP for log output: last IPv4 octet becomes 'x', IPv6 keeps
/// only the first two groups.
pub fn mask_ip(ip: &str) -> String {
    if ip.is_empty() {
        return String::new();
    }
    if ip.contains(':') {
        let parts: Vec<&str> = ip.split(':').collect();
        if parts.len() > 2 {
            return format!("{}:{}:...", parts[0], parts[1]);
        }
        return ip.to_string();
    }
    let blocks: Vec<&str> = ip.split('.').collect();
    if blocks.len() == 4 {
        return format!("{}.{}.{}.x", blocks[0], blocks[1], blocks[2]);
    }
    ip.to_string()
}

fn generate_session_id(account: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", account, &suffix[..8])
}

/// Manages sticky proxy bindings per account
pub struct ProxyAssigner {
    probe: Arc<dyn ProxyProbe>,
    sticky: Duration,
    /// When false, a failed probe falls back to a direct connection
    required: bool,
    events: Option<crate::events::EventBus>,
    bindings: Arc<Mutex<HashMap<String, ProxyBinding>>>,
}

impl ProxyAssigner {
    pub fn new(probe: Arc<dyn ProxyProbe>, sticky: Duration, required: bool) -> Self {
        ProxyAssigner {
            probe,
            sticky,
            required,
            events: None,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach an event bus for fallback notifications
    pub fn with_events(mut self, events: crate::events::EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Return the live binding for `account`, creating or rotating one
    /// from `template` if none exists or the old one expired.
    ///
    /// Returns Ok(None) when the account has no proxy template, or when the
    /// probe fails and proxies are not required (direct-connection fallback).
    /// With proxies required a probe failure surfaces as ProxyError and
    /// leaves no binding behind.
    pub async fn ensure_binding(
        &self,
        account: &str,
        template: Option<&str>,
    ) -> Result<Option<ProxyBinding>> {
        let template = match template {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return Ok(None),
        };

        {
            let bindings = self.bindings.lock().await;
            if let Some(existing) = bindings.get(account) {
                if !existing.is_expired() {
                    return Ok(Some(existing.clone()));
                }
            }
        }

        let session_id = generate_session_id(account);
        let url = template.replace("{session}", &session_id);
        let (ip, latency) = match self.probe.probe(&url).await {
            Ok(probed) => probed,
            Err(e) if !self.required => {
                warn!(account, error = %e, "Proxy probe failed, using direct connection");
                if let Some(events) = &self.events {
                    events.emit(crate::events::Event::ProxyFallback {
                        account: account.to_string(),
                        reason: e.to_string(),
                    });
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let masked_ip = mask_ip(&ip);

        let binding = ProxyBinding {
            url,
            session_id,
            expires_at: Instant::now() + self.sticky,
            masked_ip: masked_ip.clone(),
            latency,
        };

        info!(
            account,
            ip = %masked_ip,
            latency_ms = latency.as_millis() as u64,
            sticky_secs = self.sticky.as_secs(),
            "Proxy bound"
        );

        let mut bindings = self.bindings.lock().await;
        bindings.insert(account.to_string(), binding.clone());
        Ok(Some(binding))
    }

    /// Drop an account's binding after a mid-send proxy failure, so the
    /// next ensure_binding call mints a fresh session id. The dispatch
    /// engine reaches this through `SessionResolver::discard_proxy` when a
    /// proxied account exhausts its network retries.
    pub async fn record_failure(&self, account: &str, detail: &str) {
        let mut bindings = self.bindings.lock().await;
        if bindings.remove(account).is_some() {
            warn!(account, detail, "Proxy binding dropped after failure");
        }
    }

    /// Probe a template once without storing a binding, for setup checks
    pub async fn test_template(&self, template: &str) -> ConnectivityStatus {
        let session_id = generate_session_id("test");
        let url = template.replace("{session}", &session_id);
        match self.probe.probe(&url).await {
            Ok((ip, _)) => ConnectivityStatus::Reachable(mask_ip(&ip)),
            Err(e) => ConnectivityStatus::Unreachable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProbe {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeProbe {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(FakeProbe {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ProxyProbe for FakeProbe {
        async fn probe(&self, _proxy_url: &str) -> Result<(String, Duration)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProxyError::Unreachable("connect timeout".to_string()).into());
            }
            Ok(("203.0.113.7".to_string(), Duration::from_millis(120)))
        }
    }

    #[test]
    fn test_mask_ip_v4() {
        assert_eq!(mask_ip("203.0.113.7"), "203.0.113.x");
    }

    #[test]
    fn test_mask_ip_v6() {
        assert_eq!(mask_ip("2001:db8:85a3:0:0:8a2e:370:7334"), "2001:db8:...");
    }

    #[test]
    fn test_mask_ip_odd_shapes() {
        assert_eq!(mask_ip(""), "");
        assert_eq!(mask_ip("localhost"), "localhost");
    }

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id("ana");
        assert!(id.starts_with("ana-"));
        assert_eq!(id.len(), "ana-".len() + 8);

        // Fresh ids every time
        assert_ne!(generate_session_id("ana"), generate_session_id("ana"));
    }

    #[tokio::test]
    async fn test_no_template_yields_no_binding() {
        let assigner = ProxyAssigner::new(FakeProbe::new(false), Duration::from_secs(600), true);
        assert!(assigner.ensure_binding("ana", None).await.unwrap().is_none());
        assert!(assigner
            .ensure_binding("ana", Some("  "))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_binding_substitutes_session_placeholder() {
        let probe = FakeProbe::new(false);
        let assigner = ProxyAssigner::new(probe, Duration::from_secs(600), true);

        let binding = assigner
            .ensure_binding("ana", Some("http://user-{session}:pw@gw.example:7777"))
            .await
            .unwrap()
            .unwrap();

        assert!(!binding.url.contains("{session}"));
        assert!(binding.url.contains(&binding.session_id));
        assert_eq!(binding.masked_ip, "203.0.113.x");
    }

    #[tokio::test]
    async fn test_binding_is_sticky_until_expiry() {
        let probe = FakeProbe::new(false);
        let assigner = ProxyAssigner::new(probe.clone(), Duration::from_secs(600), true);

        let first = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await
            .unwrap()
            .unwrap();
        let second = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_binding_rotates_session() {
        let probe = FakeProbe::new(false);
        let assigner = ProxyAssigner::new(probe.clone(), Duration::from_secs(60), true);

        let first = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let second = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await
            .unwrap()
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_failure_leaves_no_binding() {
        let assigner = ProxyAssigner::new(FakeProbe::new(true), Duration::from_secs(600), true);

        let result = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await;
        assert!(result.is_err());

        // Switching to a working probe would rebind; here just check the
        // failed attempt did not pin anything.
        assigner.record_failure("ana", "connect timeout").await;
    }

    #[tokio::test]
    async fn test_optional_proxy_falls_back_to_direct() {
        let events = crate::events::EventBus::new(10);
        let mut receiver = events.subscribe();
        let assigner = ProxyAssigner::new(FakeProbe::new(true), Duration::from_secs(600), false)
            .with_events(events);

        let binding = assigner
            .ensure_binding("ana", Some("http://gw.example:7777/{session}"))
            .await
            .unwrap();
        assert!(binding.is_none());

        match receiver.recv().await.unwrap() {
            crate::events::Event::ProxyFallback { account, .. } => {
                assert_eq!(account, "ana");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_failure_forces_rebind() {
        let probe = FakeProbe::new(false);
        let assigner = ProxyAssigner::new(probe.clone(), Duration::from_secs(600), true);
        let template = Some("http://gw.example:7777/{session}");

        let first = assigner.ensure_binding("ana", template).await.unwrap().unwrap();
        assigner.record_failure("ana", "tunnel reset").await;
        let second = assigner.ensure_binding("ana", template).await.unwrap().unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_test_template_reports_status() {
        let assigner = ProxyAssigner::new(FakeProbe::new(false), Duration::from_secs(600), true);
        match assigner.test_template("http://gw.example:7777/{session}").await {
            ConnectivityStatus::Reachable(ip) => assert_eq!(ip, "203.0.113.x"),
            other => panic!("unexpected status: {:?}", other),
        }

        let failing = ProxyAssigner::new(FakeProbe::new(true), Duration::from_secs(600), true);
        assert!(matches!(
            failing.test_template("http://gw.example:7777/{session}").await,
            ConnectivityStatus::Unreachable(_)
        ));
    }
}
