//! Connection Policy
//!
//! Recognized options for one supervised connection: the ordered transport
//! preference list, whether to reconnect after an unexpected drop, and the
//! reconnection budget. Timing knobs for the backoff and the handshake live
//! here too.
//!
//! The whole policy is forwarded verbatim to the connector on every attempt,
//! so it derives `Serialize`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Transport kinds, in the order they are usually preferred
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent bidirectional stream
    #[serde(alias = "ws")]
    WebSocket,
    /// Repeated HTTP long-polling requests
    #[serde(alias = "poll")]
    Polling,
}

impl TransportKind {
    /// Canonical lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a transport name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport '{0}' (expected websocket, ws, polling or poll)")]
pub struct UnknownTransport(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

/// Parse a comma separated transport list such as `"ws,poll"`
///
/// # Errors
///
/// Returns the first unrecognized name.
pub fn parse_transport_list(list: &str) -> Result<Vec<TransportKind>, UnknownTransport> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TransportKind::from_str)
        .collect()
}

/// Connection policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    /// Transports to attempt, most preferred first
    pub transports: Vec<TransportKind>,

    /// Whether to retry automatically after an unexpected drop
    pub reconnection: bool,

    /// Bound on automatic retries before giving up
    pub max_reconnection_attempts: u32,

    /// Base delay before the first retry, in milliseconds
    pub reconnection_delay_ms: u64,

    /// Upper bound for any retry delay, in milliseconds
    pub reconnection_delay_max_ms: u64,

    /// Jitter applied to retry delays, in `[0, 1]`
    pub randomization_factor: f64,

    /// How long a single handshake may take, in milliseconds
    pub handshake_timeout_ms: u64,

    /// Inbound silence after which an open link counts as dropped (0 = never)
    pub ping_timeout_ms: u64,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnection: true,
            max_reconnection_attempts: 5,
            reconnection_delay_ms: 1000,
            reconnection_delay_max_ms: 5000,
            randomization_factor: 0.5,
            handshake_timeout_ms: 20_000,
            ping_timeout_ms: 45_000,
        }
    }
}

impl ConnectionPolicy {
    /// Default policy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport preference list
    #[must_use]
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportKind>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    /// Enable or disable automatic reconnection
    #[must_use]
    pub fn with_reconnection(mut self, reconnection: bool) -> Self {
        self.reconnection = reconnection;
        self
    }

    /// Set the reconnection budget
    #[must_use]
    pub fn with_max_reconnection_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnection_attempts = attempts;
        self
    }

    /// Set base and maximum retry delays
    #[must_use]
    pub fn with_reconnection_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnection_delay_ms = duration_ms(base);
        self.reconnection_delay_max_ms = duration_ms(max);
        self
    }

    /// Set the jitter factor (clamped to `[0, 1]`)
    #[must_use]
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the ping timeout (`Duration::ZERO` disables it)
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = duration_ms(timeout);
        self
    }

    /// Policy with fast, jitter-free timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            reconnection_delay_ms: 10,
            reconnection_delay_max_ms: 50,
            randomization_factor: 0.0,
            handshake_timeout_ms: 1000,
            ping_timeout_ms: 0,
            ..Default::default()
        }
    }

    /// Handshake timeout as a `Duration`
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Ping timeout, or `None` when disabled
    #[must_use]
    pub fn ping_timeout(&self) -> Option<Duration> {
        (self.ping_timeout_ms > 0).then(|| Duration::from_millis(self.ping_timeout_ms))
    }

    /// Check the policy can drive a connection
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.transports.is_empty() {
            return Err("transport list is empty".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(format!(
                "randomization_factor must be within [0, 1], got {}",
                self.randomization_factor
            ));
        }
        if self.reconnection_delay_max_ms < self.reconnection_delay_ms {
            return Err(format!(
                "reconnection_delay_max_ms ({}) is below reconnection_delay_ms ({})",
                self.reconnection_delay_max_ms, self.reconnection_delay_ms
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), with fresh jitter
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.backoff_delay_with(attempt, sample)
    }

    /// Delay before retry number `attempt` for a given jitter sample in `[-1, 1]`
    ///
    /// `min(base * 2^(attempt-1), max)`, shifted by `sample * factor` of itself
    /// and clamped to `[0, max]`.
    #[must_use]
    pub fn backoff_delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = self
            .reconnection_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnection_delay_max_ms);

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = {
            let factor = self.randomization_factor.clamp(0.0, 1.0);
            let deviation = base as f64 * factor * sample.clamp(-1.0, 1.0);
            (base as f64 + deviation).max(0.0) as u64
        };

        Duration::from_millis(jittered.min(self.reconnection_delay_max_ms))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_policy() {
        let policy = ConnectionPolicy::default();
        assert_eq!(
            policy.transports,
            vec![TransportKind::WebSocket, TransportKind::Polling]
        );
        assert!(policy.reconnection);
        assert_eq!(policy.max_reconnection_attempts, 5);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_transport_aliases() {
        assert_eq!("ws".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert_eq!("Poll".parse::<TransportKind>(), Ok(TransportKind::Polling));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());

        let kinds: Vec<TransportKind> = serde_json::from_str(r#"["ws","polling"]"#).unwrap();
        assert_eq!(kinds, vec![TransportKind::WebSocket, TransportKind::Polling]);
        assert_eq!(
            serde_json::to_string(&TransportKind::WebSocket).unwrap(),
            "\"websocket\""
        );
    }

    #[test]
    fn test_parse_transport_list() {
        assert_eq!(
            parse_transport_list("poll, ws").unwrap(),
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
        assert_eq!(
            parse_transport_list("ws,smoke").unwrap_err(),
            UnknownTransport("smoke".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_empty_transports() {
        let policy = ConnectionPolicy::default().with_transports([]);
        assert!(policy.validate().unwrap_err().contains("empty"));
    }

    #[test]
    fn test_validate_rejects_zero_handshake_timeout() {
        let policy = ConnectionPolicy::default().with_handshake_timeout(Duration::ZERO);
        assert!(policy.validate().unwrap_err().contains("handshake_timeout_ms"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ConnectionPolicy::default().with_randomization_factor(0.0);
        assert_eq!(policy.backoff_delay_with(1, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay_with(2, 0.0), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay_with(3, 0.0), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay_with(4, 0.0), Duration::from_millis(5000));
        assert_eq!(policy.backoff_delay_with(60, 0.0), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = ConnectionPolicy::default();
        assert_eq!(policy.backoff_delay_with(1, -1.0), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay_with(1, 1.0), Duration::from_millis(1500));
        // Jitter never pushes past the cap
        assert_eq!(policy.backoff_delay_with(3, 1.0), Duration::from_millis(5000));

        for attempt in 1..10 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay <= Duration::from_millis(policy.reconnection_delay_max_ms));
        }
    }

    #[test]
    fn test_ping_timeout_disabled() {
        let policy = ConnectionPolicy::for_testing();
        assert!(policy.ping_timeout().is_none());
        let policy = policy.with_ping_timeout(Duration::from_secs(3));
        assert_eq!(policy.ping_timeout(), Some(Duration::from_secs(3)));
    }
}
