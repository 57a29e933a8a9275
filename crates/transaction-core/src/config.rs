//! Timer and session configuration
//!
//! Durations are serialized as integer milliseconds, so a configuration
//! file reads `t1 = 500` rather than a nested duration table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// RFC 3261 timer values.
///
/// Only the base values are configurable; the lettered timers are derived
/// from them (RFC 3261, Table 4). Timers that absorb retransmissions are
/// zero on reliable transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// **T1: RTT estimate (default 500 ms).** Initial retransmission interval.
    #[serde(with = "duration_ms")]
    pub t1: Duration,

    /// **T2: retransmission cap (default 4 s)** for non-INVITE requests and
    /// INVITE final responses.
    #[serde(with = "duration_ms")]
    pub t2: Duration,

    /// **T4: maximum network lifetime of a message (default 5 s).**
    #[serde(with = "duration_ms")]
    pub t4: Duration,

    /// **Timer D (default 32 s).** How long a client INVITE transaction
    /// absorbs retransmitted non-2xx finals over unreliable transports.
    #[serde(with = "duration_ms")]
    pub td: Duration,

    /// Ceiling for INVITE transactions still waiting for a final response
    /// (default 180 s).
    #[serde(with = "duration_ms")]
    pub invite_ceiling: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            td: Duration::from_secs(32),
            invite_ceiling: Duration::from_secs(180),
        }
    }
}

impl TimerSettings {
    /// 64*T1, the standard transaction timeout
    pub fn timeout(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_a(&self) -> Duration {
        self.t1
    }

    pub fn timer_b(&self) -> Duration {
        self.timeout()
    }

    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.td
        }
    }

    pub fn timer_e(&self) -> Duration {
        self.t1
    }

    pub fn timer_f(&self) -> Duration {
        self.timeout()
    }

    pub fn timer_g(&self) -> Duration {
        self.t1
    }

    pub fn timer_h(&self) -> Duration {
        self.timeout()
    }

    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.timeout()
        }
    }

    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer L (RFC 6026): server INVITE lingers in Accepted
    pub fn timer_l(&self) -> Duration {
        self.timeout()
    }

    /// Timer M (RFC 6026): client INVITE lingers in Accepted
    pub fn timer_m(&self) -> Duration {
        self.timeout()
    }

    /// Next retransmission interval after `current`, capped at T2
    pub fn backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.t2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.t1.is_zero() || self.t2.is_zero() || self.t4.is_zero() {
            return Err(Error::Config("SIP timers must be positive".to_string()));
        }
        if self.t2 < self.t1 {
            return Err(Error::Config(format!(
                "T2 ({:?}) must not be smaller than T1 ({:?})",
                self.t2, self.t1
            )));
        }
        if self.invite_ceiling < self.timeout() {
            return Err(Error::Config(format!(
                "INVITE ceiling ({:?}) must be at least 64*T1 ({:?})",
                self.invite_ceiling,
                self.timeout()
            )));
        }
        Ok(())
    }
}

/// Call session scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay before retrying timers of a session that was busy when they fell due
    #[serde(with = "duration_ms")]
    pub busy_retry: Duration,

    /// Expired timers run inline when a scope is released, at most this many
    pub max_timers_per_release: usize,

    /// Queued jobs run inline when a scope is released, at most this many
    pub max_jobs_per_release: usize,

    /// Longest sleep of the global scheduler while its queue is empty
    #[serde(with = "duration_ms")]
    pub idle_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_retry: Duration::from_millis(100),
            max_timers_per_release: 64,
            max_jobs_per_release: 256,
            idle_wait: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_timers_per_release == 0 || self.max_jobs_per_release == 0 {
            return Err(Error::Config("Release caps must be at least 1".to_string()));
        }
        if self.busy_retry.is_zero() {
            return Err(Error::Config("Busy retry delay must be positive".to_string()));
        }
        Ok(())
    }
}

/// Transaction layer configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub timers: TimerSettings,
    pub sessions: SessionConfig,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionConfig) -> Self {
        self.sessions = sessions;
        self
    }

    /// Override T1 only; derived timers follow
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.timers.t1 = t1;
        self
    }

    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.timers.t2 = t2;
        self
    }

    pub fn with_t4(mut self, t4: Duration) -> Self {
        self.timers.t4 = t4;
        self
    }

    pub fn with_invite_ceiling(mut self, ceiling: Duration) -> Self {
        self.timers.invite_ceiling = ceiling;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.timers.validate()?;
        self.sessions.validate()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_timers() {
        let timers = TimerSettings::default();
        assert_eq!(timers.timer_b(), Duration::from_secs(32));
        assert_eq!(timers.timer_d(false), Duration::from_secs(32));
        assert_eq!(timers.timer_d(true), Duration::ZERO);
        assert_eq!(timers.timer_i(false), Duration::from_secs(5));
        assert_eq!(timers.timer_j(true), Duration::ZERO);
        assert_eq!(timers.backoff(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(timers.backoff(Duration::from_secs(4)), Duration::from_secs(4));
    }

    #[test]
    fn test_validation() {
        assert!(TransactionConfig::default().validate().is_ok());
        let bad = TransactionConfig::new()
            .with_t1(Duration::from_secs(5))
            .with_t2(Duration::from_secs(1));
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let zero = TransactionConfig::new().with_t4(Duration::ZERO);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_millisecond_encoding() {
        let config = TransactionConfig::new().with_t1(Duration::from_millis(250));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["timers"]["t1"], 250);
        assert_eq!(json["sessions"]["busy_retry"], 100);

        let parsed: TransactionConfig =
            serde_json::from_str(r#"{"timers":{"t1":100,"invite_ceiling":200000}}"#).unwrap();
        assert_eq!(parsed.timers.t1, Duration::from_millis(100));
        assert_eq!(parsed.timers.t2, Duration::from_secs(4));
        assert_eq!(parsed.sessions, SessionConfig::default());
    }
}
