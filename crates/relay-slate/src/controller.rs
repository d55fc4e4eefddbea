use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Coarse classification of an upstream failure, used only to decide
/// whether it counts toward the fallback threshold; the relay's broader
/// error-kind taxonomy (transient vs fatal, retried vs not) lives with the
/// session, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionReset,
    HttpClientError(u16),
    HttpServerError(u16),
    InvalidData,
}

impl ErrorKind {
    /// Classifies a raw upstream error message by simple substring
    /// matching, the way a log-scraping health check would.
    pub fn classify_message(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("connection reset") || lower.contains("connection refused") {
            Some(ErrorKind::ConnectionReset)
        } else if lower.contains("invalid data") || lower.contains("malformed") {
            Some(ErrorKind::InvalidData)
        } else {
            None
        }
    }

    pub fn classify_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(ErrorKind::HttpClientError(status)),
            500..=599 => Some(ErrorKind::HttpServerError(status)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackConfig {
    pub consecutive_error_threshold: u32,
    pub recovery_attempt_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            consecutive_error_threshold: 5,
            recovery_attempt_interval: Duration::from_secs(5),
        }
    }
}

/// Tracks consecutive upstream failures for one session and decides when
/// to switch to (and recover from) the fallback slate.
///
/// Grounded on `relay_breaker::CircuitBreaker`'s lazily-observed state
/// transition shape, simplified to two states since there is no half-open
/// recovery probe here: recovery is driven by the session's own next
/// upstream attempt, not by this controller.
pub struct FallbackController {
    config: FallbackConfig,
    state: FallbackState,
    consecutive_errors: u32,
    last_recovery_attempt: Option<Instant>,
}

impl FallbackController {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            state: FallbackState::Live,
            consecutive_errors: 0,
            last_recovery_attempt: None,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        if self.state == FallbackState::Fallback {
            self.state = FallbackState::Live;
            info!("session recovered, exiting fallback");
        }
    }

    pub fn record_failure(&mut self, kind: ErrorKind) {
        self.consecutive_errors += 1;
        if self.state == FallbackState::Live
            && self.consecutive_errors >= self.config.consecutive_error_threshold
        {
            self.state = FallbackState::Fallback;
            self.last_recovery_attempt = Some(Instant::now());
            warn!(?kind, consecutive_errors = self.consecutive_errors, "entering fallback");
        }
    }

    /// Whether the session should retry the real upstream right now. Only
    /// meaningful while in `Fallback`; always `false` while `Live`.
    pub fn should_attempt_recovery(&mut self) -> bool {
        if self.state != FallbackState::Fallback {
            return false;
        }
        let elapsed_ok = self
            .last_recovery_attempt
            .is_none_or(|t| t.elapsed() >= self.config.recovery_attempt_interval);
        if elapsed_ok {
            self.last_recovery_attempt = Some(Instant::now());
        }
        elapsed_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message_connection_reset() {
        assert_eq!(
            ErrorKind::classify_message("Connection reset by peer"),
            Some(ErrorKind::ConnectionReset)
        );
    }

    #[test]
    fn test_classify_status_ranges() {
        assert_eq!(ErrorKind::classify_status(503), Some(ErrorKind::HttpServerError(503)));
        assert_eq!(ErrorKind::classify_status(404), Some(ErrorKind::HttpClientError(404)));
        assert_eq!(ErrorKind::classify_status(200), None);
    }

    #[test]
    fn test_enters_fallback_at_threshold() {
        let mut controller = FallbackController::new(FallbackConfig {
            consecutive_error_threshold: 3,
            recovery_attempt_interval: Duration::from_secs(1),
        });
        controller.record_failure(ErrorKind::ConnectionReset);
        controller.record_failure(ErrorKind::ConnectionReset);
        assert_eq!(controller.state(), FallbackState::Live);
        controller.record_failure(ErrorKind::ConnectionReset);
        assert_eq!(controller.state(), FallbackState::Fallback);
    }

    #[test]
    fn test_success_resets_counter_and_exits_fallback() {
        let mut controller = FallbackController::new(FallbackConfig {
            consecutive_error_threshold: 2,
            recovery_attempt_interval: Duration::from_secs(1),
        });
        controller.record_failure(ErrorKind::InvalidData);
        controller.record_failure(ErrorKind::InvalidData);
        assert_eq!(controller.state(), FallbackState::Fallback);
        controller.record_success();
        assert_eq!(controller.state(), FallbackState::Live);
        assert_eq!(controller.consecutive_errors, 0);
    }

    #[test]
    fn test_recovery_attempt_gated_by_interval() {
        let mut controller = FallbackController::new(FallbackConfig {
            consecutive_error_threshold: 1,
            recovery_attempt_interval: Duration::from_millis(50),
        });
        controller.record_failure(ErrorKind::ConnectionReset);
        assert!(!controller.should_attempt_recovery());
        std::thread::sleep(Duration::from_millis(60));
        assert!(controller.should_attempt_recovery());
    }
}
