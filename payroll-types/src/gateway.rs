use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Reachability of the decryption gateway.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayStatus {
    #[default]
    Checking,
    Up,
    Down,
}

impl From<bool> for GatewayStatus {
    fn from(up: bool) -> Self {
        if up { Self::Up } else { Self::Down }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checking => f.write_str("checking"),
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// The published gateway state.
///
/// `status` is `Checking` while a probe is in flight. `up` holds the last
/// definitive probe result and `as_of` the time it was taken.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct GatewayState {
    pub status: GatewayStatus,
    pub up: Option<bool>,
    pub as_of: Option<Instant>,
}

impl GatewayState {
    pub fn observed(up: bool, at: Instant) -> Self {
        Self {
            status: up.into(),
            up: Some(up),
            as_of: Some(at),
        }
    }

    /// Enter `Checking`, keeping the last definitive result.
    pub fn checking(self) -> Self {
        Self {
            status: GatewayStatus::Checking,
            ..self
        }
    }

    pub fn is_up(&self) -> bool {
        self.up == Some(true)
    }

    /// Is the last definitive result older than `max_age` (or missing)?
    pub fn is_stale(&self, now: Instant, max_age: std::time::Duration) -> bool {
        self.as_of
            .map(|t| now.saturating_duration_since(t) > max_age)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{GatewayState, GatewayStatus};

    #[test]
    fn checking_keeps_last_result() {
        let now = Instant::now();
        let s = GatewayState::observed(true, now).checking();
        assert_eq!(s.status, GatewayStatus::Checking);
        assert!(s.is_up());
        assert_eq!(s.as_of, Some(now));
    }

    #[test]
    fn staleness() {
        let now = Instant::now();
        assert!(GatewayState::default().is_stale(now, Duration::from_secs(60)));
        let s = GatewayState::observed(false, now);
        assert!(!s.is_stale(now, Duration::from_secs(60)));
        assert!(s.is_stale(now + Duration::from_secs(61), Duration::from_secs(60)));
    }
}
