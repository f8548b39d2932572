use std::fmt;

use serde::{Deserialize, Serialize};

use crate::GatewayState;

/// Contract configuration the client operates against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Confidential values, decrypted through the gateway.
    Privacy,
    /// Plain values, used while the gateway is unreachable.
    Fallback,
}

impl Mode {
    /// The mode automatic selection derives from a gateway state.
    ///
    /// Without any definitive probe result the gateway counts as unreachable.
    pub fn implied_by(state: &GatewayState) -> Self {
        if state.is_up() {
            Self::Privacy
        } else {
            Self::Fallback
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Privacy => f.write_str("privacy"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSelection {
    pub mode: Mode,
    pub is_auto: bool,
}

impl Default for ModeSelection {
    fn default() -> Self {
        Self {
            mode: Mode::Fallback,
            is_auto: true,
        }
    }
}

impl ModeSelection {
    /// `is_auto` implies `mode` is a function of the gateway state.
    pub fn is_consistent_with(&self, state: &GatewayState) -> bool {
        !self.is_auto || self.mode == Mode::implied_by(state)
    }
}
