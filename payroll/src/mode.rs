use std::sync::Arc;

use alloy::primitives::Address;
use payroll_types::{GatewayState, Mode, ModeSelection};
use tokio::sync::watch;
use tracing::{error, info};

/// The two payroll deployments the client can work with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Contracts {
    pub confidential: Address,
    pub fallback: Address,
}

impl Contracts {
    pub fn for_mode(&self, m: Mode) -> Address {
        match m {
            Mode::Privacy => self.confidential,
            Mode::Fallback => self.fallback,
        }
    }
}

/// Chooses between privacy and fallback mode.
///
/// In automatic mode the selection follows the gateway state: privacy while
/// the gateway is up, fallback otherwise. A manual choice switches automatic
/// mode off until it is explicitly switched on again.
#[derive(Debug, Clone)]
pub struct ModeSelector {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    selection: watch::Sender<ModeSelection>,
    gateway: watch::Receiver<GatewayState>,
    contracts: Contracts,
}

impl ModeSelector {
    /// Starts in automatic fallback mode. Call [`ModeSelector::reconcile`]
    /// once the gateway has been probed.
    pub fn new(gateway: watch::Receiver<GatewayState>, contracts: Contracts) -> Self {
        let (selection, _) = watch::channel(ModeSelection::default());
        Self {
            inner: Arc::new(Inner {
                selection,
                gateway,
                contracts,
            }),
        }
    }

    pub fn selection(&self) -> ModeSelection {
        *self.inner.selection.borrow()
    }

    pub fn mode(&self) -> Mode {
        self.selection().mode
    }

    pub fn subscribe(&self) -> watch::Receiver<ModeSelection> {
        self.inner.selection.subscribe()
    }

    pub fn contracts(&self) -> &Contracts {
        &self.inner.contracts
    }

    /// Address of the contract the current mode works with.
    pub fn active_contract(&self) -> Address {
        self.inner.contracts.for_mode(self.mode())
    }

    /// Align the mode with the current gateway state if in automatic mode.
    ///
    /// Returns `true` if the mode changed. Subscribers are only notified of
    /// actual changes.
    pub fn reconcile(&self) -> bool {
        let changed = self.update(|s, g| {
            if s.is_auto {
                s.mode = Mode::implied_by(g)
            }
        });
        if changed {
            info!(mode = %self.mode(), "mode switched automatically");
        }
        changed
    }

    /// Select `m` and turn automatic mode off.
    pub fn set_mode_manually(&self, m: Mode) {
        self.update(|s, _| {
            s.mode = m;
            s.is_auto = false;
        });
        info!(mode = %m, "mode set manually");
    }

    /// Turn automatic mode on or off.
    ///
    /// Turning it on aligns the mode with the gateway state right away.
    /// Turning it off keeps the current mode.
    pub fn set_auto_mode(&self, on: bool) {
        self.update(|s, g| {
            s.is_auto = on;
            if on {
                s.mode = Mode::implied_by(g)
            }
        });
        info!(auto = on, mode = %self.mode(), "automatic mode");
    }

    /// Apply `f` against one snapshot of the gateway state, publishing the
    /// result if it differs.
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ModeSelection, &GatewayState),
    {
        self.inner.selection.send_if_modified(|s| {
            let g = *self.inner.gateway.borrow();
            let before = *s;
            f(s, &g);
            if !s.is_consistent_with(&g) {
                error!(mode = %s.mode, gateway = %g.status, "mode does not follow gateway state");
                debug_assert!(false, "automatic mode out of sync: {s:?} vs {g:?}")
            }
            *s != before
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use alloy::primitives::Address;
    use payroll_types::{GatewayState, Mode};
    use tokio::sync::watch;

    use super::{Contracts, ModeSelector};

    fn contracts() -> Contracts {
        Contracts {
            confidential: Address::repeat_byte(0xaa),
            fallback: Address::repeat_byte(0xbb),
        }
    }

    fn selector() -> (watch::Sender<GatewayState>, ModeSelector) {
        let (tx, rx) = watch::channel(GatewayState::default());
        (tx, ModeSelector::new(rx, contracts()))
    }

    fn observe(tx: &watch::Sender<GatewayState>, up: bool) {
        tx.send_replace(GatewayState::observed(up, Instant::now()));
    }

    #[test]
    fn starts_in_automatic_fallback() {
        let (_tx, s) = selector();
        assert_eq!(s.mode(), Mode::Fallback);
        assert!(s.selection().is_auto);
        assert_eq!(s.active_contract(), contracts().fallback);
    }

    #[test]
    fn down_to_up_flips_once() {
        let (tx, s) = selector();
        let mut rx = s.subscribe();

        observe(&tx, false);
        assert!(!s.reconcile());
        assert!(!rx.has_changed().unwrap());

        observe(&tx, true);
        assert!(s.reconcile());
        assert!(!s.reconcile());
        assert_eq!(s.mode(), Mode::Privacy);
        assert_eq!(s.active_contract(), contracts().confidential);
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        // still up, just probing again
        tx.send_modify(|g| *g = g.checking());
        assert!(!s.reconcile());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(s.mode(), Mode::Privacy);
    }

    #[test]
    fn manual_choice_wins_until_auto_is_back() {
        let (tx, s) = selector();
        observe(&tx, true);
        s.reconcile();

        s.set_mode_manually(Mode::Fallback);
        assert!(!s.selection().is_auto);

        observe(&tx, false);
        assert!(!s.reconcile());
        observe(&tx, true);
        assert!(!s.reconcile());
        assert_eq!(s.mode(), Mode::Fallback);

        s.set_auto_mode(true);
        assert!(s.selection().is_auto);
        assert_eq!(s.mode(), Mode::Privacy);
    }

    #[test]
    fn leaving_auto_keeps_the_mode() {
        let (tx, s) = selector();
        observe(&tx, true);
        s.reconcile();

        s.set_auto_mode(false);
        assert_eq!(s.mode(), Mode::Privacy);
        assert!(!s.selection().is_auto);

        observe(&tx, false);
        assert!(!s.reconcile());
        assert_eq!(s.mode(), Mode::Privacy);
    }

    #[test]
    fn manual_privacy_while_down() {
        let (tx, s) = selector();
        observe(&tx, false);
        s.set_mode_manually(Mode::Privacy);
        assert_eq!(s.active_contract(), contracts().confidential);

        s.set_auto_mode(true);
        assert_eq!(s.mode(), Mode::Fallback);
    }
}
