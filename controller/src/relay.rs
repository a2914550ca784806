//! Logging relay driver. Physical I/O is not wired on the host build.

use std::collections::HashMap;

use tracing::info;

use greenhouse_common::{EngineAction, Relay, WindowDirection};

pub struct RelayBoard {
    relays: HashMap<Relay, bool>,
    window: Option<WindowDirection>,
}

impl RelayBoard {
    pub fn new() -> Self {
        Self {
            relays: Relay::ALL.iter().map(|relay| (*relay, false)).collect(),
            window: None,
        }
    }

    pub fn is_on(&self, relay: Relay) -> bool {
        self.relays.get(&relay).copied().unwrap_or(false)
    }

    pub fn window_motion(&self) -> Option<WindowDirection> {
        self.window
    }

    fn set(&mut self, relay: Relay, on: bool) {
        let previous = self.relays.insert(relay, on);
        if previous != Some(on) {
            info!(
                "relay {} set {}",
                relay.as_str(),
                if on { "ON" } else { "OFF" }
            );
        }
    }

    pub fn apply(&mut self, action: &EngineAction) {
        match *action {
            EngineAction::Relay { relay, on } => self.set(relay, on),
            EngineAction::WindowMove {
                direction,
                duration_ms,
            } => {
                info!("window moving {} for {duration_ms} ms", direction.as_str());
                self.window = Some(direction);
            }
            EngineAction::WindowStop => {
                if self.window.take().is_some() {
                    info!("window stopped");
                }
            }
        }
    }

    /// Fail-safe used at boot and shutdown.
    pub fn all_off(&mut self) {
        for relay in Relay::ALL {
            self.set(relay, false);
        }
        self.apply(&EngineAction::WindowStop);
    }
}
