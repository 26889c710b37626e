//! Display power state control.
//!
//! Two states only. Rail ordering is fixed by the panel electronics: the
//! primary display rail comes up before the VCOM gate rail, and down in
//! reverse. Deferred power-down timing lives with the worker; this type
//! only owns the rails and the current state.

use update_protocol::PowerRail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

pub struct PowerManager {
    state: PowerState,
    display_rail: Box<dyn PowerRail>,
    vcom_rail: Box<dyn PowerRail>,
}

impl PowerManager {
    pub fn new(display_rail: Box<dyn PowerRail>, vcom_rail: Box<dyn PowerRail>) -> Self {
        Self {
            state: PowerState::Off,
            display_rail,
            vcom_rail,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == PowerState::On
    }

    /// Idempotent. Display rail first, then the VCOM gate.
    pub fn power_up(&mut self) {
        if self.state == PowerState::On {
            return;
        }
        self.display_rail.enable();
        self.vcom_rail.enable();
        self.state = PowerState::On;
        log::debug!("display power up");
    }

    /// Idempotent. VCOM gate first, then the display rail.
    pub fn power_down(&mut self) {
        if self.state == PowerState::Off {
            return;
        }
        self.vcom_rail.disable();
        self.display_rail.disable();
        self.state = PowerState::Off;
        log::debug!("display power down");
    }
}
