use crate::climate::UnitStatus;

/// Switch powering the air conditioner.
pub trait Relay: Send {
    fn on(&mut self);
    fn off(&mut self);
    fn is_on(&self) -> bool;

    fn apply(&mut self, status: UnitStatus) {
        if status.is_on() {
            self.on()
        } else {
            self.off()
        }
    }
}

/// Relay without hardware behind it, logging every transition.
#[derive(Debug, Default)]
pub struct LoggingRelay {
    on: bool,
    switches: usize,
}

impl LoggingRelay {
    pub fn new() -> LoggingRelay {
        LoggingRelay::default()
    }

    /// Number of times the relay changed state.
    pub fn switches(&self) -> usize {
        self.switches
    }

    fn switch(&mut self, on: bool) {
        if self.on != on {
            info!("relay switched {}", if on { "on" } else { "off" });
            self.switches += 1;
        }
        self.on = on;
    }
}

impl Relay for LoggingRelay {
    fn on(&mut self) {
        self.switch(true);
    }

    fn off(&mut self) {
        self.switch(false);
    }

    fn is_on(&self) -> bool {
        self.on
    }
}
