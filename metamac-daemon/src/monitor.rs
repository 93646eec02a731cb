//! Wires the daemon's outputs onto the processor's monitor seam.

use tracing::warn;

use metamac_core::{Monitor, ProtocolSuite, SlotObservation};

use crate::display::Display;
use crate::slotlog::SlotLogger;
use crate::telemetry::Telemetry;

pub struct DaemonMonitor {
    logger: Option<SlotLogger>,
    display: Option<Display>,
    telemetry: Option<Telemetry>,
    log_failed: bool,
}

impl DaemonMonitor {
    pub fn new(
        logger: Option<SlotLogger>,
        display: Option<Display>,
        telemetry: Option<Telemetry>,
    ) -> Self {
        Self {
            logger,
            display,
            telemetry,
            log_failed: false,
        }
    }
}

impl Monitor for DaemonMonitor {
    fn on_slot(&mut self, observation: &SlotObservation, suite: &ProtocolSuite, pcoll: f64) {
        if let Some(logger) = &mut self.logger
            && let Err(err) = logger.log(observation, suite, pcoll)
            && !self.log_failed
        {
            // Complain once, not once per slot.
            warn!(%err, "writing slot log failed");
            self.log_failed = true;
        }
    }

    fn on_tick(&mut self, suite: &ProtocolSuite, _pcoll: f64) {
        if let Some(display) = &mut self.display {
            display.show(suite);
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.send(suite);
        }
    }

    fn on_shutdown(&mut self, _suite: &ProtocolSuite) {
        if let Some(logger) = &mut self.logger
            && let Err(err) = logger.flush()
        {
            warn!(%err, "flushing slot log failed");
        }
    }
}
