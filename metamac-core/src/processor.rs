//! The consumer loop: estimator updates, protocol reconciliation, and the
//! once-per-second display/telemetry tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::controller::CYCLE_INTERVAL;
use crate::device::Device;
use crate::error::MetamacError;
use crate::mailbox::{Command, CommandMailbox};
use crate::queue::SlotQueue;
use crate::slot::SlotObservation;
use crate::suite::ProtocolSuite;

/// The seam through which the application observes the pipeline: one call
/// per consumed observation and one per display tick. The daemon hangs
/// CSV logging, the console display and UDP telemetry off this.
pub trait Monitor {
    /// An observation was scored. `pcoll` is the collision ratio as of
    /// the most recent tick.
    fn on_slot(&mut self, _observation: &SlotObservation, _suite: &ProtocolSuite, _pcoll: f64) {}

    /// The per-second tick fired.
    fn on_tick(&mut self, _suite: &ProtocolSuite, _pcoll: f64) {}

    /// The loop is exiting; flush buffers.
    fn on_shutdown(&mut self, _suite: &ProtocolSuite) {}
}

/// Tuning of the processor loop.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// Never write to the device.
    pub readonly: bool,
    /// Maximum observations consumed per iteration.
    pub batch_size: usize,
    /// Display/telemetry cadence, and the cycle-mode rotation interval.
    pub tick: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            batch_size: 16,
            tick: CYCLE_INTERVAL,
        }
    }
}

/// The consumer half of the pipeline. Sole owner of the protocol suite
/// and sole writer of device bytecode.
pub struct Processor<D, M> {
    queue: Arc<SlotQueue>,
    device: Arc<D>,
    suite: ProtocolSuite,
    mailbox: CommandMailbox,
    monitor: M,
    config: ProcessorConfig,
    stop: Arc<AtomicBool>,
    /// An external command pinned the active protocol; selection is
    /// suspended until a Learn command clears it.
    pinned: bool,
    transmitted: u64,
    succeeded: u64,
    transmitted_mark: u64,
    succeeded_mark: u64,
    pcoll: f64,
    last_tick: Instant,
}

impl<D: Device, M: Monitor> Processor<D, M> {
    /// Build a processor over an already-initialised suite.
    pub fn new(
        queue: Arc<SlotQueue>,
        device: Arc<D>,
        suite: ProtocolSuite,
        mailbox: CommandMailbox,
        monitor: M,
        config: ProcessorConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            device,
            suite,
            mailbox,
            monitor,
            config,
            stop,
            pinned: false,
            transmitted: 0,
            succeeded: 0,
            transmitted_mark: 0,
            succeeded_mark: 0,
            pcoll: 0.0,
            last_tick: Instant::now(),
        }
    }

    /// Consume observations until the stop flag is raised, then drain
    /// whatever the reader managed to push and flush the monitor.
    pub fn run(&mut self) -> Result<(), MetamacError> {
        let result = self.consume();
        if result.is_err() {
            self.stop.store(true, Ordering::Release);
        }

        // Drain the backlog so every observed slot is scored and logged
        // even when shutdown raced the reader's last push.
        loop {
            let batch = self.queue.pop_ready(self.config.batch_size);
            if batch.is_empty() {
                break;
            }
            for observation in &batch {
                self.score(observation);
            }
        }

        self.monitor.on_shutdown(&self.suite);
        result
    }

    /// Yield the suite back, e.g. to inspect final weights after a run.
    pub fn into_suite(self) -> ProtocolSuite {
        self.suite
    }

    fn consume(&mut self) -> Result<(), MetamacError> {
        while !self.stop.load(Ordering::Acquire) {
            self.apply_commands()?;

            let batch = self.queue.pop_many(self.config.batch_size);
            for observation in &batch {
                self.score(observation);
            }

            if !self.config.readonly && !self.pinned {
                self.suite.evaluate(&*self.device, self.config.tick)?;
            }

            if self.last_tick.elapsed() >= self.config.tick {
                self.tick();
            }
        }
        Ok(())
    }

    fn score(&mut self, observation: &SlotObservation) {
        self.suite.update_weights(observation);
        self.transmitted += observation.transmitted as u64;
        self.succeeded += observation.transmit_success as u64;
        self.monitor.on_slot(observation, &self.suite, self.pcoll);
    }

    fn apply_commands(&mut self) -> Result<(), MetamacError> {
        match self.mailbox.take() {
            None => {}
            Some(Command::Learn) => {
                if self.pinned {
                    info!("override cleared, resuming weight-driven selection");
                }
                self.pinned = false;
            }
            Some(Command::Pin(index)) if index < self.suite.len() => {
                info!(protocol = %self.suite.protocols()[index].name, "protocol pinned");
                self.pinned = true;
                self.suite.load_protocol(&*self.device, index)?;
            }
            Some(Command::Pin(index)) => {
                warn!(index, "pin command for unknown protocol ignored");
            }
        }
        Ok(())
    }

    fn tick(&mut self) {
        let attempts = self.transmitted - self.transmitted_mark;
        let successes = self.succeeded - self.succeeded_mark;
        if attempts > 0 {
            self.pcoll = 1.0 - successes as f64 / attempts as f64;
        }
        self.transmitted_mark = self.transmitted;
        self.succeeded_mark = self.succeeded;

        self.monitor.on_tick(&self.suite, self.pcoll);
        self.last_tick = Instant::now();
    }
}
