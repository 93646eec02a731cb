//! The soft-realtime producer.
//!
//! The device only exposes a 3-bit slot counter and a rolling 8-slot
//! feedback window, so the reader has to poll faster than the window
//! advances, work out how many slots really elapsed between two polls
//! (the counter alone is ambiguous mod 8), and emit one observation per
//! elapsed slot, with filler records standing in for slots whose feedback
//! was already unreadable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::device::{
    BAD_RECEPTION, BUSY_SLOT, COUNT_SLOT, Device, MY_TRANSMISSION, OTHER_TRANSMISSION,
    PACKET_TO_TRANSMIT, RegisterBank, SUCCES_TRANSMISSION,
};
use crate::error::MetamacError;
use crate::metrics;
use crate::queue::SlotQueue;
use crate::slot::SlotObservation;
use crate::{DEFAULT_READ_INTERVAL_US, DEFAULT_SLOT_TIME_US};

/// TSF deltas beyond this are treated as hardware glitches and replaced
/// by the host-clock delta. An unresolved firmware/driver bug produces
/// occasional large jumps in the TSF counter.
const TSF_ANOMALY_MAX_US: i64 = 200_000;

/// Only the last seven slots of the 8-slot window ever carry trustworthy
/// feedback; the slot currently being written by the device is unstable.
const VALID_WINDOW: i64 = 7;

/// Tuning of the read loop.
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    /// Nominal slot duration in microseconds.
    pub slot_time: u32,
    /// Target interval between polls in microseconds.
    pub read_interval: u32,
    /// Include the carrier-sense `BUSY_SLOT` feedback in `channel_busy`.
    pub use_busy: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            slot_time: DEFAULT_SLOT_TIME_US,
            read_interval: DEFAULT_READ_INTERVAL_US,
            use_busy: false,
        }
    }
}

/// The producer half of the pipeline. Owns the register-read side of the
/// device handle; runs on a dedicated (ideally realtime) thread.
pub struct SlotReader<D> {
    device: Arc<D>,
    queue: Arc<SlotQueue>,
    config: ReaderConfig,
    stop: Arc<AtomicBool>,
    start: Instant,
    slot_num: u64,
    read_num: u64,
    tsf: u64,
    slot_index: u8,
    /// Host time at which the previous iteration finished, µs.
    loop_end: u64,
}

impl<D: Device> SlotReader<D> {
    /// Prime the reader: reads the initial TSF and slot index so the
    /// first loop iteration has a baseline to difference against.
    pub fn new(
        device: Arc<D>,
        queue: Arc<SlotQueue>,
        config: ReaderConfig,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, MetamacError> {
        let tsf = device.read_tsf()?;
        let slot_index = (device.read_reg16(RegisterBank::Regs, COUNT_SLOT)? & 0x7) as u8;

        Ok(Self {
            device,
            queue,
            config,
            stop,
            start: Instant::now(),
            slot_num: (slot_index as u64 + 1) % 8,
            read_num: 0,
            tsf,
            slot_index,
            loop_end: 0,
        })
    }

    /// Poll until the stop flag is raised, then signal the queue so the
    /// consumer wakes and drains.
    ///
    /// A device error or an unusable clock raises the stop flag itself
    /// (so the processor also shuts down) and is returned to the caller.
    pub fn run(&mut self) -> Result<(), MetamacError> {
        while !self.stop.load(Ordering::Acquire) {
            let loop_start = match self.poll() {
                Ok(loop_start) => loop_start,
                Err(err) => {
                    self.stop.store(true, Ordering::Release);
                    self.queue.signal();
                    return Err(err);
                }
            };

            let delay =
                loop_start as i64 + self.config.read_interval as i64 - self.loop_end as i64;
            if delay > 0 {
                std::thread::sleep(Duration::from_micros(delay as u64));
            }
        }

        // Give the consumer a moment to catch up, then wake it for the
        // final drain.
        std::thread::sleep(Duration::from_millis(10));
        self.queue.signal();
        Ok(())
    }

    /// One read iteration: sample the registers, reconstruct the elapsed
    /// slots, push the batch. Returns the host time at which the
    /// iteration started.
    fn poll(&mut self) -> Result<u64, MetamacError> {
        let loop_start = self.start.elapsed().as_micros() as u64;

        let last_tsf = self.tsf;
        self.tsf = self.device.read_tsf()?;
        let last_slot_index = self.slot_index;
        self.slot_index = (self.device.read_reg16(RegisterBank::Regs, COUNT_SLOT)? & 0x7) as u8;

        let packet_queued = self.read_shared(PACKET_TO_TRANSMIT)?;
        let transmitted = self.read_shared(MY_TRANSMISSION)?;
        let transmit_success = self.read_shared(SUCCES_TRANSMISSION)?;
        let transmit_other = self.read_shared(OTHER_TRANSMISSION)?;
        let bad_reception = self.read_shared(BAD_RECEPTION)?;
        let busy_slot = self.read_shared(BUSY_SLOT)?;

        // Reading the slot index again tells us whether a slot boundary
        // crossed while the bitmasks were being sampled; any slot that
        // did is excluded from the valid window below.
        let end_slot_index =
            (self.device.read_reg16(RegisterBank::Regs, COUNT_SLOT)? & 0x7) as u8;

        let succeeded = transmitted & transmit_success;
        let channel_busy = if self.config.use_busy {
            (transmitted & !transmit_success)
                | ((transmit_other | bad_reception | busy_slot) & !succeeded)
        } else {
            (transmitted & !transmit_success) | ((transmit_other | bad_reception) & !succeeded)
        };

        let slots_passed = self.reconstruct_slots_passed(last_slot_index, last_tsf, loop_start)?;

        // With last_slot_index 7 and slot_index 5 the raw difference says
        // six slots, but the true count is 6 + 8k; the TSF delta picked k
        // above. The unstable current slot further shrinks what we may
        // emit.
        let si = self.slot_index as i64;
        let esi = end_slot_index as i64;
        let max_valid_offset = if si <= esi {
            si - esi + VALID_WINDOW
        } else {
            si - esi - 1
        };

        let mut records = Vec::with_capacity(slots_passed.max(0) as usize);
        let mut offset = slots_passed;

        if offset > max_valid_offset {
            metrics::filler_slots((offset - max_valid_offset) as u64);
            debug!(
                fillers = offset - max_valid_offset,
                slots_passed, "slots elapsed faster than the feedback window"
            );
        }
        while offset > max_valid_offset && offset > 0 {
            records.push(SlotObservation::filler(
                self.slot_num,
                self.read_num,
                loop_start,
                self.tsf,
            ));
            self.slot_num += 1;
            offset -= 1;
        }

        while offset > 0 {
            let bit = (si - offset).rem_euclid(8) as u16;
            records.push(SlotObservation {
                slot_num: self.slot_num,
                read_num: self.read_num,
                host_time: loop_start,
                tsf_time: self.tsf,
                slot_index: self.slot_index,
                slots_passed: slots_passed as u32,
                filler: false,
                packet_queued: (packet_queued >> bit) & 1 == 1,
                transmitted: (transmitted >> bit) & 1 == 1,
                transmit_success: (transmit_success >> bit) & 1 == 1,
                transmit_other: (transmit_other >> bit) & 1 == 1,
                bad_reception: (bad_reception >> bit) & 1 == 1,
                busy_slot: (busy_slot >> bit) & 1 == 1,
                channel_busy: (channel_busy >> bit) & 1 == 1,
            });
            self.slot_num += 1;
            offset -= 1;
        }

        if !records.is_empty() {
            self.queue.push_many(&records);
        }

        self.loop_end = self.start.elapsed().as_micros() as u64;
        self.read_num += 1;
        Ok(loop_start)
    }

    /// The raw mod-8 slot difference is only a lower bound; the TSF delta
    /// picks the congruent count whose duration it best matches.
    fn reconstruct_slots_passed(
        &self,
        last_slot_index: u8,
        last_tsf: u64,
        loop_start: u64,
    ) -> Result<i64, MetamacError> {
        let mut actual = self.tsf as i64 - last_tsf as i64;
        if !(0..=TSF_ANOMALY_MAX_US).contains(&actual) {
            warn!(delta_us = actual, "implausible TSF delta, using host clock");
            metrics::tsf_anomaly();
            actual = loop_start as i64 - self.loop_end as i64;
            if actual < 0 {
                return Err(MetamacError::ClockAnomaly);
            }
        }

        let slot_time = self.config.slot_time as i64;
        let mut slots_passed = (self.slot_index as i64 - last_slot_index as i64).rem_euclid(8);
        let mut min_diff = (actual - slots_passed * slot_time).abs();
        loop {
            let diff = (actual - (slots_passed + 8) * slot_time).abs();
            if diff >= min_diff {
                break;
            }
            slots_passed += 8;
            min_diff = diff;
        }

        Ok(slots_passed)
    }

    fn read_shared(&self, offset: u16) -> Result<u16, MetamacError> {
        Ok(self.device.read_reg16(RegisterBank::Shared, offset)?)
    }
}
