//! The core MetaMAC online protocol-selection pipeline.
//!
//! A [`SlotReader`] polls a programmable MAC device at sub-slot granularity
//! and reconstructs a gap-free stream of per-slot [`SlotObservation`]s, a
//! [`SlotQueue`] hands them to a [`Processor`] which scores every candidate
//! [`Protocol`] with a multiplicative-weights estimator and keeps the
//! device's two bytecode slots loaded with whatever is currently best.

#![warn(missing_docs)]

mod controller;
mod device;
mod error;
mod mailbox;
mod metrics;
mod processor;
mod protocol;
mod queue;
mod reader;
mod slot;
mod suite;
#[cfg(test)]
mod testutil;

pub use controller::CYCLE_INTERVAL;
pub use device::{
    BAD_RECEPTION, BUSY_SLOT, BytecodeSlot, COUNT_SLOT, Device, DeviceError, MY_TRANSMISSION,
    OTHER_TRANSMISSION, PACKET_TO_TRANSMIT, RegisterBank, SUCCES_TRANSMISSION,
};
pub use error::MetamacError;
pub use mailbox::{Command, CommandMailbox};
pub use processor::{Monitor, Processor, ProcessorConfig};
pub use protocol::{AlohaParams, Emulator, FsmParam, Protocol, TdmaParams};
pub use queue::SlotQueue;
pub use reader::{ReaderConfig, SlotReader};
pub use slot::SlotObservation;
pub use suite::{ProtocolSuite, WEIGHT_FLOOR};

/// Nominal slot duration of the device's TDMA grid, in microseconds.
pub const DEFAULT_SLOT_TIME_US: u32 = 2200;

/// Default interval between two register polls, in microseconds.
///
/// Must stay well below eight slot times or the device's rolling feedback
/// window is overrun and slots are lost to filler.
pub const DEFAULT_READ_INTERVAL_US: u32 = 10_000;
