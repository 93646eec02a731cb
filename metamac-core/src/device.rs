//! The device-access seam.
//!
//! The daemon's debugfs backend and the test mocks both implement
//! [`Device`]. The reader only ever reads registers and the processor only
//! ever writes bytecode, so implementations need no cross-operation
//! ordering beyond their own interior locking.

use std::path::Path;

use thiserror::Error;

/// Shared-memory offsets of the per-slot feedback bitmasks. Each word
/// carries one bit per slot index of the device's rolling 8-slot window.
pub const PACKET_TO_TRANSMIT: u16 = 0x00F2;
/// See [`PACKET_TO_TRANSMIT`].
pub const MY_TRANSMISSION: u16 = 0x00F4;
/// See [`PACKET_TO_TRANSMIT`].
pub const SUCCES_TRANSMISSION: u16 = 0x00F6;
/// See [`PACKET_TO_TRANSMIT`].
pub const OTHER_TRANSMISSION: u16 = 0x00F8;
/// See [`PACKET_TO_TRANSMIT`].
pub const BAD_RECEPTION: u16 = 0x00FA;
/// See [`PACKET_TO_TRANSMIT`].
pub const BUSY_SLOT: u16 = 0x00FC;

/// Register carrying the current slot index in its low 3 bits.
pub const COUNT_SLOT: u16 = 0x0160;

/// Which address space a 16-bit register read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterBank {
    /// MAC core registers (slot counter).
    Regs,
    /// Shared memory (feedback bitmasks, bytecode, FSM parameters).
    Shared,
}

/// One of the device's two on-board bytecode memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeSlot {
    /// Slot 0.
    Zero,
    /// Slot 1.
    One,
}

impl BytecodeSlot {
    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            BytecodeSlot::Zero => BytecodeSlot::One,
            BytecodeSlot::One => BytecodeSlot::Zero,
        }
    }

    /// Index into host-side per-slot bookkeeping arrays.
    pub fn index(self) -> usize {
        match self {
            BytecodeSlot::Zero => 0,
            BytecodeSlot::One => 1,
        }
    }
}

impl std::fmt::Display for BytecodeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// A device operation failed.
///
/// Any device error is fatal to the loop that hit it; the other loop is
/// drained and stopped via the shared stop flag.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Underlying transport (debugfs file, ioctl, ...) failed.
    #[error("device i/o failed")]
    Io(#[from] std::io::Error),

    /// A compiled FSM could not be read or did not parse.
    #[error("bad FSM bytecode {path}: {reason}")]
    Bytecode {
        /// Path of the offending FSM file.
        path: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// The handle to a programmable MAC device.
///
/// All operations are synchronous and may block. Methods take `&self`;
/// implementations are expected to provide whatever interior locking their
/// transport needs, since the handle is shared between the reader thread
/// (register reads) and the processor thread (bytecode writes).
pub trait Device: Send + Sync {
    /// Read a 16-bit register from the given bank.
    fn read_reg16(&self, bank: RegisterBank, offset: u16) -> Result<u16, DeviceError>;

    /// Read the free-running 64-bit TSF counter, nominally 1 µs per tick.
    fn read_tsf(&self) -> Result<u64, DeviceError>;

    /// Write a compiled FSM into a bytecode slot.
    ///
    /// Callers must bracket this with [`Device::enter_wait_mode`] /
    /// [`Device::leave_wait_mode`] so the device never executes
    /// half-written bytecode.
    fn load_bytecode(&self, slot: BytecodeSlot, fsm_path: &Path) -> Result<(), DeviceError>;

    /// Set one FSM parameter of a slot. `num` is in 10..=17.
    fn set_fsm_param(&self, slot: BytecodeSlot, num: u8, value: u16) -> Result<(), DeviceError>;

    /// Atomically switch which slot's bytecode runs.
    fn set_active_slot(&self, slot: BytecodeSlot) -> Result<(), DeviceError>;

    /// Park the device before a bytecode load.
    fn enter_wait_mode(&self) -> Result<(), DeviceError>;

    /// Resume the device after a bytecode load.
    fn leave_wait_mode(&self) -> Result<(), DeviceError>;
}
