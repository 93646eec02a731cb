//! Device access through the b43 debugfs interface.
//!
//! The wireless MAC processor exposes its shared memory and MAC registers
//! through debugfs knobs: writing `"routing offset"` to `shm16read` latches
//! an address whose value the next read returns, `shm16write` takes
//! `"routing offset value"`, and `tsf` returns the free-running timestamp
//! counter. Compiled FSMs are plain text files of 16-bit words which are
//! streamed into the per-slot bytecode window.
//!
//! The shm address latch is shared, so a single lock serialises all shm
//! accesses; the reader (register reads) and the processor (bytecode
//! writes) may hold the device concurrently.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use metamac_core::{BytecodeSlot, Device, DeviceError, RegisterBank};

/// Routing codes of the two address spaces the daemon touches.
const ROUTING_SHARED: u16 = 0x0001;
const ROUTING_REGS: u16 = 0x0003;

/// Per-slot shared-memory windows for FSM bytecode.
const BYTECODE_BASE: [u16; 2] = [0x0200, 0x0500];
/// Per-slot FSM parameter banks; parameter `num` lives at
/// `PARAM_BASE[slot] + 2 * (num - 10)`.
const PARAM_BASE: [u16; 2] = [0x01E0, 0x01F0];
/// Control word selecting which bytecode slot runs (1 or 2).
const ACTIVE_BYTECODE: u16 = 0x01D6;
/// Control word parking the device while bytecode is rewritten.
const WAIT_MODE: u16 = 0x01D8;

pub struct DebugfsDevice {
    dir: PathBuf,
    /// The shm address latch is a single hardware register; every shm
    /// access must own it end to end.
    shm_lock: Mutex<()>,
}

impl DebugfsDevice {
    /// Open the device rooted at a debugfs directory such as
    /// `/sys/kernel/debug/b43/phy0`.
    pub fn new(dir: &Path) -> Result<Self, DeviceError> {
        // Probe the knobs we depend on so a missing driver fails at
        // startup rather than mid-pipeline.
        for knob in ["shm16read", "shm16write", "tsf"] {
            let path = dir.join(knob);
            if !path.exists() {
                return Err(DeviceError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("debugfs knob {} not found", path.display()),
                )));
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            shm_lock: Mutex::new(()),
        })
    }

    fn routing(bank: RegisterBank) -> u16 {
        match bank {
            RegisterBank::Regs => ROUTING_REGS,
            RegisterBank::Shared => ROUTING_SHARED,
        }
    }

    fn shm_read16(&self, routing: u16, offset: u16) -> Result<u16, DeviceError> {
        let _guard = self.shm_lock.lock();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.dir.join("shm16read"))?;
        writeln!(file, "0x{routing:04X} 0x{offset:04X}")?;
        file.seek(SeekFrom::Start(0))?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        parse_hex16(text.trim()).ok_or_else(|| {
            DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unparseable shm16read reply: {text:?}"),
            ))
        })
    }

    fn shm_write16(&self, routing: u16, offset: u16, value: u16) -> Result<(), DeviceError> {
        let _guard = self.shm_lock.lock();

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.dir.join("shm16write"))?;
        writeln!(file, "0x{routing:04X} 0x{offset:04X} 0x{value:04X}")?;
        Ok(())
    }
}

fn parse_hex16(text: &str) -> Option<u16> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    u16::from_str_radix(text, 16).ok()
}

fn parse_hex64(text: &str) -> Option<u64> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(text, 16).ok()
}

impl Device for DebugfsDevice {
    fn read_reg16(&self, bank: RegisterBank, offset: u16) -> Result<u16, DeviceError> {
        self.shm_read16(Self::routing(bank), offset)
    }

    fn read_tsf(&self) -> Result<u64, DeviceError> {
        let mut text = String::new();
        std::fs::File::open(self.dir.join("tsf"))?.read_to_string(&mut text)?;
        parse_hex64(text.trim()).ok_or_else(|| {
            DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unparseable tsf reply: {text:?}"),
            ))
        })
    }

    fn load_bytecode(&self, slot: BytecodeSlot, fsm_path: &Path) -> Result<(), DeviceError> {
        let text = std::fs::read_to_string(fsm_path)?;

        let mut words = Vec::new();
        for token in text.split_whitespace() {
            match parse_hex16(token) {
                Some(word) => words.push(word),
                None => {
                    return Err(DeviceError::Bytecode {
                        path: fsm_path.display().to_string(),
                        reason: format!("invalid word {token:?}"),
                    });
                }
            }
        }
        if words.is_empty() {
            return Err(DeviceError::Bytecode {
                path: fsm_path.display().to_string(),
                reason: "empty FSM".into(),
            });
        }

        debug!(slot = %slot, words = words.len(), path = %fsm_path.display(), "writing bytecode");
        let base = BYTECODE_BASE[slot.index()];
        for (i, word) in words.iter().enumerate() {
            self.shm_write16(ROUTING_SHARED, base + 2 * i as u16, *word)?;
        }
        Ok(())
    }

    fn set_fsm_param(&self, slot: BytecodeSlot, num: u8, value: u16) -> Result<(), DeviceError> {
        let offset = PARAM_BASE[slot.index()] + 2 * (num.saturating_sub(10)) as u16;
        self.shm_write16(ROUTING_SHARED, offset, value)
    }

    fn set_active_slot(&self, slot: BytecodeSlot) -> Result<(), DeviceError> {
        self.shm_write16(ROUTING_SHARED, ACTIVE_BYTECODE, slot.index() as u16 + 1)
    }

    fn enter_wait_mode(&self) -> Result<(), DeviceError> {
        self.shm_write16(ROUTING_SHARED, WAIT_MODE, 1)
    }

    fn leave_wait_mode(&self) -> Result<(), DeviceError> {
        self.shm_write16(ROUTING_SHARED, WAIT_MODE, 0)
    }
}
