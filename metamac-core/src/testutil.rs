//! Shared test doubles.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::device::{BytecodeSlot, Device, DeviceError, RegisterBank};

/// One recorded write-side device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeviceOp {
    LoadBytecode(BytecodeSlot, PathBuf),
    SetFsmParam(BytecodeSlot, u8, u16),
    SetActiveSlot(BytecodeSlot),
    EnterWait,
    LeaveWait,
}

/// Scripted [`Device`]: register and TSF reads pop from per-register
/// scripts (the last value is sticky; an unscripted register reads 0),
/// write-side operations are recorded for assertion.
#[derive(Default)]
pub(crate) struct MockDevice {
    tsf: Mutex<VecDeque<u64>>,
    regs: Mutex<HashMap<(RegisterBank, u16), VecDeque<u16>>>,
    ops: Mutex<Vec<DeviceOp>>,
}

impl MockDevice {
    pub(crate) fn script_tsf<I: IntoIterator<Item = u64>>(&self, values: I) {
        self.tsf.lock().extend(values);
    }

    pub(crate) fn script_reg<I: IntoIterator<Item = u16>>(
        &self,
        bank: RegisterBank,
        offset: u16,
        values: I,
    ) {
        self.regs
            .lock()
            .entry((bank, offset))
            .or_default()
            .extend(values);
    }

    pub(crate) fn ops(&self) -> Vec<DeviceOp> {
        self.ops.lock().clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    fn next(queue: &mut VecDeque<u16>) -> u16 {
        match queue.len() {
            0 => 0,
            1 => queue[0],
            _ => queue.pop_front().unwrap_or(0),
        }
    }
}

impl Device for MockDevice {
    fn read_reg16(&self, bank: RegisterBank, offset: u16) -> Result<u16, DeviceError> {
        let mut regs = self.regs.lock();
        Ok(regs
            .get_mut(&(bank, offset))
            .map(Self::next)
            .unwrap_or_default())
    }

    fn read_tsf(&self) -> Result<u64, DeviceError> {
        let mut tsf = self.tsf.lock();
        Ok(match tsf.len() {
            0 => 0,
            1 => tsf[0],
            _ => tsf.pop_front().unwrap_or(0),
        })
    }

    fn load_bytecode(&self, slot: BytecodeSlot, fsm_path: &Path) -> Result<(), DeviceError> {
        self.ops
            .lock()
            .push(DeviceOp::LoadBytecode(slot, fsm_path.to_path_buf()));
        Ok(())
    }

    fn set_fsm_param(&self, slot: BytecodeSlot, num: u8, value: u16) -> Result<(), DeviceError> {
        self.ops.lock().push(DeviceOp::SetFsmParam(slot, num, value));
        Ok(())
    }

    fn set_active_slot(&self, slot: BytecodeSlot) -> Result<(), DeviceError> {
        self.ops.lock().push(DeviceOp::SetActiveSlot(slot));
        Ok(())
    }

    fn enter_wait_mode(&self) -> Result<(), DeviceError> {
        self.ops.lock().push(DeviceOp::EnterWait);
        Ok(())
    }

    fn leave_wait_mode(&self) -> Result<(), DeviceError> {
        self.ops.lock().push(DeviceOp::LeaveWait);
        Ok(())
    }
}
