//! The two-slot bytecode cache over the device.
//!
//! The device runs exactly one of its two bytecode slots at a time.
//! Switching protocols therefore ranges from free (already loaded) to a
//! full bytecode write; [`ProtocolSuite::load_protocol`] always picks the
//! cheapest legal transition.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::device::{BytecodeSlot, Device, DeviceError};
use crate::metrics;
use crate::suite::ProtocolSuite;

/// How often cycle mode rotates to the next protocol, and the default
/// display/telemetry cadence.
pub const CYCLE_INTERVAL: Duration = Duration::from_secs(1);

impl ProtocolSuite {
    /// Resolve the initial protocol and, unless `readonly`, preload its
    /// bytecode into device slot 0 and activate it.
    ///
    /// Runs before the device is enabled, so a half-configured FSM is
    /// never on the air.
    pub fn initialise<D: Device + ?Sized>(
        &mut self,
        device: &D,
        readonly: bool,
    ) -> Result<(), DeviceError> {
        let active = match self.active_protocol {
            Some(p) => p,
            None => {
                let best = self.best_protocol();
                self.active_protocol = Some(best);
                best
            }
        };

        if readonly {
            self.slots = [None, None];
            self.active_slot = None;
        } else {
            device.enter_wait_mode()?;
            device.load_bytecode(BytecodeSlot::Zero, &self.protocols[active].fsm_path)?;
            device.leave_wait_mode()?;
            self.configure_params(device, BytecodeSlot::Zero, active)?;
            device.set_active_slot(BytecodeSlot::Zero)?;

            self.slots = [Some(active), None];
            self.active_slot = Some(BytecodeSlot::Zero);
        }

        info!(protocol = %self.protocols[active].name, readonly, "initial protocol selected");
        self.last_update = Instant::now();
        Ok(())
    }

    /// Make `target` the running protocol via the cheapest transition:
    /// no-op, slot flip, reparameterisation, or full bytecode load.
    pub fn load_protocol<D: Device + ?Sized>(
        &mut self,
        device: &D,
        target: usize,
    ) -> Result<(), DeviceError> {
        let Some(active) = self.active_slot else {
            // Readonly: track the selection, never touch the device.
            self.active_protocol = Some(target);
            self.last_update = Instant::now();
            return Ok(());
        };
        let inactive = active.other();

        if self.slots[active.index()] == Some(target) {
            // Already running.
        } else if self.slots[inactive.index()] == Some(target) {
            debug!(slot = %inactive, "flipping to cached protocol");
            device.set_active_slot(inactive)?;
            self.active_slot = Some(inactive);
            metrics::protocol_switch();
        } else if let Some(occupant) = self.slots[active.index()]
            && self.protocols[target].same_fsm(&self.protocols[occupant])
        {
            // Same FSM, different parameters: rewrite the active slot's
            // parameters in place.
            debug!(slot = %active, "reparameterising active slot");
            self.configure_params(device, active, target)?;
            self.slots[active.index()] = Some(target);
            metrics::protocol_switch();
        } else if let Some(occupant) = self.slots[inactive.index()]
            && self.protocols[target].same_fsm(&self.protocols[occupant])
        {
            debug!(slot = %inactive, "reparameterising inactive slot");
            self.configure_params(device, inactive, target)?;
            device.set_active_slot(inactive)?;
            self.slots[inactive.index()] = Some(target);
            self.active_slot = Some(inactive);
            metrics::protocol_switch();
        } else {
            info!(
                slot = %inactive,
                protocol = %self.protocols[target].name,
                "loading bytecode"
            );
            device.enter_wait_mode()?;
            device.load_bytecode(inactive, &self.protocols[target].fsm_path)?;
            device.leave_wait_mode()?;
            self.configure_params(device, inactive, target)?;
            device.set_active_slot(inactive)?;
            self.slots[inactive.index()] = Some(target);
            self.active_slot = Some(inactive);
            metrics::protocol_switch();
        }

        self.active_protocol = Some(target);
        self.last_update = Instant::now();
        Ok(())
    }

    /// Reconcile the running protocol with the estimator's current best,
    /// or rotate to the next protocol in cycle mode.
    pub fn evaluate<D: Device + ?Sized>(
        &mut self,
        device: &D,
        cycle_interval: Duration,
    ) -> Result<(), DeviceError> {
        if self.cycle {
            if self.last_update.elapsed() >= cycle_interval {
                let next = match self.active_protocol {
                    Some(p) => (p + 1) % self.protocols.len(),
                    None => 0,
                };
                self.load_protocol(device, next)?;
            }
        } else {
            self.load_protocol(device, self.best_protocol())?;
        }
        Ok(())
    }

    fn configure_params<D: Device + ?Sized>(
        &self,
        device: &D,
        slot: BytecodeSlot,
        protocol: usize,
    ) -> Result<(), DeviceError> {
        for param in &self.protocols[protocol].fsm_params {
            device.set_fsm_param(slot, param.num, param.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Emulator, FsmParam, Protocol, TdmaParams};
    use crate::testutil::{DeviceOp, MockDevice};
    use std::path::PathBuf;

    fn tdma_with_fsm(id: i32, fsm: &str, assignment: u32) -> Protocol {
        Protocol {
            id,
            name: format!("proto-{id}"),
            fsm_path: PathBuf::from(fsm),
            fsm_params: vec![FsmParam {
                num: 12,
                value: assignment as u16,
            }],
            emulator: Emulator::Tdma(TdmaParams {
                frame_offset: 0,
                frame_length: 4,
                slot_assignment: assignment,
            }),
        }
    }

    /// A and B share an FSM; C has its own.
    fn shared_fsm_suite() -> ProtocolSuite {
        ProtocolSuite::new(
            vec![
                tdma_with_fsm(1, "/fsm/tdma.txt", 0),
                tdma_with_fsm(2, "/fsm/tdma.txt", 1),
                tdma_with_fsm(3, "/fsm/other.txt", 2),
            ],
            0.25,
            false,
            Some(0),
        )
    }

    #[test]
    fn initialise_preloads_slot_zero() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();

        assert_eq!(suite.active_protocol(), Some(0));
        assert_eq!(suite.device_slots(), [Some(0), None]);
        assert_eq!(suite.active_slot(), Some(BytecodeSlot::Zero));

        let ops = device.ops();
        assert_eq!(
            ops,
            vec![
                DeviceOp::EnterWait,
                DeviceOp::LoadBytecode(BytecodeSlot::Zero, PathBuf::from("/fsm/tdma.txt")),
                DeviceOp::LeaveWait,
                DeviceOp::SetFsmParam(BytecodeSlot::Zero, 12, 0),
                DeviceOp::SetActiveSlot(BytecodeSlot::Zero),
            ]
        );
    }

    #[test]
    fn initialise_readonly_never_writes() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, true).unwrap();

        assert_eq!(suite.active_protocol(), Some(0));
        assert_eq!(suite.device_slots(), [None, None]);
        assert_eq!(suite.active_slot(), None);
        assert!(device.ops().is_empty());
    }

    #[test]
    fn initialise_defaults_to_best_weight() {
        let device = MockDevice::default();
        let mut suite = ProtocolSuite::new(
            vec![
                tdma_with_fsm(1, "/fsm/a.txt", 0),
                tdma_with_fsm(2, "/fsm/b.txt", 1),
            ],
            0.25,
            false,
            None,
        );
        suite.weights = vec![0.3, 0.7];
        suite.initialise(&device, false).unwrap();
        assert_eq!(suite.active_protocol(), Some(1));
    }

    #[test]
    fn reload_of_running_protocol_is_a_noop() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();
        device.clear_ops();

        suite.load_protocol(&device, 0).unwrap();
        suite.load_protocol(&device, 0).unwrap();
        assert!(device.ops().is_empty());
        assert_eq!(suite.active_protocol(), Some(0));
    }

    #[test]
    fn shared_fsm_reparameterises_in_place() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();
        device.clear_ops();

        // B shares A's FSM: parameter writes only, no bytecode load.
        suite.load_protocol(&device, 1).unwrap();
        assert_eq!(
            device.ops(),
            vec![DeviceOp::SetFsmParam(BytecodeSlot::Zero, 12, 1)]
        );
        assert_eq!(suite.device_slots(), [Some(1), None]);
        assert_eq!(suite.active_slot(), Some(BytecodeSlot::Zero));
        device.clear_ops();

        // C has a different FSM: full load into the inactive slot.
        suite.load_protocol(&device, 2).unwrap();
        assert_eq!(
            device.ops(),
            vec![
                DeviceOp::EnterWait,
                DeviceOp::LoadBytecode(BytecodeSlot::One, PathBuf::from("/fsm/other.txt")),
                DeviceOp::LeaveWait,
                DeviceOp::SetFsmParam(BytecodeSlot::One, 12, 2),
                DeviceOp::SetActiveSlot(BytecodeSlot::One),
            ]
        );
        assert_eq!(suite.device_slots(), [Some(1), Some(2)]);
        assert_eq!(suite.active_slot(), Some(BytecodeSlot::One));
        assert_eq!(suite.active_protocol(), Some(2));
    }

    #[test]
    fn inactive_slot_reuse_and_cached_flips() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();
        suite.load_protocol(&device, 2).unwrap();
        // State now: slot 0 holds A, slot 1 holds C (active).
        device.clear_ops();

        // B shares the FSM sitting in the inactive slot: reparameterise
        // it there and flip, no bytecode load.
        suite.load_protocol(&device, 1).unwrap();
        assert_eq!(
            device.ops(),
            vec![
                DeviceOp::SetFsmParam(BytecodeSlot::Zero, 12, 1),
                DeviceOp::SetActiveSlot(BytecodeSlot::Zero),
            ]
        );
        assert_eq!(suite.device_slots(), [Some(1), Some(2)]);
        device.clear_ops();

        // C is still cached in slot 1: a pure flip.
        suite.load_protocol(&device, 2).unwrap();
        assert_eq!(
            device.ops(),
            vec![DeviceOp::SetActiveSlot(BytecodeSlot::One)]
        );
        assert_eq!(suite.active_slot(), Some(BytecodeSlot::One));
    }

    #[test]
    fn load_protocol_upholds_active_invariant() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();

        for target in [1, 2, 0, 2, 1] {
            suite.load_protocol(&device, target).unwrap();
            assert_eq!(suite.active_protocol(), Some(target));
            let active = suite.active_slot().unwrap();
            assert_eq!(suite.device_slots()[active.index()], Some(target));
        }
    }

    #[test]
    fn cycle_mode_rotates_after_interval() {
        let device = MockDevice::default();
        let mut suite = ProtocolSuite::new(
            vec![
                tdma_with_fsm(1, "/fsm/a.txt", 0),
                tdma_with_fsm(2, "/fsm/b.txt", 1),
                tdma_with_fsm(3, "/fsm/c.txt", 2),
            ],
            0.25,
            true,
            Some(0),
        );
        suite.initialise(&device, false).unwrap();
        let interval = Duration::from_millis(20);

        // Not yet due: nothing happens.
        suite.evaluate(&device, interval).unwrap();
        assert_eq!(suite.active_protocol(), Some(0));

        let mut seen = vec![0];
        for _ in 0..3 {
            std::thread::sleep(interval + Duration::from_millis(5));
            suite.evaluate(&device, interval).unwrap();
            seen.push(suite.active_protocol().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    fn non_cycle_evaluate_loads_argmax() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, false).unwrap();
        suite.weights = vec![0.1, 0.1, 0.8];

        suite.evaluate(&device, CYCLE_INTERVAL).unwrap();
        assert_eq!(suite.active_protocol(), Some(2));
    }

    #[test]
    fn readonly_pin_tracks_without_device_writes() {
        let device = MockDevice::default();
        let mut suite = shared_fsm_suite();
        suite.initialise(&device, true).unwrap();

        suite.load_protocol(&device, 2).unwrap();
        assert_eq!(suite.active_protocol(), Some(2));
        assert!(device.ops().is_empty());
    }
}
