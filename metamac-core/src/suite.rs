//! The protocol suite and its multiplicative-weights estimator.

use std::time::Instant;

use crate::device::BytecodeSlot;
use crate::protocol::{Emulator, Protocol};
use crate::slot::SlotObservation;

/// No weight ever drops below this, so a protocol that was wrong for a
/// long stretch can still recover quickly once conditions change.
pub const WEIGHT_FLOOR: f64 = 0.01;

/// The configured candidate protocols together with everything the
/// estimator and the bytecode-slot controller learn at runtime.
///
/// Exclusively owned by the processor thread after initialisation.
pub struct ProtocolSuite {
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) weights: Vec<f64>,
    pub(crate) eta: f64,
    pub(crate) active_protocol: Option<usize>,
    /// Which protocol each device bytecode slot holds.
    pub(crate) slots: [Option<usize>; 2],
    pub(crate) active_slot: Option<BytecodeSlot>,
    /// Alignment between host slot numbering and the device's TDMA grid.
    pub(crate) slot_offset: u64,
    pub(crate) last_observation: Option<SlotObservation>,
    pub(crate) last_update: Instant,
    pub(crate) cycle: bool,
}

impl ProtocolSuite {
    /// Create a suite with uniform weights.
    ///
    /// `initial` optionally preselects the active protocol by index; when
    /// absent, initialisation falls back to the argmax of the (then still
    /// uniform) weights.
    pub fn new(protocols: Vec<Protocol>, eta: f64, cycle: bool, initial: Option<usize>) -> Self {
        let count = protocols.len();
        Self {
            protocols,
            weights: vec![1.0 / count as f64; count],
            eta,
            active_protocol: initial,
            slots: [None, None],
            active_slot: None,
            slot_offset: 0,
            last_observation: None,
            last_update: Instant::now(),
            cycle,
        }
    }

    /// The configured protocols.
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Number of candidate protocols.
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// True when no protocols are configured. Configuration validation
    /// rejects that before a suite is ever built.
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Current weight vector. Sums to one; every entry is at least
    /// [`WEIGHT_FLOOR`] (up to renormalisation).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Index of the currently active protocol, once initialised.
    pub fn active_protocol(&self) -> Option<usize> {
        self.active_protocol
    }

    /// Which protocol each device slot holds.
    pub fn device_slots(&self) -> [Option<usize>; 2] {
        self.slots
    }

    /// The currently active device slot, if the device was ever written.
    pub fn active_slot(&self) -> Option<BytecodeSlot> {
        self.active_slot
    }

    /// Current alignment between host slot numbering and the device's
    /// TDMA grid.
    pub fn slot_offset(&self) -> u64 {
        self.slot_offset
    }

    /// The best-scoring protocol; ties break towards the lowest index.
    pub fn best_protocol(&self) -> usize {
        let mut best = 0;
        for (index, weight) in self.weights.iter().enumerate() {
            if *weight > self.weights[best] {
                best = index;
            }
        }
        best
    }

    /// Score one observation against every candidate protocol.
    ///
    /// Slots without a queued packet (fillers included) carry no decision
    /// worth scoring and leave the weights untouched; they still become
    /// `last_observation` so the ALOHA emulator sees an accurate history.
    pub fn update_weights(&mut self, observation: &SlotObservation) {
        let Some(active) = self.active_protocol else {
            self.last_observation = Some(*observation);
            return;
        };

        // The device's TDMA grid is not necessarily aligned to our slot
        // numbering: a TDMA-4 protocol assigned slot 1 keeps a period of
        // four, but may transmit on numbers 3, 7, 11. Each observed
        // transmission of an active TDMA protocol re-anchors the offset.
        if let Emulator::Tdma(params) = &self.protocols[active].emulator
            && observation.transmitted
        {
            let frame_length = params.frame_length as i64;
            let neg = (observation.slot_num as i64
                - params.frame_offset as i64
                - params.slot_assignment as i64)
                .rem_euclid(frame_length);
            self.slot_offset = ((frame_length - neg) % frame_length) as u64;
        }

        if observation.packet_queued {
            // z is the reference decision for this slot: what a protocol
            // matching reality would have done.
            let idle = !observation.channel_busy;
            let z = match &self.protocols[active].emulator {
                Emulator::Tdma(_) => {
                    if idle {
                        1.0
                    } else {
                        0.0
                    }
                }
                Emulator::Aloha(params) => {
                    if idle {
                        params.persistence
                    } else {
                        1.0 - params.persistence
                    }
                }
            };

            for p in 0..self.protocols.len() {
                let d = self.protocols[p].emulator.decide(
                    observation.slot_num,
                    self.slot_offset,
                    self.last_observation.as_ref(),
                );
                self.weights[p] *= (-self.eta * (d - z).abs()).exp();
                self.weights[p] = self.weights[p].max(WEIGHT_FLOOR);
            }

            self.normalise();
        }

        self.last_observation = Some(*observation);
    }

    /// Scale the weights back onto the unit simplex without letting any
    /// entry end up under the floor: entries the scaling would push below
    /// [`WEIGHT_FLOOR`] are pinned there and the remaining mass is scaled
    /// to keep the sum at exactly one.
    fn normalise(&mut self) {
        let n = self.weights.len();
        let mut pinned = vec![false; n];

        loop {
            let pinned_mass = WEIGHT_FLOOR * pinned.iter().filter(|p| **p).count() as f64;
            let free_sum: f64 = self
                .weights
                .iter()
                .zip(&pinned)
                .filter(|(_, pinned)| !**pinned)
                .map(|(weight, _)| *weight)
                .sum();
            if free_sum <= 0.0 || pinned_mass >= 1.0 {
                // Only reachable when floor * N >= 1; nothing sensible
                // to preserve, so reset to uniform.
                self.weights.fill(1.0 / n as f64);
                return;
            }

            let scale = (1.0 - pinned_mass) / free_sum;
            let mut newly_pinned = false;
            for i in 0..n {
                if !pinned[i] && self.weights[i] * scale < WEIGHT_FLOOR {
                    pinned[i] = true;
                    newly_pinned = true;
                }
            }
            if newly_pinned {
                continue;
            }

            for i in 0..n {
                self.weights[i] = if pinned[i] {
                    WEIGHT_FLOOR
                } else {
                    self.weights[i] * scale
                };
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AlohaParams, TdmaParams};
    use more_asserts::*;
    use std::path::PathBuf;

    fn tdma_protocol(id: i32, offset: u32, length: u32, assignment: u32) -> Protocol {
        Protocol {
            id,
            name: format!("TDMA ({length}, slot {assignment})"),
            fsm_path: PathBuf::from("/fsm/tdma.txt"),
            fsm_params: vec![],
            emulator: Emulator::Tdma(TdmaParams {
                frame_offset: offset,
                frame_length: length,
                slot_assignment: assignment,
            }),
        }
    }

    fn aloha_protocol(id: i32, persistence: f64) -> Protocol {
        Protocol {
            id,
            name: format!("Aloha ({persistence})"),
            fsm_path: PathBuf::from("/fsm/aloha.txt"),
            fsm_params: vec![],
            emulator: Emulator::Aloha(AlohaParams { persistence }),
        }
    }

    fn two_protocol_suite() -> ProtocolSuite {
        ProtocolSuite::new(
            vec![tdma_protocol(1, 0, 4, 1), aloha_protocol(2, 0.25)],
            0.25,
            false,
            Some(0),
        )
    }

    fn observation(slot_num: u64, queued: bool, busy: bool) -> SlotObservation {
        SlotObservation {
            slot_num,
            packet_queued: queued,
            channel_busy: busy,
            ..Default::default()
        }
    }

    fn assert_normalised(suite: &ProtocolSuite) {
        let sum: f64 = suite.weights().iter().sum();
        assert_lt!((sum - 1.0).abs(), 1e-9);
        for weight in suite.weights() {
            assert_ge!(*weight, WEIGHT_FLOOR - 1e-12);
        }
    }

    #[test]
    fn weights_start_uniform() {
        let suite = two_protocol_suite();
        assert_eq!(suite.weights(), &[0.5, 0.5]);
    }

    #[test]
    fn update_keeps_weights_normalised_and_floored() {
        let mut suite = two_protocol_suite();
        for slot_num in 0..500 {
            suite.update_weights(&observation(slot_num, true, slot_num % 4 != 1));
            assert_normalised(&suite);
        }
    }

    #[test]
    fn no_packet_means_no_update() {
        let mut suite = two_protocol_suite();
        suite.update_weights(&observation(0, false, true));
        assert_eq!(suite.weights(), &[0.5, 0.5]);

        let filler = SlotObservation::filler(1, 0, 0, 0);
        suite.update_weights(&filler);
        assert_eq!(suite.weights(), &[0.5, 0.5]);
    }

    #[test]
    fn normalisation_is_idempotent() {
        let mut suite = two_protocol_suite();
        suite.update_weights(&observation(0, true, true));
        let before = suite.weights().to_vec();
        suite.normalise();
        for (a, b) in before.iter().zip(suite.weights()) {
            assert_lt!((a - b).abs(), 1e-12);
        }
    }

    #[test]
    fn tdma_transmission_realigns_slot_offset() {
        let mut suite = two_protocol_suite();
        // Active TDMA(offset=0, length=4, assignment=1) observed
        // transmitting on slot 3: the grid is 2 behind our numbering.
        let mut obs = observation(3, true, false);
        obs.transmitted = true;
        suite.update_weights(&obs);
        assert_eq!(suite.slot_offset, 2);

        // Transmitting on the assigned slot leaves the offset at zero.
        let mut suite = two_protocol_suite();
        let mut obs = observation(5, true, false);
        obs.transmitted = true;
        suite.update_weights(&obs);
        assert_eq!(suite.slot_offset, 0);
    }

    #[test]
    fn converges_to_tdma_on_a_tdma_channel() {
        // The channel is idle exactly on the active TDMA protocol's
        // slots; TDMA is always right, ALOHA pays |d - z| almost always.
        let mut suite = two_protocol_suite();
        for slot_num in 0..200 {
            suite.update_weights(&observation(slot_num, true, slot_num % 4 != 1));
        }
        assert_gt!(suite.weights()[0], 0.95);
        assert_eq!(suite.best_protocol(), 0);
    }

    #[test]
    fn prefers_aloha_on_a_random_channel() {
        use rand::prelude::*;

        let mut suite = ProtocolSuite::new(
            vec![tdma_protocol(1, 0, 4, 1), aloha_protocol(2, 0.25)],
            0.25,
            false,
            Some(1),
        );

        let mut rng = StdRng::seed_from_u64(7);
        for slot_num in 0..200 {
            let busy = rng.random_bool(0.4);
            let transmitted = rng.random_bool(0.25);
            let obs = SlotObservation {
                slot_num,
                packet_queued: true,
                transmitted,
                transmit_success: transmitted && !busy,
                channel_busy: busy,
                ..Default::default()
            };
            suite.update_weights(&obs);
            if slot_num >= 100 {
                assert_gt!(suite.weights()[1], suite.weights()[0]);
            }
        }
    }

    #[test]
    fn best_protocol_breaks_ties_low() {
        let suite = ProtocolSuite::new(
            vec![
                aloha_protocol(1, 0.25),
                aloha_protocol(2, 0.5),
                aloha_protocol(3, 0.75),
            ],
            0.25,
            false,
            None,
        );
        assert_eq!(suite.best_protocol(), 0);
    }
}
