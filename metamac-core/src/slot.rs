/// Everything the device reported about a single elapsed slot.
///
/// Produced by the reader, consumed exactly once by the processor. The
/// stream delivered to the processor is gap-free: each observation's
/// `slot_num` is exactly one more than its predecessor's, with filler
/// records standing in for slots whose feedback was unreadable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotObservation {
    /// Strictly increasing slot counter, maintained by the reader.
    pub slot_num: u64,
    /// Which reader iteration produced this record.
    pub read_num: u64,
    /// Microseconds since the reader entered its loop, host monotonic clock.
    pub host_time: u64,
    /// Device TSF counter at the read which produced this record, µs.
    pub tsf_time: u64,
    /// The device's 3-bit slot index at the time of the read.
    pub slot_index: u8,
    /// How many slots the producing read iteration covered.
    pub slots_passed: u32,
    /// Filler records carry no feedback; all flags below are false.
    pub filler: bool,
    /// A frame was waiting for transmission in this slot.
    pub packet_queued: bool,
    /// The running protocol transmitted in this slot.
    pub transmitted: bool,
    /// The transmission in this slot was acknowledged.
    pub transmit_success: bool,
    /// Another node transmitted in this slot.
    pub transmit_other: bool,
    /// A frame was received but failed its checks.
    pub bad_reception: bool,
    /// The device's carrier-sense judged the slot busy.
    pub busy_slot: bool,
    /// Derived verdict: the channel was in use by someone else.
    pub channel_busy: bool,
}

impl SlotObservation {
    /// A filler record for `slot_num`: a slot known to have elapsed but
    /// whose feedback bits were not trustworthy at read time.
    pub fn filler(slot_num: u64, read_num: u64, host_time: u64, tsf_time: u64) -> Self {
        Self {
            slot_num,
            read_num,
            host_time,
            tsf_time,
            filler: true,
            ..Default::default()
        }
    }
}
