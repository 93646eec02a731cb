use metrics::{Counter, counter};
use std::sync::LazyLock;

static METRIC_TSF_ANOMALY: LazyLock<Counter> = LazyLock::new(|| counter!("tsf_anomaly"));
static METRIC_QUEUE_GROWN: LazyLock<Counter> = LazyLock::new(|| counter!("slot_queue_grown"));
static METRIC_FILLER_SLOTS: LazyLock<Counter> = LazyLock::new(|| counter!("filler_slots"));
static METRIC_PROTOCOL_SWITCHES: LazyLock<Counter> =
    LazyLock::new(|| counter!("protocol_switches"));

/// The TSF delta between two reads was implausible and the host clock was
/// used instead.
pub(crate) fn tsf_anomaly() {
    METRIC_TSF_ANOMALY.increment(1);
}

/// The slot queue doubled its capacity under load.
pub(crate) fn queue_grown() {
    METRIC_QUEUE_GROWN.increment(1);
}

/// Slots elapsed faster than the reader could observe them; filler records
/// were injected to keep the stream gap-free.
pub(crate) fn filler_slots(count: u64) {
    METRIC_FILLER_SLOTS.increment(count);
}

/// The controller changed which protocol runs on the device.
pub(crate) fn protocol_switch() {
    METRIC_PROTOCOL_SWITCHES.increment(1);
}
