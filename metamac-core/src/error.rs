use thiserror::Error;

use crate::device::DeviceError;

/// Fatal conditions surfaced by the reader or processor loops.
#[derive(Debug, Error)]
pub enum MetamacError {
    /// A device operation failed; the pipeline is shut down.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Both the TSF counter and the host monotonic clock went backwards
    /// between two consecutive reads. There is nothing left to time
    /// slots against.
    #[error("monotonic time went backwards across consecutive reads")]
    ClockAnomaly,
}
