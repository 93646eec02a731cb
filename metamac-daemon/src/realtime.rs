//! Realtime scheduling for the reader thread.

use tracing::{info, warn};

/// FIFO priority for the reader: one notch below the kernel's own
/// realtime housekeeping.
pub const READER_PRIORITY: libc::c_int = 98;

/// Promote the calling thread to `SCHED_FIFO`.
///
/// Failure (typically: not root, or RLIMIT_RTPRIO too low) degrades to
/// normal scheduling with a warning; the reader still works, it just
/// tolerates less scheduling jitter.
pub fn promote_current_thread(priority: libc::c_int) {
    let param = libc::sched_param {
        sched_priority: priority,
    };

    #[allow(unsafe_code)]
    let thread = {
        // SAFETY: pthread_self never fails and returns a handle for the
        // calling thread.
        unsafe { libc::pthread_self() }
    };

    #[allow(unsafe_code)]
    let rc = {
        // SAFETY: `param` is a valid sched_param for the duration of the
        // call; SCHED_FIFO is a valid policy.
        unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) }
    };

    if rc == 0 {
        info!(priority, "reader thread promoted to SCHED_FIFO");
    } else {
        warn!(
            rc,
            priority, "unable to promote reader thread to realtime priority"
        );
    }
}
