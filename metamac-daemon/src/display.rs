//! The `--verbose` console weight table.

use std::io::Write;

use metamac_core::ProtocolSuite;

/// Rewrites a weight table in place once per second, the active protocol
/// marked with `*`.
#[derive(Default)]
pub struct Display {
    iterations: u64,
}

impl Display {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, suite: &ProtocolSuite) {
        let mut stdout = std::io::stdout().lock();

        if self.iterations > 0 {
            // Move the cursor back up over the previous table.
            let _ = write!(stdout, "\x1b[{}F", suite.len());
        }

        for (index, (weight, protocol)) in
            suite.weights().iter().zip(suite.protocols()).enumerate()
        {
            let marker = if suite.active_protocol() == Some(index) {
                '*'
            } else {
                ' '
            };
            let _ = writeln!(stdout, "{marker} {weight:5.3} {}", protocol.name);
        }
        let _ = stdout.flush();

        self.iterations += 1;
    }
}
