//! The local CSV slot log: one row per observation, filler rows included.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use metamac_core::{ProtocolSuite, SlotObservation};

pub struct SlotLogger {
    writer: BufWriter<File>,
}

impl SlotLogger {
    /// Create (truncating) the log file and write the header row.
    pub fn create(path: &Path, suite: &ProtocolSuite) -> io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);

        write!(
            writer,
            "slot_num,offset,read_num,host_time,tsf_time,slot_index,slots_passed,filler,\
             packet_queued,transmitted,transmit_success,transmit_other,bad_reception,\
             busy_slot,channel_busy,pcoll,protocol"
        )?;
        for protocol in suite.protocols() {
            write!(writer, ",{}", protocol.name)?;
        }
        writeln!(writer)?;

        Ok(Self { writer })
    }

    /// Append one observation row.
    pub fn log(
        &mut self,
        observation: &SlotObservation,
        suite: &ProtocolSuite,
        pcoll: f64,
    ) -> io::Result<()> {
        let active = match suite.active_protocol() {
            Some(index) => suite.protocols()[index].name.as_str(),
            None => "",
        };

        write!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{:e},{}",
            observation.slot_num,
            suite.slot_offset(),
            observation.read_num,
            observation.host_time,
            observation.tsf_time,
            observation.slot_index,
            observation.slots_passed,
            observation.filler as u8,
            observation.packet_queued as u8,
            observation.transmitted as u8,
            observation.transmit_success as u8,
            observation.transmit_other as u8,
            observation.bad_reception as u8,
            observation.busy_slot as u8,
            observation.channel_busy as u8,
            pcoll,
            active,
        )?;
        for weight in suite.weights() {
            write!(self.writer, ",{weight:e}")?;
        }
        writeln!(self.writer)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
