use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::CommandFactory;
use tracing::{error, info};
use twelf::Layer;

use metamac_core::{
    CommandMailbox, Processor, ProcessorConfig, ProtocolSuite, ReaderConfig, SlotQueue, SlotReader,
};

mod args;
mod command;
mod config;
mod debugfs;
mod display;
mod monitor;
mod realtime;
mod slotlog;
mod telemetry;

use args::Config;
use debugfs::DebugfsDevice;
use display::Display;
use monitor::DaemonMonitor;
use slotlog::SlotLogger;
use telemetry::Telemetry;

fn main() -> Result<()> {
    let matches = Config::command().get_matches();
    let config = Config::with_layers(&[
        Layer::Env(Some(String::from("METAMAC_"))),
        Layer::Clap(matches),
    ])?;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.log_level))
        .init();

    let loaded = config::load_suite(&config.config, config.eta)?;
    info!(
        protocols = loaded.protocols.len(),
        eta = loaded.eta,
        "protocol suite loaded"
    );

    let device = Arc::new(DebugfsDevice::new(&config.device_dir).context("opening device")?);
    let queue = Arc::new(SlotQueue::default());
    let stop = Arc::new(AtomicBool::new(false));
    let mailbox = CommandMailbox::new();

    let mut suite = ProtocolSuite::new(loaded.protocols, loaded.eta, config.cycle, loaded.initial);
    suite
        .initialise(&*device, config.readonly)
        .context("loading initial protocol")?;

    // The interrupt handler only raises the stop flag and wakes the
    // consumer; teardown happens on the main thread.
    {
        let stop = stop.clone();
        let queue = queue.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
            queue.signal();
        })
        .context("installing interrupt handler")?;
    }

    let reader_thread = {
        let reader_config = ReaderConfig {
            slot_time: config.slot_time,
            read_interval: config.read_interval,
            use_busy: config.use_busy,
        };
        let mut reader = SlotReader::new(
            device.clone(),
            queue.clone(),
            reader_config,
            stop.clone(),
        )
        .context("priming slot reader")?;

        std::thread::Builder::new()
            .name("metamac-reader".into())
            .spawn(move || {
                realtime::promote_current_thread(realtime::READER_PRIORITY);
                reader.run()
            })
            .context("spawning reader thread")?
    };

    let command_thread = {
        let mailbox = mailbox.clone();
        let stop = stop.clone();
        let protocol_count = suite.len();
        std::thread::Builder::new()
            .name("metamac-command".into())
            .spawn(move || command::serve(mailbox, protocol_count, stop))
            .context("spawning command thread")?
    };

    let logger = match &config.logfile {
        Some(path) => {
            info!(path = %path.display(), "logging slots");
            Some(SlotLogger::create(path, &suite).context("creating slot log")?)
        }
        None => None,
    };
    let display = config.verbose.then(Display::new);
    let telemetry = match config.remote_logging {
        Some(collector) => Some(Telemetry::new(collector).context("opening telemetry socket")?),
        None => None,
    };

    let mut processor = Processor::new(
        queue,
        device,
        suite,
        mailbox,
        DaemonMonitor::new(logger, display, telemetry),
        ProcessorConfig {
            readonly: config.readonly,
            ..Default::default()
        },
        stop.clone(),
    );
    let processor_result = processor.run();

    // The processor only returns once the stop flag is up (or it raised
    // the flag itself on a fatal error); collect the other threads.
    stop.store(true, Ordering::Release);
    let reader_result = match reader_thread.join() {
        Ok(result) => result.context("reader loop failed"),
        Err(_) => {
            error!("reader thread panicked");
            Ok(())
        }
    };
    match command_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "command receiver failed"),
        Err(_) => error!("command thread panicked"),
    }

    processor_result.context("processor loop failed")?;
    reader_result?;
    info!("shut down cleanly");
    Ok(())
}
