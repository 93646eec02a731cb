//! The UDP command endpoint.
//!
//! Accepts `[{"command":"<string>"}]` datagrams on port 8400 and turns
//! them into mailbox posts; the processor applies them at its next
//! iteration. The socket polls with a read timeout so the thread observes
//! the stop flag without needing a signal delivered into `recvfrom`.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use metamac_core::{Command, CommandMailbox};

/// Commands arrive on this port.
pub const COMMAND_PORT: u16 = 8400;

#[derive(Debug, Deserialize)]
struct CommandMessage {
    command: String,
}

/// Serve commands until the stop flag is raised.
pub fn serve(
    mailbox: CommandMailbox,
    protocol_count: usize,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, COMMAND_PORT))
        .context("binding command socket")?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .context("setting command socket timeout")?;
    info!(port = COMMAND_PORT, "command endpoint listening");

    let mut buf = [0u8; 512];
    while !stop.load(Ordering::Acquire) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(err) => return Err(err).context("receiving command"),
        };

        let payload = String::from_utf8_lossy(&buf[..len]);
        match parse_command(&payload, protocol_count) {
            Some(command) => {
                info!(%peer, ?command, "command received");
                mailbox.post(command);
            }
            None => {
                warn!(%peer, %payload, "unrecognised command ignored");
            }
        }
    }

    Ok(())
}

/// Map a datagram payload to a command, or `None` if unrecognised.
fn parse_command(payload: &str, protocol_count: usize) -> Option<Command> {
    let messages: Vec<CommandMessage> = serde_json::from_str(payload).ok()?;
    let command = &messages.first()?.command;

    if command == "METAMAC" {
        return Some(Command::Learn);
    }
    if command == "ALOHA" {
        return Some(Command::Pin(protocol_count.checked_sub(1)?));
    }
    if let Some(n) = command
        .strip_prefix("Protocol ")
        .or_else(|| command.strip_prefix("TDMA "))
    {
        let n: usize = n.parse().ok()?;
        if n >= 1 {
            return Some(Command::Pin(n - 1));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"[{"command":"METAMAC"}]"#, Some(Command::Learn); "resume learning")]
    #[test_case(r#"[{"command":"Protocol 1"}]"#, Some(Command::Pin(0)); "protocol by number")]
    #[test_case(r#"[{"command":"TDMA 3"}]"#, Some(Command::Pin(2)); "tdma alias")]
    #[test_case(r#"[{"command":"ALOHA"}]"#, Some(Command::Pin(4)); "aloha pins the last")]
    #[test_case(r#"[{"command":"Protocol 0"}]"#, None; "protocols count from one")]
    #[test_case(r#"[{"command":"slot1"}]"#, None; "unknown command")]
    #[test_case(r#"{"command":"METAMAC"}"#, None; "not a list")]
    #[test_case("not json", None; "not json")]
    fn parses_the_wire_vocabulary(payload: &str, expected: Option<Command>) {
        assert_eq!(parse_command(payload, 5), expected);
    }

    #[test]
    fn end_to_end_post_to_mailbox() {
        let mailbox = CommandMailbox::new();
        let stop = Arc::new(AtomicBool::new(false));

        let server = {
            let mailbox = mailbox.clone();
            let stop = stop.clone();
            std::thread::spawn(move || serve(mailbox, 3, stop))
        };

        // Give the server a moment to bind.
        std::thread::sleep(Duration::from_millis(50));
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        client
            .send_to(
                br#"[{"command":"Protocol 2"}]"#,
                (Ipv4Addr::LOCALHOST, COMMAND_PORT),
            )
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut received = None;
        while received.is_none() && std::time::Instant::now() < deadline {
            received = mailbox.take();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(received, Some(Command::Pin(1)));

        stop.store(true, Ordering::Release);
        server.join().unwrap().unwrap();
    }
}
