//! Raw diagnostic listener.

use anyhow::Result;
use console::style;
use keyinject::protocol::describe_response_code;
use keyinject::{DecodedResponse, Listener, ListenerEvent, NativePort, SharedPort, ascii_preview, hex_dump};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::{Cli, was_interrupted};

const WAIT_TICK: Duration = Duration::from_millis(100);

/// One line of listener output.
fn describe(event: &ListenerEvent) -> String {
    match event {
        ListenerEvent::Bytes(bytes) => format!("RX {}  |{}|", hex_dump(bytes), ascii_preview(bytes)),
        ListenerEvent::Frame(frame) => match frame {
            DecodedResponse::InjectKey(reply) => format!(
                "FRAME inject reply {} ({}) kcv={}",
                reply.response_code,
                describe_response_code(&reply.response_code),
                reply.key_checksum
            ),
            DecodedResponse::Command(reply) => format!(
                "FRAME command {} reply {} ({}) data={}",
                reply.command,
                reply.response_code,
                describe_response_code(&reply.response_code),
                reply.data
            ),
            DecodedResponse::Raw(raw) => format!("FRAME raw {}", raw.raw_payload),
        },
        ListenerEvent::ProtocolError(message) => format!("ERROR {message}"),
    }
}

/// Listen command implementation.
pub(crate) fn cmd_listen(cli: &Cli, config: &Config, seconds: Option<u64>) -> Result<()> {
    let port_name = cli.port_name(config)?;
    let serial = cli.serial_config(config, &port_name);
    cli.status(
        style("👂").cyan(),
        format!(
            "Listening on {} @ {} (Ctrl-C to stop)",
            port_name, serial.baud_rate
        ),
    );

    let listener = Listener::new(
        SharedPort::new(NativePort::new(&port_name)),
        serial,
        |event| println!("{}", describe(event)),
    );
    listener.start()?;

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while listener.is_running() && !was_interrupted() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(WAIT_TICK);
    }
    listener.stop();

    cli.status(style("✓").green(), "Listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyinject::protocol::{CommandResponse, InjectKeyResponse};

    #[test]
    fn test_describe_bytes() {
        let line = describe(&ListenerEvent::Bytes(vec![0x02, 0x30, 0x33, 0x03]));
        assert_eq!(line, "RX 02 30 33 03  |.03.|");
    }

    #[test]
    fn test_describe_inject_reply() {
        let line = describe(&ListenerEvent::Frame(DecodedResponse::InjectKey(
            InjectKeyResponse {
                response_code: "0C".to_string(),
                key_checksum: "AAAA".to_string(),
                trailer: String::new(),
                raw_payload: "020CAAAA".to_string(),
            },
        )));
        assert!(line.contains("0C (Invalid key slot)"));
        assert!(line.contains("kcv=AAAA"));
    }

    #[test]
    fn test_describe_command_reply() {
        let line = describe(&ListenerEvent::Frame(DecodedResponse::Command(
            CommandResponse {
                command: "03".to_string(),
                response_code: "00".to_string(),
                data: "ABCDEF0123456789".to_string(),
                raw_payload: "0300ABCDEF0123456789".to_string(),
            },
        )));
        assert!(line.starts_with("FRAME command 03 reply 00"));
        assert!(line.ends_with("data=ABCDEF0123456789"));
    }

    #[test]
    fn test_describe_protocol_error() {
        let line = describe(&ListenerEvent::ProtocolError("LRC mismatch".to_string()));
        assert_eq!(line, "ERROR LRC mismatch");
    }
}
