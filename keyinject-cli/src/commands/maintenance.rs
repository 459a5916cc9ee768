//! Terminal maintenance: serial number, key erase and brand check.

use anyhow::Result;
use console::style;
use keyinject::protocol::futurex::RESPONSE_BRAND_MISMATCH;
use keyinject::{BrandCheck, DeviceBrand, Error, NativePort, Session, SharedPort};

use crate::config::Config;
use crate::{Cli, CliError};

fn open_session(cli: &Cli, config: &Config) -> Result<Session<NativePort>> {
    let port_name = cli.port_name(config)?;
    let serial = cli.serial_config(config, &port_name);
    cli.status(
        style("🔌").cyan(),
        format!("Using {} @ {}", port_name, serial.baud_rate),
    );
    Ok(Session::new(SharedPort::new(NativePort::new(&port_name)), serial))
}

/// Print the terminal serial number to stdout.
pub(crate) fn cmd_serial_read(cli: &Cli, config: &Config) -> Result<()> {
    let serial = open_session(cli, config)?.read_serial()?;
    println!("{serial}");
    Ok(())
}

/// Write a new serial number.
pub(crate) fn cmd_serial_write(cli: &Cli, config: &Config, serial: &str) -> Result<()> {
    open_session(cli, config)?.write_serial(serial)?;
    cli.status(
        style("✓").green().bold(),
        format!("Serial number set to {serial}"),
    );
    Ok(())
}

/// Erase all keys, or the key in one slot.
pub(crate) fn cmd_erase(
    cli: &Cli,
    config: &Config,
    all: bool,
    slot: Option<&str>,
    key_type: Option<&str>,
) -> Result<()> {
    match (all, slot, key_type) {
        (true, _, _) => {
            open_session(cli, config)?.delete_all_keys()?;
            cli.status(style("✓").green().bold(), "All keys erased");
        },
        (false, Some(slot), Some(key_type)) => {
            open_session(cli, config)?.delete_key(slot, key_type)?;
            cli.status(
                style("✓").green().bold(),
                format!("Erased {key_type} in slot {slot}"),
            );
        },
        _ => {
            return Err(CliError::Usage(
                "pass --all, or --slot together with --key-type".to_string(),
            )
            .into());
        },
    }
    Ok(())
}

/// Check the terminal brand; a mismatch is a failure.
pub(crate) fn cmd_brand(cli: &Cli, config: &Config, expected: DeviceBrand) -> Result<()> {
    match open_session(cli, config)?.validate_brand(expected)? {
        BrandCheck::Match => {
            cli.status(
                style("✓").green().bold(),
                format!("Terminal brand is {expected}"),
            );
            Ok(())
        },
        BrandCheck::Mismatch { actual } => Err(Error::Device {
            code: RESPONSE_BRAND_MISMATCH.to_string(),
            description: format!(
                "Device brand mismatch: expected {expected}, terminal reports {actual}"
            ),
        }
        .into()),
    }
}
