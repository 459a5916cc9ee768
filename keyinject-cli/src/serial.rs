//! Serial port selection.
//!
//! Order of precedence:
//! - explicit `--port` / `KEYINJECT_PORT`
//! - `port.connection.serial` from the configuration
//! - auto-detection: a single recognized terminal link is used directly,
//!   several candidates prompt (or fail with `--non-interactive`)

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    keyinject::{DetectedPort, detect_ports, format_port_list},
    log::{debug, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Whether a port is a recognized terminal link (built-in or configured).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.is_configured_device(vid, pid),
        _ => false,
    }
}

/// Narrow `ports` down to the candidates worth offering.
fn candidates(ports: Vec<DetectedPort>, config: &Config) -> Vec<DetectedPort> {
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

/// Resolve the port name to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = candidates(detect_ports(), config);
    choose(ports, options.non_interactive)
}

fn choose(mut ports: Vec<DetectedPort>, non_interactive: bool) -> Result<String> {
    match ports.len() {
        0 => Err(usage_err("no serial ports found; connect the terminal or pass --port")),
        1 => {
            let port = ports.remove(0);
            info!("Auto-selected port: {} [{}]", port.name, port.device.name());
            Ok(port.name)
        },
        _ if non_interactive => Err(usage_err(
            "multiple serial ports found; pass --port in non-interactive mode",
        )),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "multiple serial ports found and no terminal to prompt on; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("port selection cancelled".to_string()).into()
            } else {
                usage_err("port selection prompt failed")
            }
        },
    }
}

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<String> {
    eprintln!(
        "{} {} serial ports found",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the terminal's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}
