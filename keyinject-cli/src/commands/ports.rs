//! Serial port listing.

use anyhow::Result;
use console::style;
use keyinject::{DetectedPort, detect_ports, format_port_list};

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", ports_json(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    let preferred = keyinject::device::select_port(&detected).map(|p| p.name.clone());
    for (port, line) in detected.iter().zip(format_port_list(&detected)) {
        let marker = if preferred.as_deref() == Some(port.name.as_str()) {
            style("→").green().bold().to_string()
        } else {
            style("•").dim().to_string()
        };
        eprintln!("  {marker} {line}");
    }
    Ok(())
}

fn ports_json(ports: &[DetectedPort]) -> Result<String> {
    let output = serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}
