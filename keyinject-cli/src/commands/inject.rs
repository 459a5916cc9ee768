//! Inject and frame command implementations.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use keyinject::{
    DeviceBrand, InjectionEvent, InjectionStatus, Injector, NativePort, NoPoller, SharedPort, hex_dump,
    prepare_step,
};
use log::{debug, warn};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Inject command implementation.
pub(crate) fn cmd_inject(
    cli: &Cli,
    config: &Config,
    profile: &str,
    retry: u32,
    brand: Option<DeviceBrand>,
) -> Result<()> {
    let key_file = cli.key_file(config)?;
    let batch = key_file.batch(profile)?;

    let port_name = cli.port_name(config)?;
    let serial = cli.serial_config(config, &port_name);
    cli.status(
        style("🔌").cyan(),
        format!(
            "Injecting profile {} ({} keys) on {} @ {}",
            style(&batch.profile).bold(),
            batch.len(),
            port_name,
            serial.baud_rate
        ),
    );

    let mut injector = Injector::new(
        SharedPort::new(NativePort::new(&port_name)),
        serial,
        key_file.key_store(),
        NoPoller,
    )
    .with_timing(config.timing());
    if let Some(brand) = brand {
        injector = injector.with_brand_check(brand);
    }

    let pb = progress_bar(cli);
    let events = pb.clone();
    injector.on_event(move |event| match event {
        InjectionEvent::StateChanged(status) => events.set_message(status.to_string()),
        InjectionEvent::Progress {
            step_index,
            total_steps,
        } => {
            let percent = step_index.saturating_sub(1) * 100 / (*total_steps).max(1);
            events.set_position(percent as u64);
        },
        InjectionEvent::Log(line) => debug!("{line}"),
        InjectionEvent::Notice(message) => warn!("{message}"),
    });

    let mut result = injector.start(batch);
    let mut attempt = 0;
    while result.is_err() && attempt < retry && !was_interrupted() {
        attempt += 1;
        pb.suspend(|| warn!("Retrying from the first key ({attempt}/{retry})"));
        result = injector.retry();
    }

    if result.is_ok() {
        pb.finish_and_clear();
    } else {
        pb.abandon();
    }

    let state = injector.state();
    for line in &state.log {
        println!("{line}");
    }

    if was_interrupted() && result.is_err() {
        return Err(CliError::Cancelled("injection interrupted".to_string()).into());
    }
    result?;

    match state.status {
        InjectionStatus::Success => cli.status(
            style("✓").green().bold(),
            format!("Injected {} keys", state.total_steps),
        ),
        _ => cli.status(style("ℹ").blue(), "Nothing to inject"),
    }
    Ok(())
}

/// Frame command implementation: validate every step, then print the frames.
pub(crate) fn cmd_frame(cli: &Cli, config: &Config, profile: &str) -> Result<()> {
    let key_file = cli.key_file(config)?;
    let batch = key_file.batch(profile)?;
    let keys = key_file.key_store();

    // Nothing is printed until the whole batch validates.
    let frames = batch
        .steps
        .iter()
        .map(|step| prepare_step(&keys, step).map(|(_, command)| (step, command.encode())))
        .collect::<keyinject::Result<Vec<_>>>()?;

    if frames.is_empty() {
        cli.status(
            style("ℹ").blue(),
            format!("Profile {} has no key slots", batch.profile),
        );
        return Ok(());
    }

    cli.status(
        style("⚠").yellow(),
        "Frames carry clear key material; do not share this output",
    );

    let total = frames.len();
    for (index, (step, frame)) in frames.iter().enumerate() {
        println!(
            "# [{}/{}] {} slot {} ({})",
            index + 1,
            total,
            step.usage,
            step.slot,
            step.key_type
        );
        println!("{}", hex_dump(frame));
    }
    Ok(())
}
