//! keyinject CLI - Command-line tool for injecting keys into POS terminals.
//!
//! ## Features
//!
//! - Inject a profile's keys into a terminal over serial
//! - Dry-run framing of a profile without touching a port
//! - Terminal maintenance: serial number, key erase, brand check
//! - Raw diagnostic listener
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    keyinject::{DEFAULT_BAUD, DeviceBrand, SerialConfig},
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod keyfile;
mod serial;

use {
    config::Config,
    keyfile::KeyFile,
    serial::{SerialOptions, select_serial_port},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// keyinject - Load symmetric keys into POS terminals over a serial link.
///
/// Environment variables:
///   KEYINJECT_PORT              - Default serial port
///   KEYINJECT_BAUD              - Default baud rate (default: 115200)
///   KEYINJECT_KEYS              - Default key file
///   KEYINJECT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "keyinject")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "KEYINJECT_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "KEYINJECT_BAUD")]
    baud: Option<u32>,

    /// Key file with stored keys and profiles.
    #[arg(short, long, global = true, env = "KEYINJECT_KEYS", value_name = "FILE")]
    keys: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "KEYINJECT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Inject every key of a profile, in order.
    Inject {
        /// Profile name from the key file.
        profile: String,

        /// Re-run the whole batch up to N more times after a failure.
        #[arg(long, value_name = "N", default_value_t = 0)]
        retry: u32,

        /// Check the terminal brand (AISINO, NEWPOS, UROVO) before the first key.
        #[arg(long, value_name = "BRAND")]
        brand: Option<DeviceBrand>,
    },

    /// Validate a profile and print its frames without opening a port.
    Frame {
        /// Profile name from the key file.
        profile: String,
    },

    /// Read or write the terminal serial number.
    Serial {
        #[command(subcommand)]
        action: SerialAction,
    },

    /// Erase keys from the terminal.
    Erase {
        /// Erase every key.
        #[arg(long, conflicts_with_all = ["slot", "key_type"])]
        all: bool,

        /// Slot to erase (2 hex digits).
        #[arg(long, requires = "key_type")]
        slot: Option<String>,

        /// Key type label of the slot to erase (e.g. "PIN").
        #[arg(long, requires = "slot")]
        key_type: Option<String>,
    },

    /// Ask the terminal whether it is of the given brand.
    Brand {
        /// Expected brand: AISINO, NEWPOS or UROVO (or its code 00/01/02).
        brand: DeviceBrand,
    },

    /// Print every frame the terminal sends.
    Listen {
        /// Stop after this many seconds (default: until Ctrl-C).
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Serial number actions.
#[derive(Subcommand)]
enum SerialAction {
    /// Print the terminal serial number.
    Read,
    /// Set the terminal serial number (16 alphanumeric characters).
    Write {
        /// New serial number.
        serial: String,
    },
}

impl Cli {
    /// Resolve the port name (flag, env, config, detection, prompt).
    fn port_name(&self, config: &Config) -> Result<String> {
        let options = SerialOptions {
            port: self.port.clone(),
            non_interactive: self.non_interactive,
        };
        select_serial_port(&options, config)
    }

    /// Line settings for `port_name`.
    fn serial_config(&self, config: &Config, port_name: &str) -> SerialConfig {
        let baud = self
            .baud
            .or(config.port.connection.baud)
            .unwrap_or(DEFAULT_BAUD);
        SerialConfig::new(port_name, baud)
    }

    /// Load the key file named by flag, env or config.
    fn key_file(&self, config: &Config) -> Result<KeyFile> {
        let path = self
            .keys
            .as_ref()
            .or(config.keys.file.as_ref())
            .ok_or_else(|| {
                CliError::Usage(
                    "no key file given; pass --keys FILE or set keys.file in the config".to_string(),
                )
            })?;
        KeyFile::load(path)
    }

    /// Print a status line to stderr unless quiet.
    fn status(&self, icon: console::StyledObject<&str>, message: impl std::fmt::Display) {
        if !self.quiet {
            eprintln!("{icon} {message}");
        }
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "keyinject v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    keyinject::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Inject {
            profile,
            retry,
            brand,
        } => commands::inject::cmd_inject(cli, config, profile, *retry, *brand),
        Commands::Frame { profile } => commands::inject::cmd_frame(cli, config, profile),
        Commands::Serial { action } => match action {
            SerialAction::Read => commands::maintenance::cmd_serial_read(cli, config),
            SerialAction::Write { serial } => {
                commands::maintenance::cmd_serial_write(cli, config, serial)
            },
        },
        Commands::Erase {
            all,
            slot,
            key_type,
        } => commands::maintenance::cmd_erase(cli, config, *all, slot.as_deref(), key_type.as_deref()),
        Commands::Brand { brand } => commands::maintenance::cmd_brand(cli, config, *brand),
        Commands::Listen { seconds } => commands::listen::cmd_listen(cli, config, *seconds),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_inject() {
        let cli = Cli::try_parse_from([
            "keyinject",
            "--port",
            "/dev/ttyUSB0",
            "--keys",
            "keys.toml",
            "inject",
            "retail",
            "--retry",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.keys, Some(PathBuf::from("keys.toml")));
        assert!(matches!(
            cli.command,
            Commands::Inject { ref profile, retry: 2, brand: None } if profile == "retail"
        ));
    }

    #[test]
    fn test_cli_parse_brand_options() {
        let cli = Cli::try_parse_from(["keyinject", "inject", "retail", "--brand", "newpos"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Inject {
                brand: Some(DeviceBrand::Newpos),
                ..
            }
        ));

        let cli = Cli::try_parse_from(["keyinject", "brand", "02"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Brand {
                brand: DeviceBrand::Urovo
            }
        ));

        assert!(Cli::try_parse_from(["keyinject", "brand", "verifone"]).is_err());
    }

    #[test]
    fn test_cli_parse_serial_write() {
        let cli = Cli::try_parse_from(["keyinject", "serial", "write", "ABCDEF0123456789"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serial {
                action: SerialAction::Write { ref serial }
            } if serial == "ABCDEF0123456789"
        ));
    }

    #[test]
    fn test_cli_erase_slot_requires_key_type() {
        assert!(Cli::try_parse_from(["keyinject", "erase", "--slot", "01"]).is_err());
        assert!(Cli::try_parse_from(["keyinject", "erase", "--all", "--slot", "01", "--key-type", "PIN"]).is_err());
        assert!(Cli::try_parse_from(["keyinject", "erase", "--slot", "01", "--key-type", "PIN"]).is_ok());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "keyinject",
            "list-ports",
            "--baud",
            "9600",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/config.toml",
        ])
        .unwrap();
        assert_eq!(cli.baud, Some(9600));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/config.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["keyinject"]).is_err());
    }

    #[test]
    fn test_serial_config_baud_precedence() {
        let mut config = Config::default();
        let cli = Cli::try_parse_from(["keyinject", "list-ports"]).unwrap();
        assert_eq!(cli.serial_config(&config, "COM1").baud_rate, DEFAULT_BAUD);

        config.port.connection.baud = Some(57600);
        assert_eq!(cli.serial_config(&config, "COM1").baud_rate, 57600);

        let cli = Cli::try_parse_from(["keyinject", "-b", "9600", "list-ports"]).unwrap();
        assert_eq!(cli.serial_config(&config, "COM1").baud_rate, 9600);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
        let wrapped = anyhow::Error::from(CliError::Usage("x".into())).context("outer");
        assert_eq!(exit_code(&wrapped), 2);
    }

    #[test]
    fn test_missing_key_file_is_usage_error() {
        let cli = Cli::try_parse_from(["keyinject", "frame", "retail"]).unwrap();
        let err = cli.key_file(&Config::default()).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }
}
