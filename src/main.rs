//! Binary entrypoint for the tuyalink CLI.
//!
//! Commands:
//! - `run [--port <path>] [--low-power]` - drive an MCU until interrupted
//! - `init` - write a starter `tuyalink.toml`
//! - `probe --port <path> [-b <baud>] [--timeout <s>]` - handshake once and print a JSON summary
//! - `decode <hex> [--low-power]` - decode captured frames offline
//!
//! See the library crate docs for module-level details: `tuyalink::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::time::Instant;

use tuyalink::config::Config;
use tuyalink::logutil::{escape_log, hex_pretty};
use tuyalink::tuya::datapoint::{decode_report, DecodeOptions};
use tuyalink::tuya::{FrameDecoder, ProtocolVariant};

#[derive(Parser)]
#[command(name = "tuyalink")]
#[command(about = "Host-side driver for Tuya serial MCU peripherals")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "tuyalink.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the link until Ctrl-C
    Run {
        /// MCU serial port (e.g., /dev/ttyUSB0); overrides the config file
        #[arg(short, long)]
        port: Option<String>,
        /// Use the low-power command set
        #[arg(long)]
        low_power: bool,
    },
    /// Write a default configuration file
    Init,
    /// Handshake with an MCU and print what it reports
    Probe {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 9600)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
        /// Use the low-power command set
        #[arg(long)]
        low_power: bool,
    },
    /// Decode hex-encoded wire bytes (separators allowed: space, '.', ':', ',')
    Decode {
        hex: String,
        /// Interpret command ids with the low-power command set
        #[arg(long)]
        low_power: bool,
        /// Treat integer datapoints as signed
        #[arg(long)]
        signed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    if !matches!(cli.command, Commands::Init) {
        init_logging(&pre_config, cli.verbose);
    }

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
        }
        Commands::Run { port, low_power } => {
            let mut config = pre_config.unwrap_or_else(|| {
                warn!("No usable config at {}, using defaults", cli.config);
                Config::default()
            });
            if let Some(port) = port {
                config.serial.port = port;
            }
            if low_power {
                config.protocol.variant = ProtocolVariant::LowPower;
            }
            info!("Starting tuyalink v{}", env!("CARGO_PKG_VERSION"));
            run::daemon(config).await?;
        }
        Commands::Probe {
            port,
            baud,
            timeout,
            low_power,
        } => {
            let mut config = pre_config.unwrap_or_default();
            config.serial.port = port;
            config.serial.baud_rate = baud;
            if low_power {
                config.protocol.variant = ProtocolVariant::LowPower;
            }
            let snapshot = run::probe(config, std::time::Duration::from_secs(timeout)).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Decode {
            hex,
            low_power,
            signed,
        } => {
            let variant = if low_power {
                ProtocolVariant::LowPower
            } else {
                ProtocolVariant::Standard
            };
            decode_hex(&hex, variant, signed)?;
        }
    }
    Ok(())
}

fn decode_hex(text: &str, variant: ProtocolVariant, signed: bool) -> Result<()> {
    let bytes = parse_hex(text)?;
    let profile = variant.profile();
    let mut decoder = FrameDecoder::default();
    let results = decoder.push(&bytes, Instant::now());
    if results.is_empty() {
        println!("No complete frame in {}", hex_pretty(&bytes));
    }
    for result in results {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                println!("Invalid frame: {}", e);
                continue;
            }
        };
        let name = profile.command_name(frame.command).unwrap_or("UNKNOWN");
        println!(
            "{} (0x{:02X}) v{} payload {}",
            name,
            frame.command,
            frame.version,
            hex_pretty(&frame.payload)
        );
        let carries_datapoints = frame.command == profile.datapoint_report
            || Some(frame.command) == profile.datapoint_deliver;
        if carries_datapoints {
            let report = decode_report(
                &frame.payload,
                DecodeOptions {
                    signed_integers: signed,
                },
            );
            for dp in &report.datapoints {
                println!("  Datapoint {}: {}", dp.id, dp.value);
            }
            for skipped in &report.skipped {
                println!("  Skipped: {}", skipped);
            }
            if let Some(truncated) = &report.truncated {
                println!("  Truncated: {}", truncated);
            }
        } else if frame.command == profile.product_query && !frame.payload.is_empty() {
            println!("  Product: '{}'", escape_log(&String::from_utf8_lossy(&frame.payload)));
        }
    }
    if decoder.is_receiving() {
        println!("{} trailing bytes form an incomplete frame", decoder.buffered());
    }
    Ok(())
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | ':' | ',' | '\n' | '\t'))
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if !digits.is_ascii() {
        return Err(anyhow!("input contains non-hex characters"));
    }
    if digits.len() % 2 != 0 {
        return Err(anyhow!("odd number of hex digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| anyhow!("invalid hex at offset {}: {}", i, e))
        })
        .collect()
}

#[cfg(feature = "serial")]
mod run {
    use anyhow::{anyhow, Result};
    use log::{info, warn};
    use std::time::Duration;
    use tokio::time::timeout;

    use tuyalink::config::Config;
    use tuyalink::link::{open_serial, spawn_link, LinkEvent, LinkSnapshot};
    use tuyalink::tuya::{ConnectivityFlags, ProtocolVariant, Session, SystemClock};

    fn build_session(config: &Config) -> Session {
        let connectivity = ConnectivityFlags::new(
            config.network.local_connected,
            config.network.cloud_connected,
        );
        let session = Session::new(config.link_tuning(), connectivity);
        if config.time.enabled {
            session.with_time_source(SystemClock)
        } else {
            session
        }
    }

    pub async fn daemon(config: Config) -> Result<()> {
        let port = open_serial(&config.serial.port, config.serial.baud_rate)?;
        info!("Connected to MCU on {}", config.serial.port);
        let (handle, mut events, join) =
            spawn_link(build_session(&config), port, config.link_options());
        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(LinkEvent::Initialized) => info!("MCU ready"),
                    Some(LinkEvent::DatapointUpdated(dp)) => info!("Datapoint {}: {}", dp.id, dp.value),
                    None => {
                        warn!("Link task ended");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    handle.shutdown().await?;
                    break;
                }
            }
        }
        join.await.map_err(|e| anyhow!("link task failed: {}", e))?;
        Ok(())
    }

    pub async fn probe(config: Config, limit: Duration) -> Result<LinkSnapshot> {
        let port = open_serial(&config.serial.port, config.serial.baud_rate)?;
        let low_power = config.protocol.variant == ProtocolVariant::LowPower;
        let (handle, mut events, _join) =
            spawn_link(build_session(&config), port, config.link_options());

        let wait = async {
            if low_power {
                // No handshake: ready once the product id is known.
                loop {
                    let snap = handle.snapshot().await?;
                    if snap.product.is_some() {
                        return Ok::<_, anyhow::Error>(());
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
            while let Some(ev) = events.recv().await {
                if ev == LinkEvent::Initialized {
                    // Give the first report's datapoints a moment to land.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    return Ok(());
                }
            }
            Err(anyhow!("link task ended before initialization"))
        };
        match timeout(limit, wait).await {
            Ok(result) => result?,
            Err(_) => warn!("MCU did not finish initializing within {:?}", limit),
        }
        let snapshot = handle.snapshot().await?;
        handle.shutdown().await?;
        Ok(snapshot)
    }
}

#[cfg(not(feature = "serial"))]
mod run {
    use anyhow::{anyhow, Result};
    use std::time::Duration;
    use tuyalink::config::Config;
    use tuyalink::link::LinkSnapshot;

    pub async fn daemon(_config: Config) -> Result<()> {
        Err(anyhow!("built without the `serial` feature"))
    }

    pub async fn probe(_config: Config, _limit: Duration) -> Result<LinkSnapshot> {
        Err(anyhow!("built without the `serial` feature"))
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only in the foreground
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
