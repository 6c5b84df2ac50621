use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use greenhouse_core::{
    BleSession, DeviceHandle, FileAddressStore, SERIES_GAP, SensorHub, SensorRecord, split_series,
};

#[derive(Parser)]
#[command(name = "greenhouse")]
#[command(author, version, about = "CLI for greenhouse temperature and humidity sensors", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby sensors
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Read the most recent record from a sensor
    Current {
        /// Device address (MAC address or UUID); defaults to the remembered one
        #[arg(short, long)]
        device: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Download stored history from a sensor
    History {
        /// Device address (MAC address or UUID); defaults to the remembered one
        #[arg(short, long)]
        device: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the remembered sensor
    Forget,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = FileAddressStore::from_platform_dir().context("no device store location")?;

    // Forget needs no radio
    if let Commands::Forget = cli.command {
        store.clear().await.context("failed to clear device store")?;
        if !cli.quiet {
            println!("Remembered sensor cleared.");
        }
        return Ok(());
    }

    let session = Arc::new(BleSession::new().await.context("no BLE adapter available")?);
    let hub = SensorHub::new(session, Arc::new(store));

    match cli.command {
        Commands::Scan { timeout } => {
            if !cli.quiet {
                tracing::info!("Scanning for sensors (timeout: {}s)...", timeout);
            }
            let mut rx = hub
                .scan_for_devices(Duration::from_secs(timeout))
                .await
                .context("scan failed to start")?;
            let mut found = 0usize;
            while let Some(device) = rx.recv().await {
                found += 1;
                println!("  {} ({})", device.name, device.address);
            }
            if !cli.quiet {
                println!("Found {found} device(s).");
            }
        }
        Commands::Current { device, format } => {
            connect(&hub, device).await?;
            match hub.current_record().await {
                Some(record) => print_record(&record, &format)?,
                None => anyhow::bail!("no current record available"),
            }
            hub.disconnect().await;
        }
        Commands::History { device, format } => {
            connect(&hub, device).await?;
            let mut rx = hub.record_history();
            let mut latest = Vec::new();
            while let Some(snapshot) = rx.recv().await {
                latest = snapshot;
            }
            hub.disconnect().await;
            if latest.is_empty() {
                anyhow::bail!("no history records available");
            }
            print_history(&latest, &format)?;
        }
        Commands::Forget => unreachable!(),
    }

    Ok(())
}

/// Register an explicitly chosen device with the hub; with none given the
/// hub falls back to the remembered address on first use.
async fn connect(hub: &SensorHub<BleSession>, device: Option<String>) -> Result<()> {
    if let Some(address) = device {
        hub.connect(Some(DeviceHandle::new(address, "<unknown>")))
            .await?;
    }
    Ok(())
}

fn print_record(record: &SensorRecord, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(record)?),
        "text" => println!("{record}"),
        other => anyhow::bail!("unknown format: {other}"),
    }
    Ok(())
}

fn print_history(records: &[SensorRecord], format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(records)?),
        "text" => {
            // Blank line between runs where the sensor missed samples
            let runs = split_series(records, SERIES_GAP);
            for (i, run) in runs.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                for record in run {
                    println!("{record}");
                }
            }
            println!("\n{} record(s) in {} series.", records.len(), runs.len());
        }
        other => anyhow::bail!("unknown format: {other}"),
    }
    Ok(())
}
