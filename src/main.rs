use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use musecsv::device::{DeviceConfig, MuseClient};
use musecsv::mock::MockHeadset;
use musecsv::osc::{OscConfig, OscHeadset};
use musecsv::recorder::Recorder;
use musecsv::session::{Headset, Session};
use musecsv::sink::{CsvSink, DEFAULT_OUTPUT};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Append EEG readings from a Muse headset to a CSV file.
#[derive(Debug, Parser)]
#[command(name = "musecsv", version)]
struct Args {
    /// File the readings are appended to
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Bluetooth adapter to use instead of the default one
    #[arg(long)]
    adapter: Option<String>,

    /// Prefix of the headset's advertised name
    #[arg(long, default_value = "Muse")]
    name: String,

    /// Also stream the AUX electrode
    #[arg(long)]
    aux: bool,

    /// Seconds to wait for the headset during discovery
    #[arg(long, default_value_t = 10)]
    discovery_timeout: u64,

    /// Record from a synthetic headset instead of real hardware
    #[arg(long, conflicts_with = "osc")]
    mock: bool,

    /// Receive readings as OSC over UDP on this port instead of Bluetooth
    #[arg(long, value_name = "PORT")]
    osc: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "musecsv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let result = if args.mock {
        tracing::info!("Using synthetic headset");
        let (headset, emitter) = MockHeadset::new();
        let _generator = emitter.spawn_synthetic();
        record(headset, &args).await
    } else if let Some(port) = args.osc {
        let config = OscConfig::default().with_port(port);
        record(OscHeadset::new(config), &args).await
    } else {
        let mut config = DeviceConfig::default()
            .with_name_prefix(args.name.clone())
            .with_aux(args.aux)
            .with_discovery_timeout(Duration::from_secs(args.discovery_timeout));
        if let Some(adapter) = &args.adapter {
            config = config.with_adapter(adapter.clone());
        }
        record(MuseClient::new(config), &args).await
    };

    match result {
        Ok(records) => {
            tracing::info!(records, "recording finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn record<H: Headset>(headset: H, args: &Args) -> musecsv::Result<u64> {
    let sink = CsvSink::append(&args.output)?;
    let mut session = Session::new(headset);
    let mut recorder = Recorder::new(sink);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    recorder.run_until(&mut session, shutdown).await
}
