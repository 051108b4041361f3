use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use rxtx_config::SyncConfig;

#[derive(Parser)]
#[command(
    name = "rxtxsync",
    version,
    about = "Mirror the Rx SSB demodulator offset to the Tx SSB modulator and align the second Rx center frequency (SDRangel)"
)]
struct Cli {
    /// Fixed frequency shift offset in Hz added to the Rx offset
    #[arg(long, allow_negative_numbers = true)]
    offset: Option<i64>,
    /// SDRangel host (default: localhost)
    #[arg(long)]
    host: Option<String>,
    /// SDRangel REST API port (default: 8091)
    #[arg(long)]
    port: Option<u16>,
    /// Sync delay in seconds (default: 0.3)
    #[arg(long, allow_negative_numbers = true)]
    delay: Option<f64>,
    /// Run one iteration and exit
    #[arg(long)]
    once: bool,
    /// Print a line per iteration and enable debug logging
    #[arg(short, long)]
    verbose: bool,
    /// Config file (default: .rxtxsync.toml in the current directory, if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::load_from_dir(&PathBuf::from("."))?,
        };

        if let Some(offset) = self.offset {
            config.offset_hz = offset;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        config.once = self.once;
        config.verbose = self.verbose;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // debug nur für die eigenen Crates, reqwest/hyper bleiben auf info
    let log_level = if cli.verbose {
        "info,rxtx_sync=debug,rxtxsync=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = cli.load_config()?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let stats = rxtx_sync::run_sync(config, shutdown).await?;
    log::debug!(
        "{} iteration(s), {} failure(s), {} Tx write(s), {} alignment write(s)",
        stats.iterations,
        stats.failures,
        stats.tx_writes,
        stats.align_writes
    );

    Ok(ExitCode::SUCCESS)
}
