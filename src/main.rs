use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mecanum_chassis_runtime::config::ChassisConfig;

/// Real-time mecanum chassis controller
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the fieldbus adapter, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Run without the fieldbus adapter; outbound frames are discarded
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ChassisConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => ChassisConfig::default(),
    };
    if let Some(port) = args.port {
        config.bus.port = port;
    }
    if let Some(path) = &args.config {
        info!("Loaded configuration from {}", path.display());
    }

    if let Err(e) = mecanum_chassis_runtime::runtime::run(config, args.dry_run).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
