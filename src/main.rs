use clap::Parser;
use tickwatch::cli::{Cli, Commands};
use tickwatch::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            Config::from_toml(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    let _telemetry = tickwatch::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting tick engine");
            args.execute(&config).await?;
        }
        Commands::Aggregate(args) => {
            tracing::info!("Running aggregation pass");
            args.execute(&config).await?;
        }
        Commands::Unsubscribe(args) => {
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("# Effective configuration");
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
