use piifilter::cli::{Cli, Commands, ConfigAction, SubmitAction};
use piifilter::config::Config;
use piifilter::daemon::Service;
use piifilter::error::{PiiFilterError, Result};
use piifilter::ocr::TesseractDetector;
use piifilter::storage::RedisFactStore;
use piifilter::submit::Submitter;
use piifilter::transport::RedisBroker;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve => {
            cmd_serve(cli.config)?;
        }
        Commands::Ocr => {
            cmd_ocr(cli.config)?;
        }
        Commands::Submit { action } => {
            cmd_submit(cli.config, action)?;
        }
        Commands::Status => {
            cmd_status(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "piifilter=debug" } else { "piifilter=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| PiiFilterError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("Configuration loaded successfully");

    let service = Service::new(config);
    runtime()?.block_on(service.run_filter())?;
    Ok(())
}

fn cmd_ocr(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let detector = TesseractDetector::new(&config.ocr);
    let service = Service::new(config);

    runtime()?.block_on(async {
        match detector.version().await {
            Ok(version) => tracing::info!("Using {}", version),
            Err(e) => {
                tracing::error!("Text detector is not usable: {}", e);
                return Err(e);
            }
        }
        service.run_ocr(Arc::new(detector)).await
    })?;
    Ok(())
}

fn cmd_submit(config_path: Option<PathBuf>, action: SubmitAction) -> Result<()> {
    let config = load_config(config_path)?;

    runtime()?.block_on(async {
        let broker = RedisBroker::connect(&config.broker.url, config.broker.timeout()).await?;
        let submitter = Submitter::new(
            Arc::new(broker),
            config.queues.inbound.clone(),
            config.queues.ocr.clone(),
        );

        match action {
            SubmitAction::Terms { img_id, terms } => {
                let img_id = img_id.unwrap_or_else(Submitter::new_job_id);
                submitter.submit_terms(&img_id, terms).await?;
                println!("✓ Terms submitted for img_id {}", img_id);
            }
            SubmitAction::Image { img_id, path } => {
                let img_id = img_id.unwrap_or_else(Submitter::new_job_id);
                submitter.submit_image_file(&img_id, &path).await?;
                println!("✓ Image submitted for img_id {}", img_id);
            }
        }
        Ok(())
    })
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("piifilter Status");
    println!("================");

    runtime()?.block_on(async {
        match RedisBroker::connect(&config.broker.url, config.broker.timeout()).await {
            Ok(broker) => {
                let reachable = broker.ping().await.is_ok();
                println!(
                    "\nBroker: {} ({})",
                    config.broker.url,
                    if reachable { "reachable" } else { "not responding" }
                );

                for queue in [
                    &config.queues.inbound,
                    &config.queues.ocr,
                    &config.queues.outbound,
                ] {
                    match broker.depths(queue).await {
                        Ok(depths) => println!(
                            "  {}: {} pending, {} processing, {} dead",
                            queue, depths.pending, depths.processing, depths.dead
                        ),
                        Err(e) => println!("  {}: unavailable ({})", queue, e),
                    }
                }
            }
            Err(e) => println!("\nBroker: {} (unreachable: {})", config.broker.url, e),
        }

        let store_url = config.store.url();
        let store_state = match RedisFactStore::connect(&store_url, config.store.options()).await {
            Ok(store) => match store.ping().await {
                Ok(()) => "reachable".to_string(),
                Err(e) => format!("not responding: {}", e),
            },
            Err(e) => format!("unreachable: {}", e),
        };
        println!("\nStore: {} ({})", store_url, store_state);
    });

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PiiFilterError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

/// Load the config file, or defaults plus environment overrides when absent
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path.map(Ok).unwrap_or_else(Config::default_path) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("{}, using defaults", e);
            return Config::from_env();
        }
    };

    if !path.exists() {
        tracing::warn!(
            "Config file {} not found, using defaults. Run 'piifilter config init' to create one.",
            path.display()
        );
        return Config::from_env();
    }

    Config::load(&path)
}
