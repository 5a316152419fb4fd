use std::path::PathBuf;

use anyhow::Context;
use capture_worker::{
    capture::{ScoopEngine, ScoopOptions},
    config::{Config, ConfigError},
    queue::RedisQueue,
    utils::DEFAULT_CONFIG_PATH,
    worker::{Worker, WorkerOptions},
};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use log::{debug, error, info};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Capture worker CLI", long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Process capture requests until terminated
    Run,
    /// Print the resolved capture settings and exit
    PrintSettings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                println!("{}", Args::command().render_usage());
                std::process::exit(2);
            }
        },
    };

    let config = Config::from_file(&args.config)
        .context(format!("could not load configuration from {:?}", args.config))?;
    debug!("loaded configuration {:#?}", config);

    match args.command {
        Command::PrintSettings => {
            println!("{}", serde_json::to_string_pretty(&config.capture_settings())?);
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| {
            ConfigError::Invalid(format!(
                "could not create outputDir {:?}: {}",
                config.output_dir, e
            ))
        })
        .context("invalid configuration")?;

    // the connection itself is opened lazily and retried by the worker
    let queue = RedisQueue::new(&config.queue_url())
        .context(format!("invalid queue address {}", config.queue_url()))?;

    let capture_command = config.capture_command();
    let mut parts = capture_command.split_whitespace().map(String::from);
    let command = parts
        .next()
        .ok_or(ConfigError::Invalid("captureCommand must not be empty".into()))?;
    let engine = ScoopEngine::new(
        ScoopOptions::default_builder()
            .command(command)
            .prefix_args(parts.collect::<Vec<String>>())
            .build()?,
    );

    let options = WorkerOptions::default_builder()
        .output_dir(config.output_dir.clone())
        .capture_settings(config.capture_settings())
        .request_queue(config.request_queue())
        .result_queue(config.result_queue())
        .build()?;

    debug!("starting worker with {:#?}", options);

    let mut worker = Worker::new(queue, engine, options);
    worker.run(shutdown_signal()).await;

    info!("{}", "worker stopped, goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
