use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use labelreg_engine::{
    Action, Application, ApplicationConfig, ApplicationDriver, ConsoleProgressCallback, RegApp,
    RegistrationParams,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[cfg(not(feature = "wgpu"))]
type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
#[cfg(feature = "wgpu")]
type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

#[derive(Parser)]
#[command(name = "labelreg")]
#[command(about = "Label-driven weakly-supervised image registration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a registration network
    Train(RunArgs),

    /// Run a trained network (not supported yet)
    Inference(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Seed for window sampling, overriding [SYSTEM] random_seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override [TRAINING] max_iter
    #[arg(long)]
    max_iter: Option<usize>,

    /// Log progress every N iterations
    #[arg(long, default_value_t = 10)]
    log_interval: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => run(args, Action::Train),
        Commands::Inference(args) => run(args, Action::Inference),
    }
}

fn run(args: RunArgs, action: Action) -> Result<()> {
    let mut config = ApplicationConfig::<RegistrationParams>::load_from_file(
        &args.config,
        <RegApp<TrainBackend> as Application<TrainBackend>>::REQUIRED_CONFIG_SECTION,
    )
    .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;

    config.system.action = action;
    if let Some(seed) = args.seed {
        config.system.random_seed = Some(seed);
    }
    if let Some(max_iter) = args.max_iter {
        config.action.max_iter = max_iter;
    }
    config.validate()?;

    info!(
        config = %args.config.display(),
        network = %config.network.name,
        action = ?config.system.action,
        "Loaded configuration"
    );

    let device = Default::default();
    let mut app = RegApp::<TrainBackend>::new(
        config.network.clone(),
        config.action.clone(),
        config.system.action.is_training(),
        &device,
    )
    .with_seed(config.system.random_seed);

    let mut driver = ApplicationDriver::new(config);
    driver.add_callback(Arc::new(ConsoleProgressCallback::new(args.log_interval)));

    let summary = driver.run::<TrainBackend, _>(&mut app)?;
    match &summary.checkpoint {
        Some(path) => info!(
            iterations = summary.iterations_run,
            checkpoint = %path.display(),
            "Training finished"
        ),
        None => info!(iterations = summary.iterations_run, "Training finished"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_overrides_parse() {
        let cli = Cli::try_parse_from([
            "labelreg", "train", "--config", "reg.toml", "--seed", "5", "--max-iter", "20",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.config, PathBuf::from("reg.toml"));
        assert_eq!(args.seed, Some(5));
        assert_eq!(args.max_iter, Some(20));
        assert_eq!(args.log_interval, 10);
    }
}
