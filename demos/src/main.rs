//! CPO demo: point-mass navigation past a hazard.
//!
//! ```bash
//! # Train with 8 worker threads, cost limit 10 per episode
//! cargo run --release -p constrained_rl_demos -- train --num-envs 8 --cost-limit 10
//!
//! # Resume from a checkpoint
//! cargo run --release -p constrained_rl_demos -- train --resume checkpoints/model_100.bin
//!
//! # Deterministic rollouts of a saved policy
//! cargo run --release -p constrained_rl_demos -- play checkpoints/model_200.bin
//! ```

mod point_hazard;

use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use burn::optim::Optimizer;
use clap::{Parser, Subcommand};
use constrained_rl::environment::RenderMode;
use constrained_rl::{
    create_critic_optimizer, Checkpointer, CheckpointerConfig, ConsoleLogger, Cpo, CpoConfig, CpoRunner,
    CsvLogger, DummyVecEnv, MlpConfig, MlpCritic, MlpGaussianPolicy, MultiLogger, RunnerError, SubprocVecEnv,
    VecEnv,
};

use point_hazard::{PointHazardEnv, ACTION_DIM, OBS_SIZE};

type B = Autodiff<NdArray<f32>>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Environments stepped in parallel
    #[arg(short, long, default_value_t = 8, global = true)]
    num_envs: usize,

    /// Episode length limit
    #[arg(long, default_value_t = 200, global = true)]
    horizon: usize,

    /// Base random seed; environment i uses seed + i
    #[arg(short, long, default_value_t = 0, global = true)]
    seed: u64,

    /// Step environments on the calling thread instead of worker threads
    #[arg(long, global = true)]
    sequential: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a policy
    Train {
        /// Learning iterations
        #[arg(short, long, default_value_t = 200)]
        iterations: usize,

        /// Expected episode cost allowed
        #[arg(short, long, default_value_t = 10.0)]
        cost_limit: f32,

        /// JSON file with a full CPO configuration
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,

        /// Iterations between checkpoints
        #[arg(long, default_value_t = 50)]
        save_interval: usize,

        /// Checkpoint to resume from
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Also write metrics to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Run a saved policy deterministically
    Play {
        checkpoint: PathBuf,

        /// Batch steps to run
        #[arg(long, default_value_t = 1000)]
        steps: usize,

        /// Print environment states every step
        #[arg(long)]
        render: bool,
    },
}

fn load_config(path: Option<&PathBuf>, cost_limit: f32, horizon: usize) -> Result<CpoConfig, RunnerError> {
    let config = match path {
        Some(path) => CpoConfig::from_json_file(path)?,
        None => CpoConfig::new()
            .with_cost_limit(cost_limit)
            .with_num_transitions_per_env(horizon),
    };
    Ok(config.build()?)
}

fn factories(args: &Args) -> Vec<impl FnOnce() -> PointHazardEnv + Send + 'static> {
    let (seed, horizon) = (args.seed, args.horizon);
    (0..args.num_envs as u64)
        .map(move |i| move || PointHazardEnv::new(seed + i, horizon))
        .collect()
}

fn build_runner<V: VecEnv>(
    config: CpoConfig,
    envs: V,
) -> Result<CpoRunner<B, MlpGaussianPolicy<B>, MlpCritic<B>, impl Optimizer<MlpCritic<B>, B>, V>, RunnerError> {
    let device = Default::default();
    let mlp = MlpConfig::default();
    let cpo = Cpo::new(
        config.clone(),
        mlp.init_policy::<B>(OBS_SIZE, ACTION_DIM, &device),
        mlp.init_critic::<B>(OBS_SIZE, &device),
        mlp.init_critic::<B>(OBS_SIZE, &device),
        create_critic_optimizer(&config),
        create_critic_optimizer(&config),
        device,
    );
    CpoRunner::new(cpo, envs)
}

fn train<V: VecEnv>(envs: V, command: &Commands, horizon: usize) -> Result<(), RunnerError> {
    let Commands::Train {
        iterations,
        cost_limit,
        config,
        checkpoint_dir,
        save_interval,
        resume,
        csv,
    } = command
    else {
        return Ok(());
    };

    let config = load_config(config.as_ref(), *cost_limit, horizon)?;
    println!("=== CPO Point Hazard ===");
    println!("{}", config.to_json_string()?);
    println!();

    let mut loggers = MultiLogger::new().add(ConsoleLogger::new(config.log_interval));
    if let Some(path) = csv {
        loggers = loggers.add(CsvLogger::create(path)?);
    }
    let checkpointer = Checkpointer::new(
        CheckpointerConfig::new(checkpoint_dir).with_save_interval(*save_interval),
    )?;

    let mut runner = build_runner(config, envs)?
        .with_logger(loggers)
        .with_checkpointer(checkpointer);
    if let Some(path) = resume {
        runner.load_checkpoint(path)?;
    }

    let history = runner.learn(*iterations)?;
    runner.close()?;

    println!();
    println!("=== Training Complete ===");
    if let Some(last) = history.last() {
        println!(
            "  Final window: reward {:?}, cost {:?}, length {:?}",
            last.mean_reward, last.mean_cost, last.mean_length
        );
    }
    Ok(())
}

fn play<V: VecEnv>(envs: V, command: &Commands, horizon: usize) -> Result<(), RunnerError> {
    let Commands::Play {
        checkpoint,
        steps,
        render,
    } = command
    else {
        return Ok(());
    };

    let config = CpoConfig::new().with_num_transitions_per_env(horizon);
    let mut runner = build_runner(config, envs)?;
    runner.load_checkpoint(checkpoint)?;

    let episodes = runner.play(*steps, render.then_some(RenderMode::Human))?;
    runner.close()?;

    let n = episodes.len().max(1) as f32;
    println!("=== Evaluation ===");
    println!("  Episodes: {}", episodes.len());
    println!("  Mean reward: {:.3}", episodes.iter().map(|e| e.reward).sum::<f32>() / n);
    println!("  Mean cost:   {:.3}", episodes.iter().map(|e| e.cost).sum::<f32>() / n);
    Ok(())
}

fn run(args: &Args) -> Result<(), RunnerError> {
    let command = &args.command;
    let horizon = args.horizon;
    match (command, args.sequential) {
        (Commands::Train { .. }, false) => train(SubprocVecEnv::new(factories(args))?, command, horizon),
        (Commands::Train { .. }, true) => train(DummyVecEnv::new(factories(args))?, command, horizon),
        (Commands::Play { .. }, false) => play(SubprocVecEnv::new(factories(args))?, command, horizon),
        (Commands::Play { .. }, true) => play(DummyVecEnv::new(factories(args))?, command, horizon),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
