mod ui;

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Mutex,
};

use ants_core::{
    EnvParams, Vector2,
    runner::{HeadlessFrontend, RunOutcome, run_automatic, run_manual},
    store::Store,
    trainer::{Trainer, connect_overlay, connect_testing, connect_training},
    world::World,
};
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::ui::{Curves, Mode, TerminalFrontend, restore_terminal, run_plot, setup_terminal};

#[derive(Parser, Debug)]
#[command(version, about = "Q-learning ants that carry food to their nests", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    params: ParamArgs,

    /// JSON parameter file; replaces every parameter flag
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory holding saved runs
    #[arg(long, value_name = "DIR", default_value = "runs", global = true)]
    runs_dir: PathBuf,

    /// Log file used while the terminal UI is active
    #[arg(long, value_name = "FILE", default_value = "ants.log", global = true)]
    log_file: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the agents unless a run with these parameters is already saved
    Train {
        /// Train without the terminal UI, showing a progress bar instead
        #[arg(long)]
        headless: bool,
        /// Draw a frame after every step instead of a periodic status
        #[arg(long)]
        render_steps: bool,
    },
    /// Step through the learned policy one tick at a time
    Watch,
    /// Plot reward and episode length of a saved run
    Plot,
}

#[derive(ClapArgs, Debug)]
struct ParamArgs {
    #[arg(long, default_value_t = 1, global = true)]
    agents: usize,
    #[arg(long, default_value_t = 30, global = true)]
    food: usize,
    #[arg(long, default_value_t = 10, global = true)]
    obstacles: usize,
    #[arg(long, default_value_t = 1, global = true)]
    nests: usize,
    #[arg(long, default_value_t = 10, global = true)]
    width: i32,
    #[arg(long, default_value_t = 10, global = true)]
    height: i32,
    #[arg(long, default_value_t = 1, global = true)]
    seed: u64,
    #[arg(long, default_value_t = 10_000_000, global = true)]
    max_steps: u64,
    #[arg(long, default_value_t = 10_000, global = true)]
    episodes: u64,
}

impl ParamArgs {
    fn to_params(&self) -> EnvParams {
        EnvParams {
            agent_count: self.agents,
            food_count: self.food,
            obstacle_count: self.obstacles,
            nest_count: self.nests,
            grid_size: Vector2::new(self.width, self.height),
            seed: self.seed,
            max_steps: self.max_steps,
            episode_count: self.episodes,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let uses_terminal = !matches!(args.command, Command::Train { headless: true, .. });
    init_logging(args.verbose, uses_terminal.then_some(args.log_file.as_path()))?;

    let params = match &args.config {
        Some(path) => EnvParams::load(path)
            .with_context(|| format!("Failed to load parameters from {}", path.display()))?,
        None => {
            let params = args.params.to_params();
            params.validate().context("Invalid parameters")?;
            params
        }
    };
    let store = Store::new(&args.runs_dir);

    match args.command {
        Command::Train {
            headless,
            render_steps,
        } => train(&params, &store, headless, render_steps),
        Command::Watch => watch(&params, &store),
        Command::Plot => plot(&params, &store),
    }
}

/// Installs the global subscriber, writing to `log_file` when given and to
/// stderr otherwise.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = FmtSubscriber::builder().with_max_level(level);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = builder.with_writer(io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn training_progress(episodes: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(episodes);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} episodes ({per_sec})")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn train(params: &EnvParams, store: &Store, headless: bool, render_steps: bool) -> Result<()> {
    let (lookups, episodes) = store.load(params).context("Failed to load saved run")?;
    if !episodes.is_empty() {
        println!(
            "{} already holds {} trained episodes; use `ants watch` or `ants plot`.",
            store.path_for(params).display(),
            episodes.len()
        );
        return Ok(());
    }

    let mut world = World::new(params).context("Failed to create world")?;
    world.set_render_step(render_steps);
    let trainer = Trainer::new(lookups, episodes, params.episode_count).shared();
    connect_training(&trainer, &mut world)?;

    let outcome = if headless {
        let pb = training_progress(params.episode_count)?;
        let bar = pb.clone();
        world.events.episode_ended.connect(move |_, _| {
            bar.inc(1);
            Ok(())
        });
        let outcome = run_automatic(&mut world, &mut HeadlessFrontend)?;
        pb.finish();
        outcome
    } else {
        connect_overlay(&trainer, &mut world)?;
        let terminal = setup_terminal()?;
        let mut frontend = TerminalFrontend::new(
            terminal,
            Mode::Training,
            Rc::clone(&trainer),
            params.episode_count,
        );
        let result = run_automatic(&mut world, &mut frontend);
        frontend.restore()?;
        result?
    };

    if outcome == RunOutcome::Stopped {
        warn!("training stopped early; nothing saved");
        println!("Training stopped before the last episode; nothing was saved.");
        return Ok(());
    }

    let trainer = trainer.borrow();
    let path = store
        .save(params, &trainer.lookups, &trainer.episodes)
        .context("Failed to save trained run")?;
    info!(path = %path.display(), "training finished");
    println!("Saved {} episodes to {}", trainer.episodes.len(), path.display());
    Ok(())
}

fn watch(params: &EnvParams, store: &Store) -> Result<()> {
    let (lookups, episodes) = store.load(params).context("Failed to load saved run")?;
    if episodes.is_empty() {
        warn!("no trained run for these parameters; watching an untrained policy");
    }

    let mut world = World::new(params).context("Failed to create world")?;
    let trainer = Trainer::new(lookups, episodes, params.episode_count).shared();
    connect_testing(&trainer, &mut world)?;
    connect_overlay(&trainer, &mut world)?;

    let terminal = setup_terminal()?;
    let mut frontend = TerminalFrontend::new(terminal, Mode::Watching, trainer, params.episode_count);
    let result = run_manual(&mut world, &mut frontend);
    frontend.restore()?;
    result?;
    Ok(())
}

fn plot(params: &EnvParams, store: &Store) -> Result<()> {
    let (_, episodes) = store.load(params).context("Failed to load saved run")?;
    if episodes.is_empty() {
        bail!(
            "No episodes stored at {}; run `ants train` first",
            store.path_for(params).display()
        );
    }

    let curves = Curves::new(&episodes);
    let mut terminal = setup_terminal()?;
    let result = run_plot(&mut terminal, &curves);
    restore_terminal(&mut terminal)?;
    result
}
