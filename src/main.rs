use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use lazarus::complexity;
use lazarus::config::{Config, API_KEY_ENV};
use lazarus::oracle::{GeminiOracle, ScriptedOracle, TransformationOracle};
use lazarus::profile::Profile;
use lazarus::report::{MirrorResponse, RefactorResponse};
use lazarus::runner::ProcessRunner;
use lazarus::session::Session;
use rayon::prelude::*;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "lazarus",
    about = "Regenerate legacy programs and prove parity by running them side by side",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: Overrides,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct Overrides {
    /// Per-execution timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Generation attempts before giving up
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Session profile (TOML); defaults to the built-in payroll profile
    #[arg(long, global = true)]
    profile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Regenerate a legacy program until its outputs match
    Refactor(RefactorArgs),
    /// Re-run the last published reference/candidate pair side by side
    Mirror(MirrorArgs),
    /// Print complexity scores
    Score(ScoreArgs),
    /// List programs in the legacy directory
    List,
    /// Store the Gemini API key in the system keychain
    Setup,
}

#[derive(Args, Debug)]
struct RefactorArgs {
    /// Program name, relative to the legacy directory
    legacy_file: PathBuf,
    #[arg(long)]
    json: bool,
    /// Replay these files as oracle answers instead of calling Gemini
    #[arg(long, num_args = 1..)]
    scripted: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct MirrorArgs {
    /// Legacy program to compare; defaults to the last refactored one
    #[arg(long)]
    legacy: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(io::stderr),
        )
        .init();

    let mut config = Config::load();
    if let Some(timeout_ms) = cli.overrides.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(max_attempts) = cli.overrides.max_attempts {
        config.max_attempts = max_attempts;
    }
    config.validate()?;

    match cli.command {
        Commands::Refactor(args) => {
            let profile = Profile::load_or_default(cli.overrides.profile.as_deref())?;
            refactor(&config, &profile, args).await
        }
        Commands::Mirror(args) => {
            let profile = Profile::load_or_default(cli.overrides.profile.as_deref())?;
            mirror(&config, &profile, args)
        }
        Commands::Score(args) => {
            score(args);
            Ok(())
        }
        Commands::List => list(&config),
        Commands::Setup => setup(&mut config),
    }
}

async fn refactor(config: &Config, profile: &Profile, args: RefactorArgs) -> Result<()> {
    let oracle: Box<dyn TransformationOracle> = if args.scripted.is_empty() {
        let key = config.get_api_key().ok_or_else(|| {
            anyhow!(
                "No Gemini API key found. Set {} or run `lazarus setup`.",
                API_KEY_ENV
            )
        })?;
        Box::new(GeminiOracle::new(config.model.clone(), key)?)
    } else {
        Box::new(ScriptedOracle::from_files(args.scripted.as_slice())?)
    };

    let executor = Arc::new(ProcessRunner::new(config.interpreters()));
    let session = Session::new(config, profile, executor);
    let outcome = session.refactor(oracle.as_ref(), &args.legacy_file).await?;
    let response = RefactorResponse::from_outcome(&outcome);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", response.render_text());
    }
    Ok(())
}

fn mirror(config: &Config, profile: &Profile, args: MirrorArgs) -> Result<()> {
    let executor = Arc::new(ProcessRunner::new(config.interpreters()));
    let session = Session::new(config, profile, executor);
    let response = MirrorResponse {
        results: session.mirror(args.legacy.as_deref())?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", response.render_text());
    }
    Ok(())
}

fn score(args: ScoreArgs) {
    let scores: Vec<(PathBuf, u32)> = args
        .paths
        .into_par_iter()
        .map(|path| {
            let score = complexity::score_path(&path);
            (path, score)
        })
        .collect();
    for (path, score) in scores {
        println!("{:>4}  {}", score, path.display());
    }
}

fn list(config: &Config) -> Result<()> {
    let programs = lazarus::session::list_programs(&config.legacy_dir)?;
    if programs.is_empty() {
        println!("No programs in {}", config.legacy_dir.display());
    }
    for program in programs {
        println!("{:<12} {}", program.language.name(), program.name.display());
    }
    Ok(())
}

fn setup(config: &mut Config) -> Result<()> {
    print!("Gemini API key: ");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut key = String::new();
    io::stdin()
        .read_line(&mut key)
        .context("Failed to read API key")?;
    let key = key.trim();
    if key.is_empty() {
        println!("No key entered. You can also set {}.", API_KEY_ENV);
        return Ok(());
    }

    config.set_api_key(key)?;
    println!("API key saved to the system keychain.");
    println!("Config location: {}", Config::config_location());
    Ok(())
}
