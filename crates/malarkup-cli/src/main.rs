use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use malarkup::{Config, Library, Map, Markup, Scope, Script, Store, Value};
use std::fs;
use std::path::{Path, PathBuf};

mod markdown;
use markdown::CommonMark;

#[derive(Parser)]
#[command(name = "malarkup")]
#[command(about = "Render Malarkup passages to HTML")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a passage from a Twee file
    Render {
        /// Path to the .twee file
        file: PathBuf,
        /// Passage to render, the first one by default
        #[arg(long)]
        passage: Option<String>,
        /// JSON file with the initial store
        #[arg(long)]
        state: Option<PathBuf>,
        /// TOML file with engine settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the final store as JSON to stderr
        #[arg(long)]
        dump_state: bool,
    },
    /// Render every story passage and report problems
    Check {
        /// Path to the .twee file
        file: PathBuf,
        /// TOML file with engine settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Evaluate an expression against a store
    Eval {
        /// The expression to evaluate
        expression: String,
        /// JSON file with the store
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            file,
            passage,
            state,
            config,
            dump_state,
        } => render(&file, passage.as_deref(), state.as_deref(), config.as_deref(), dump_state),
        Commands::Check { file, config } => check(&file, config.as_deref()),
        Commands::Eval { expression, state } => eval(&expression, state.as_deref()),
    }
}

fn render(
    file: &Path,
    passage: Option<&str>,
    state: Option<&Path>,
    config: Option<&Path>,
    dump_state: bool,
) -> Result<()> {
    let library = load_library(file)?;
    let passage = match passage {
        Some(name) => library
            .get(name)
            .with_context(|| format!("No passage named '{name}' in {}", file.display()))?,
        None => library
            .first()
            .with_context(|| format!("{} contains no passages", file.display()))?,
    }
    .clone();

    let store = load_store(state)?;
    let markup = Markup::builder(store)
        .registry(library)
        .markdown(CommonMark)
        .config(load_config(config)?)
        .build();

    println!("{}", markup.render_passage(&passage));
    for diagnostic in markup.take_diagnostics() {
        eprintln!("{}: {diagnostic}", passage.name);
    }
    if dump_state {
        eprintln!("{}", markup.store().snapshot().to_json_string());
    }
    Ok(())
}

/// Every non-snippet passage gets a fresh store, so each one is checked in
/// isolation.
fn check(file: &Path, config: Option<&Path>) -> Result<()> {
    eprintln!("Checking: {}", file.display());
    let library = load_library(file)?;
    let config = load_config(config)?;

    let mut problems = 0;
    let mut checked = 0;
    for passage in library.passages().filter(|passage| !passage.is_snippet()) {
        let markup = Markup::builder(Store::new())
            .registry(library.clone())
            .markdown(CommonMark)
            .config(config.clone())
            .build();
        markup.render_passage(passage);
        checked += 1;
        for diagnostic in markup.take_diagnostics() {
            if diagnostic.kind.level() <= log::Level::Warn {
                problems += 1;
                eprintln!("  {}: {diagnostic}", passage.name);
            }
        }
    }

    eprintln!("{checked} passages checked, {problems} problems");
    if problems > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn eval(expression: &str, state: Option<&Path>) -> Result<()> {
    let script = match Script::parse(expression) {
        Ok(script) => script,
        Err(error) => {
            eprint!("{}", error.report("<expression>"));
            std::process::exit(1);
        }
    };
    let store = load_store(state)?;
    let context = Map::new();
    let value = script.evaluate(&Scope::new(&store, &context))?;
    println!("{}", value.to_json_string());
    Ok(())
}

fn load_library(file: &Path) -> Result<Library> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(Library::from_twee(&text))
}

fn load_store(state: Option<&Path>) -> Result<Store> {
    let Some(state) = state else {
        return Ok(Store::new());
    };
    let text = fs::read_to_string(state)
        .with_context(|| format!("Failed to read {}", state.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", state.display()))?;
    match Value::from(json) {
        Value::Map(map) => Ok(Store::from_map(map)),
        other => bail!(
            "{} must contain a JSON object, found {}",
            state.display(),
            other.type_name()
        ),
    }
}

fn load_config(config: Option<&Path>) -> Result<Config> {
    let Some(config) = config else {
        return Ok(Config::default());
    };
    let text = fs::read_to_string(config)
        .with_context(|| format!("Failed to read {}", config.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config in {}", config.display()))
}
