use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quill_engine::config::EngineConfig;
use quill_engine::denylist::Denylist;
use quill_engine::error::error_chain_text;
use quill_engine::{ConceptOutcome, ImageOutcome, ReviewEngine, ReviewRun};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Book review and illustration generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Review one book and exit.
    Review(ReviewArgs),
    /// Read one subject per line from stdin and review each in turn.
    Chat(EngineArgs),
}

#[derive(Debug, Parser)]
struct ReviewArgs {
    /// Title and author, e.g. "Dom Casmurro, Machado de Assis".
    #[arg(long)]
    subject: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Args)]
struct EngineArgs {
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// Directory for generated image files.
    #[arg(long)]
    out: Option<PathBuf>,
    /// JSONL event log.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Extra "no information" phrases; `{"replace": true}` drops the built-in set.
    #[arg(long)]
    denylist: Option<PathBuf>,
    #[arg(long)]
    no_image: bool,
    #[arg(long)]
    no_concept: bool,
    /// Print the run as JSON instead of text.
    #[arg(long)]
    json: bool,
}

impl EngineArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env()?;
        if let Some(model) = self.text_model.as_ref() {
            config.text_model = Some(model.clone());
        }
        if let Some(model) = self.image_model.as_ref() {
            config.image_model = Some(model.clone());
        }
        if let Some(out) = self.out.as_ref() {
            config.out_dir = Some(out.clone());
        }
        if let Some(events) = self.events.as_ref() {
            config.events_path = Some(events.clone());
        }
        if let Some(path) = self.denylist.as_ref() {
            config.denylist = Denylist::load(Some(path))?;
        }
        config.generate_image = !self.no_image;
        config.describe_concept = !self.no_concept;
        Ok(config)
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("quill error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Review(args) => run_review(args),
        Command::Chat(args) => run_chat(args),
    }
}

fn run_review(args: ReviewArgs) -> Result<i32> {
    if args.subject.trim().is_empty() {
        warn!("subject is empty; nothing to review");
        return Ok(2);
    }
    let engine = ReviewEngine::new(args.engine.engine_config()?);
    let run = engine
        .run(&args.subject)
        .with_context(|| format!("review of '{}' failed", args.subject.trim()))?;
    print_run(&run, args.engine.json)?;
    Ok(0)
}

fn run_chat(args: EngineArgs) -> Result<i32> {
    let engine = ReviewEngine::new(args.engine_config()?);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut failures = 0;
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let subject = line.trim();
        if matches!(subject, "/quit" | "/exit") {
            break;
        }
        if subject.is_empty() {
            warn!("subject is empty; enter a title and author");
            continue;
        }
        match engine.run(subject) {
            Ok(run) => print_run(&run, args.json)?,
            Err(err) => {
                failures += 1;
                eprintln!(
                    "quill error: {} failed: {}",
                    err.stage_name(),
                    error_chain_text(&err, 1024)
                );
            }
        }
    }
    Ok(if failures == 0 { 0 } else { 1 })
}

fn print_run(run: &ReviewRun, as_json: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if as_json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&run.to_report())?)?;
        return Ok(());
    }

    writeln!(stdout, "{}", run.document.render())?;
    if let Some(prompt) = run.image_prompt.as_ref() {
        writeln!(stdout, "\nImage prompt: {prompt}")?;
    }
    match &run.image {
        ImageOutcome::Generated(generated) => {
            writeln!(stdout, "Image: {}", generated.image.reference_handle)?;
            if generated.rejection.is_some() {
                writeln!(stdout, "(generic fallback illustration; the original prompt was rejected)")?;
            }
        }
        ImageOutcome::Failed(err) => {
            eprintln!("{} failed: {}", err.stage_name(), error_chain_text(err, 1024));
        }
        ImageOutcome::Skipped => {}
    }
    match &run.concept {
        ConceptOutcome::Described(text) => writeln!(stdout, "\nConcept:\n{text}")?,
        ConceptOutcome::Failed(err) => {
            eprintln!("{} failed: {}", err.stage_name(), error_chain_text(err, 1024));
        }
        ConceptOutcome::Skipped => {}
    }
    Ok(())
}
