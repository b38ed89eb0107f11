use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use testpilot::{CdpSurface, ClaudeReasoner, RunConfig, Session, StepStatus};

#[derive(Parser)]
#[command(name = "testpilot")]
#[command(about = "Natural-language browser testing")]
#[command(version)]
struct Cli {
    /// Run config file (YAML)
    config: Option<PathBuf>,

    /// Ad-hoc test instruction, used instead of a config file
    #[arg(short, long)]
    instruction: Option<String>,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> testpilot::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = match (&cli.config, &cli.instruction) {
        (Some(path), _) => RunConfig::load(path)?,
        (None, Some(instruction)) => RunConfig::from_instruction(instruction.clone()),
        (None, None) => {
            return Err(testpilot::Error::Config(
                "pass a config file or --instruction".into(),
            ))
        }
    };

    if cli.check {
        println!("Config valid: {}", config.name);
        println!("  Instruction: {}", config.instruction.trim());
        println!("  Model: {}", config.llm.model);
        println!(
            "  Limits: {} retries, {} cycles, {} labels",
            config.engine.max_retries, config.engine.max_cycles, config.engine.max_labels
        );
        if let Some(ref path) = config.report.path {
            println!("  Report: {}", path);
        }
        return Ok(());
    }

    // Override headless if specified
    if cli.headless {
        config.browser.headless = true;
    }

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| testpilot::Error::Config("ANTHROPIC_API_KEY is not set".into()))?;

    println!("Running: {}", config.name);

    let surface = CdpSurface::launch(&config.browser).await?;
    let reasoner = Arc::new(ClaudeReasoner::new(config.llm.clone(), api_key));
    let mut session = Session::new(Box::new(surface), reasoner, config.engine.to_options());

    // Ctrl-C ends the run at the next cycle boundary.
    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    let report = session.run(&config.instruction).await;

    // Print result
    println!();
    if report.passed() {
        println!("✓ Passed");
    } else {
        println!("✗ Failed");
        if let Some(ref error) = report.last_error {
            println!("  Error: {}", error);
        }
    }
    for step in &report.test_steps {
        let mark = match step.status {
            StepStatus::Passed => "✓",
            StepStatus::Failed => "✗",
            _ => "-",
        };
        match &step.notes {
            Some(notes) => println!("  {} {}. {} ({})", mark, step.id, step.instruction, notes),
            None => println!("  {} {}. {}", mark, step.id, step.instruction),
        }
    }
    println!("  Pass rate: {:.0}%", report.pass_rate);
    println!("  Duration: {}ms", report.execution_time_ms);

    if let Some(ref path) = config.report.path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("  Report written to {}", path);
    }

    session.close().await;

    if !report.passed() {
        std::process::exit(1);
    }

    Ok(())
}
