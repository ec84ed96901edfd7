// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tinbox::app_config::{self, Algorithm, Config};
use tinbox::app_controller::{Controller, OutputFormat, TranslateOptions};
use tinbox::CostEstimate;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for Algorithm to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAlgorithm {
    Page,
    SlidingWindow,
}

impl From<CliAlgorithm> for Algorithm {
    fn from(cli_algorithm: CliAlgorithm) -> Self {
        match cli_algorithm {
            CliAlgorithm::Page => Algorithm::Page,
            CliAlgorithm::SlidingWindow => Algorithm::SlidingWindow,
        }
    }
}

/// CLI Wrapper for OutputFormat to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
    Markdown,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(cli_format: CliOutputFormat) -> Self {
        match cli_format {
            CliOutputFormat::Text => OutputFormat::Text,
            CliOutputFormat::Json => OutputFormat::Json,
            CliOutputFormat::Markdown => OutputFormat::Markdown,
        }
    }
}

/// Options shared by the commands that load a document
#[derive(Args, Debug)]
struct DocumentArgs {
    /// Input text file, image, or directory of page images
    #[arg(value_name = "INPUT_PATH")]
    input_path: PathBuf,

    /// Target language code (e.g., 'fr', 'de', 'ja')
    #[arg(short, long = "to")]
    target_language: Option<String>,

    /// Source language code, or 'auto'
    #[arg(short, long = "from")]
    source_language: Option<String>,

    /// Model as provider:model (e.g., 'openai:gpt-5-mini', 'ollama:llama3')
    #[arg(short, long)]
    model: Option<String>,

    /// Translation algorithm
    #[arg(short, long, value_enum, default_value = "page")]
    algorithm: CliAlgorithm,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[command(flatten)]
    document: DocumentArgs,

    /// Output file (defaults to <input>.<lang>.<ext> next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: CliOutputFormat,

    /// Number of units translated in parallel
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Resume an interrupted job
    #[arg(short, long, value_name = "JOB_ID")]
    resume: Option<String>,

    /// Only show the cost estimate
    #[arg(long)]
    dry_run: bool,

    /// Refuse to start when the estimate exceeds this many dollars
    #[arg(long)]
    max_cost: Option<f64>,

    /// Force overwrite of existing output files
    #[arg(short, long)]
    force_overwrite: bool,

    /// Skip estimate warnings and proceed without asking
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a document
    Translate(TranslateArgs),

    /// Estimate tokens and cost without translating
    Estimate(DocumentArgs),

    /// List stored checkpoints
    Checkpoints {
        /// Configuration file path
        #[arg(short, long, default_value = "conf.json")]
        config_path: String,
    },

    /// Check configuration, API keys, model connection and checkpoint storage
    Doctor {
        /// Configuration file path
        #[arg(short, long, default_value = "conf.json")]
        config_path: String,

        /// Model to check instead of the configured one
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Generate shell completions for tinbox
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// tinbox - translate long documents with large language models
#[derive(Parser, Debug)]
#[command(name = "tinbox")]
#[command(version)]
#[command(about = "Document translation with LLMs, checkpointed and cost-aware")]
#[command(long_about = "tinbox translates long documents page by page or with a sliding window, \
checkpointing after every unit so interrupted jobs resume without paying twice.

EXAMPLES:
    tinbox translate report.txt --to fr                          # Translate using default config
    tinbox translate report.txt --to de -m anthropic:claude-sonnet-4
    tinbox translate book.txt --to ja -a sliding-window          # Sliding window for flowing text
    tinbox translate scans/ --to en -m openai:gpt-4o             # One page per image
    tinbox translate report.txt --to fr --resume <JOB_ID>        # Resume an interrupted job
    tinbox estimate report.txt --to fr                           # Cost estimate only
    tinbox doctor -m ollama:llama3                               # Check keys and model connection
    tinbox completions bash > tinbox.bash                        # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.

SUPPORTED PROVIDERS:
    openai    - OpenAI API (requires API key or OPENAI_API_KEY)
    anthropic - Anthropic Claude API (requires API key or ANTHROPIC_API_KEY)
    ollama    - Local Ollama server")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌ ",
            Level::Warn => "🚧 ",
            Level::Info => " ",
            Level::Debug => "🔍 ",
            Level::Trace => "📋 ",
        }
    }

    // @returns: ANSI colour for log level
    fn get_color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {} {}\x1B[0m",
                Self::get_color_for_level(record.level()),
                now,
                Self::get_emoji_for_level(record.level()),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Ask on the terminal whether to go on despite estimate warnings
fn confirm_on_terminal(estimate: &CostEstimate) -> bool {
    eprint!(
        "Estimate: {} tokens, ${:.4}. Do you want to proceed? [y/N] ",
        estimate.estimated_tokens, estimate.estimated_cost
    );
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Load the config file and apply command line overrides
fn load_config(args: &DocumentArgs) -> Result<Config> {
    let mut config = Config::load_or_create(&args.config_path)?;

    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(source_lang) = &args.source_language {
        config.source_language = source_lang.clone();
    }
    if let Some(target_lang) = &args.target_language {
        config.target_language = target_lang.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone().into();
    }

    // Just update the max level without reinitializing the logger
    log::set_max_level(config.log_level.to_level_filter());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once; the level is updated after loading the config
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "tinbox", &mut std::io::stdout());
            Ok(())
        }
        Commands::Estimate(args) => {
            let config = load_config(&args)?;
            let controller = Controller::with_config(config)?;
            let estimate = controller.estimate(&args.input_path, args.algorithm.into())?;
            println!("Estimated tokens: {}", estimate.estimated_tokens);
            println!("Estimated cost:   ${:.4} ({})", estimate.estimated_cost, estimate.cost_level);
            println!("Estimated time:   {}s", estimate.estimated_time.as_secs());
            for warning in &estimate.warnings {
                println!("Warning: {}", warning);
            }
            Ok(())
        }
        Commands::Checkpoints { config_path } => {
            let config = Config::load_or_create(&config_path)?;
            log::set_max_level(config.log_level.to_level_filter());
            let controller = Controller::with_config(config)?;
            let records = controller.list_checkpoints().await?;
            if records.is_empty() {
                info!("No checkpoints stored");
            }
            for record in records {
                println!(
                    "{}  {:<24} {}/{} units  {} -> {}  {}  ${:.4}  {}",
                    record.job_id,
                    record.status.as_str(),
                    record.completed.len(),
                    record.total_units,
                    record.source_lang,
                    record.target_lang,
                    record.model,
                    record.ledger.cost,
                    record.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Commands::Doctor { config_path, model } => {
            let mut config = Config::load_or_create(&config_path)?;
            log::set_max_level(config.log_level.to_level_filter());
            if let Some(model) = model {
                config.model = model;
            }
            let report = Controller::for_diagnostics(config).doctor().await;
            let mut category = "";
            for check in &report.checks {
                if check.category != category {
                    category = check.category;
                    println!("{}", category);
                }
                println!("  [{}] {}: {}", if check.ok { "ok" } else { "!!" }, check.name, check.details);
                if let (false, Some(hint)) = (check.ok, &check.hint) {
                    println!("       {}", hint);
                }
            }
            if !report.required_ok() {
                return Err(anyhow::anyhow!("Some required checks failed"));
            }
            info!("tinbox is ready");
            Ok(())
        }
        Commands::Translate(args) => {
            let mut config = load_config(&args.document)?;
            if let Some(max_cost) = args.max_cost {
                config.cost.max_cost = Some(max_cost);
            }
            let controller = Controller::with_config(config)?.with_confirmation(Arc::new(confirm_on_terminal));

            let mut options = TranslateOptions::new(&args.document.input_path);
            options.output = args.output;
            options.algorithm = args.document.algorithm.into();
            options.concurrency = args.concurrency;
            options.resume = args.resume;
            options.dry_run = args.dry_run;
            options.format = args.format.into();
            options.force_overwrite = args.force_overwrite;
            options.force = args.force;

            controller.run(options).await?;
            Ok(())
        }
    }
}
