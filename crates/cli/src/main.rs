//! sstack CLI
//!
//! Drives a spooling stack on disk from the command line. Every invocation
//! opens the stack, runs one command, and flushes memory back to disk before
//! exiting, so consecutive invocations see one continuous stack.
//!
//! Values are validated as JSON on the way in and stored as their compact
//! JSON text, which keeps them readable back from either bundle format.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use serde_json::Value;
use spooling_stack::{Format, SpoolingStack, StackConfig, StackError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;

/// Environment variable naming the default spool root
const ENV_ROOT: &str = "SSTACK_ROOT";

/// Root used when nothing else names one
const DEFAULT_ROOT: &str = "sstack-spool";

#[derive(ClapParser)]
#[command(name = "sstack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Spooling stack - push and pop JSON values through a disk-backed stack", long_about = None)]
struct Cli {
    /// Spool directory (overrides the config file and SSTACK_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Stack configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Values per bundle file
    #[arg(long, global = true)]
    bundle_size: Option<usize>,

    /// Bundle format: json or bincode
    #[arg(long, global = true)]
    format: Option<Format>,

    /// Bundle file name prefix
    #[arg(long, global = true)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push values onto the stack, in order
    Push {
        /// Values to push, each parsed as JSON
        #[arg(required = true)]
        values: Vec<String>,

        /// Push arguments as plain strings instead of parsing them as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Pop values from the top of the stack, printing one JSON value per line
    Pop {
        /// Maximum number of values to pop
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Move in-memory values to a new bundle file
    Flush {
        /// Number of oldest values to move (defaults to everything)
        #[arg(long)]
        count: Option<usize>,

        /// Fail instead of dropping values that cannot be serialized
        #[arg(long)]
        strict: bool,
    },

    /// Delete every value and the spool directory
    Reset,

    /// Show the spool directory and its bundles
    Status,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sstack=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        run_completions(shell);
        return;
    }

    let stdout = io::stdout();
    match run(&cli, &mut stdout.lock()) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sstack", &mut io::stdout());
}

/// Build the stack configuration from file, environment and flags
///
/// Precedence, lowest first: config file (or defaults), `SSTACK_*`
/// environment variables, command-line flags.
fn resolve_config(cli: &Cli) -> Result<StackConfig, StackError> {
    let mut config = match &cli.config {
        Some(path) => StackConfig::load(path)?,
        None => StackConfig::new(default_root()),
    };
    config = config.apply_env()?;

    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(bundle_size) = cli.bundle_size {
        config.bundle_size = bundle_size;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if let Some(prefix) = &cli.prefix {
        config.prefix = prefix.clone();
    }
    config.validate()?;
    Ok(config)
}

fn default_root() -> PathBuf {
    std::env::var_os(ENV_ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT))
}

/// Execute one command, returning the process exit code
fn run(cli: &Cli, out: &mut impl Write) -> Result<i32, StackError> {
    let config = resolve_config(cli)?;
    let stack: SpoolingStack<String> = SpoolingStack::new(config)?;

    let code = match &cli.command {
        Commands::Push { values, raw } => {
            run_push(&stack, values, *raw)?;
            0
        }
        Commands::Pop { count } => run_pop(&stack, *count, out)?,
        Commands::Flush { count, strict } => {
            stack.flush(*count, !*strict)?;
            0
        }
        Commands::Reset => {
            stack.reset()?;
            info!(root = %stack.root().display(), "Spool reset");
            0
        }
        Commands::Status => {
            print_status(&stack, out)?;
            0
        }
        Commands::Completions { .. } => 0,
    };

    // A reset stack must not be reopened by the closing flush.
    if !matches!(cli.command, Commands::Reset) {
        stack.close()?;
    }
    // The caller may exit the process without running destructors.
    out.flush()?;
    Ok(code)
}

fn run_push(stack: &SpoolingStack<String>, values: &[String], raw: bool) -> Result<(), StackError> {
    for arg in values {
        let value = if raw {
            Value::String(arg.clone())
        } else {
            serde_json::from_str(arg)
                .map_err(|e| StackError::Config(format!("'{}' is not valid JSON: {}", arg, e)))?
        };
        stack.push(value.to_string())?;
    }
    info!(count = values.len(), root = %stack.root().display(), "Pushed values");
    Ok(())
}

fn run_pop(stack: &SpoolingStack<String>, count: usize, out: &mut impl Write) -> Result<i32, StackError> {
    let mut popped = 0;
    while popped < count {
        match stack.pop() {
            Ok(value) => {
                writeln!(out, "{}", value)?;
                popped += 1;
            }
            Err(StackError::EmptyStack) => break,
            Err(e) => return Err(e),
        }
    }

    if popped == 0 && count > 0 {
        eprintln!("stack is empty");
        return Ok(1);
    }
    Ok(0)
}

fn print_status(stack: &SpoolingStack<String>, out: &mut impl Write) -> Result<(), StackError> {
    let config = stack.config();
    writeln!(out, "root:        {}", display_root(stack.root()))?;
    writeln!(out, "format:      {}", config.format)?;
    writeln!(out, "prefix:      {}", config.prefix)?;
    writeln!(out, "bundle size: {}", config.bundle_size)?;
    match stack.bundle_range()? {
        Some((min, max)) => writeln!(
            out,
            "bundles:     {} ({}.{} .. {}.{})",
            max - min + 1,
            config.prefix,
            min,
            config.prefix,
            max
        )?,
        None => writeln!(out, "bundles:     0")?,
    }
    Ok(())
}

fn display_root(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .display()
        .to_string()
}
