use clap::{Parser, Subcommand};

/// actionkey - content-addressed action keys and an action cache
///
/// Computes cache keys for build actions, checks them against a local action
/// cache and runs the actions that are out of date.
#[derive(Parser, Debug)]
#[command(name = "actionkey")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Action cache keys and deterministic build outputs", long_about = None)]
pub struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration arguments shared across commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path (discovered from the working directory if omitted)
    #[arg(short = 'c', long, env = "ACTIONKEY_CONFIG")]
    pub config: Option<String>,

    /// Exec root that artifact paths are relative to
    #[arg(long, env = "ACTIONKEY_EXEC_ROOT")]
    pub exec_root: Option<String>,

    /// Action cache directory
    #[arg(long, env = "ACTIONKEY_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Always execute and never record cache entries
    #[arg(long, env = "ACTIONKEY_NO_CACHE")]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write baseline (zero-hit) coverage for a target's instrumented files
    Baseline(BaselineArgs),

    /// Write fixed content to an output file
    Write(WriteArgs),

    /// Manage the action cache
    Cache(CacheArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct BaselineArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Instrumented source files or glob patterns, relative to the exec root
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Package of the target (e.g. "java/com/example")
    #[arg(long)]
    pub package: String,

    /// Name of the target within its package
    #[arg(long)]
    pub target: String,

    /// Only print the action key
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Output path, relative to the exec root
    #[arg(long)]
    pub output: String,

    /// Content to write
    #[arg(long)]
    pub content: String,

    /// Mark the output executable
    #[arg(long)]
    pub executable: bool,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove cache entries
    Clean {
        /// Primary output whose entry to remove (omit with --all)
        output: Option<String>,

        /// Remove every entry
        #[arg(long)]
        all: bool,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: String,
    },
    /// Print an example config file
    Generate,
    /// Show effective configuration
    Show {
        #[command(flatten)]
        common: CommonConfigArgs,
    },
}
