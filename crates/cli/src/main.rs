mod commands;
mod config;
mod runtime;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CliConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// IVR rules engine: batch tests, script checks and the inference server.
#[derive(Parser)]
#[command(
    name = "callflow",
    version,
    about = "IVR rules engine: batch tests, script checks and the inference server"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to callflow.toml (default: ./callflow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of recorded tests against a rule bundle
    Test {
        /// Path to the rule bundle JSON
        #[arg(long)]
        rules: PathBuf,
        /// Path to the test catalogue JSON
        #[arg(long)]
        tests: PathBuf,
        /// Test ids to run (repeatable). Defaults to every enabled test.
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Run tests in this folder instead of by id
        #[arg(long, conflicts_with = "ids")]
        folder: Option<String>,
        /// Include sub-folders of --folder
        #[arg(long, requires = "folder")]
        recursive: bool,
        /// Tests run concurrently per chunk
        #[arg(long)]
        width: Option<usize>,
    },

    /// Parse a test script and report its directives
    Check {
        /// Path to the test script
        script: PathBuf,
    },

    /// Start the inference and batch HTTP API server
    Serve {
        /// Path to the rule bundle JSON
        #[arg(long)]
        rules: PathBuf,
        /// Path to the test catalogue JSON
        #[arg(long)]
        tests: Option<PathBuf>,
        /// Port to listen on (overrides [serve].port)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match CliConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Test {
            rules,
            tests,
            ids,
            folder,
            recursive,
            width,
        } => {
            if let Some(w) = width {
                config.batch.batch_width = w.max(1);
            }
            commands::test::cmd_test(
                commands::test::TestOptions {
                    rules: &rules,
                    tests: &tests,
                    ids,
                    folder,
                    recursive,
                },
                &config,
                cli.output,
                cli.quiet,
            )
        }
        Commands::Check { script } => commands::check::cmd_check(&script, cli.output, cli.quiet),
        Commands::Serve { rules, tests, port } => {
            if let Some(p) = port {
                config.serve.port = p;
            }
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(&format!("failed to start runtime: {}", e), cli.output, cli.quiet);
                    process::exit(1);
                }
            };
            match rt.block_on(serve::start_server(&rules, tests.as_deref(), &config)) {
                Ok(()) => 0,
                Err(e) => {
                    report_error(&format!("server error: {}", e), cli.output, cli.quiet);
                    1
                }
            }
        }
    };
    process::exit(code);
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
