use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "chatlens",
    version,
    about = "Longitudinal analysis of exported AI-assistant conversation archives"
)]
struct Cli {
    /// More log detail (-v stage internals, -vv debug everywhere, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Hide stage progress; only errors are logged
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: commands::Commands,
}

const LIBRARY_TARGETS: [&str; 3] = ["chatlens_core", "chatlens_import", "chatlens_analysis"];

/// Filter directives for the requested verbosity. Stage progress is logged by
/// the binary at `info`, so it shows by default and `--quiet` hides it.
fn log_directives(verbose: u8, quiet: bool) -> String {
    if quiet {
        return "error".into();
    }
    match verbose {
        0 => "warn,chatlens=info".into(),
        1 => {
            let libs: Vec<String> = LIBRARY_TARGETS.iter().map(|t| format!("{t}=debug")).collect();
            format!("warn,chatlens=info,{}", libs.join(","))
        }
        2 => "debug".into(),
        _ => "trace".into(),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    // CHATLENS_LOG overrides the flags entirely.
    let filter = EnvFilter::try_from_env("CHATLENS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(log_directives(verbose, quiet)));
    fmt()
        .with_env_filter(filter)
        .with_target(verbose > 0)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match &cli.command {
        commands::Commands::Precheck(args) => commands::precheck::run(args, cli.format),
        commands::Commands::Parse(args) => commands::parse::run(args, cli.format),
        commands::Commands::Profile(args) => commands::profile::run(args, cli.format),
        commands::Commands::Topics(args) => commands::topics::run(args, cli.format),
        commands::Commands::Domains(args) => commands::domains::run(args, cli.format),
        commands::Commands::Alignment(args) => commands::alignment::run(args, cli.format),
        commands::Commands::Robustness(args) => commands::robustness::run(args, cli.format),
        commands::Commands::Coupling(args) => commands::coupling::run(args, cli.format),
        commands::Commands::Dynamics(args) => commands::dynamics::run(args, cli.format),
        commands::Commands::Run(args) => commands::run::run(args, cli.format),
    }
}
