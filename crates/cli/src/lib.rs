pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Run migrations, load the demo order book, inspect configuration and trigger routing maintenance.",
    after_help = "Examples:\n  leadflow migrate\n  leadflow reroute --entity north\n  leadflow rollover"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo order book and verify it")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Re-run the matcher over parked leads")]
    Reroute {
        #[arg(long, help = "Only leads of this entity")]
        entity: Option<String>,
    },
    #[command(about = "Advance the quota week if a new week has started")]
    Rollover,
    #[command(about = "Fail deliveries stuck in sending past the configured timeout")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Reroute { entity } => commands::maintenance::reroute(entity),
        Command::Rollover => commands::maintenance::rollover(),
        Command::Sweep => commands::maintenance::sweep(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
