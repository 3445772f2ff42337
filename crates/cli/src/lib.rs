pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "speck",
    about = "Speck operator CLI",
    long_about = "Operate the speck Slack adapter: token store migrations, config inspection, readiness checks and token maintenance.",
    after_help = "Examples:\n  speck doctor --json\n  speck config\n  speck token get bot_token\n  speck token set bot_token xoxb-..."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending token store migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack credentials, and token store readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Read or write a value in the token store")]
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Debug, Subcommand)]
enum TokenAction {
    #[command(about = "Print the stored value for a key (redacted unless --reveal)")]
    Get {
        #[arg(help = "Key; JSON literals are parsed, bare words are strings")]
        key: String,
        #[arg(long, help = "Print the value without redaction")]
        reveal: bool,
    },
    #[command(about = "Store a value under a key, overwriting any previous value")]
    Set {
        #[arg(help = "Key; JSON literals are parsed, bare words are strings")]
        key: String,
        value: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Token { action: TokenAction::Get { key, reveal } } => {
            commands::token::get(&key, reveal)
        }
        Command::Token { action: TokenAction::Set { key, value } } => {
            commands::token::set(&key, &value)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
