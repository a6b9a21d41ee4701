pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tabletalk_core::config::{ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "tabletalk",
    about = "TableTalk conversational CRUD assistant",
    long_about = "Talk to your tables: create, read, update and delete records in plain language.",
    after_help = "Examples:\n  tabletalk chat\n  tabletalk chat --script demo.txt\n  \
                  tabletalk config\n  tabletalk schema --json"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Read configuration from this file instead of tabletalk.toml"
    )]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start a conversation, interactively or from a script of utterances")]
    Chat {
        #[arg(long, help = "Replay utterances from a file, one per line")]
        script: Option<PathBuf>,
        #[arg(long, default_value = "local", help = "Session id the turns belong to")]
        session: String,
        #[arg(long, help = "Entity schema TOML file overriding the configured one")]
        schema: Option<PathBuf>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Show the entity schemas the assistant works with")]
    Schema {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Entity schema TOML file overriding the configured one")]
        schema: Option<PathBuf>,
    },
}

impl Cli {
    /// Config loading options for this invocation, shared by logging setup and the commands.
    pub fn load_options(&self) -> LoadOptions {
        let schema_path = match &self.command {
            Command::Chat { schema, .. } | Command::Schema { schema, .. } => schema.clone(),
            Command::Config => None,
        };
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides { schema_path, ..ConfigOverrides::default() },
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let options = cli.load_options();

    let result = match cli.command {
        Command::Chat { script, session, .. } => {
            commands::chat::run(options, script.as_deref(), &session)
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Schema { json, .. } => commands::schema::run(options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
