mod accounts;
mod config;
mod credentials;
mod error;
mod gcloud;
mod platform;
mod registry;
mod watcher;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{accounts::Manager, config::Settings, error::GctxError};

#[derive(Parser)]
#[command(
    name = "gctx",
    version,
    about = "Manage multiple GCP accounts seamlessly",
    long_about = "\
Switch between GCP accounts by swapping both the active gcloud \
configuration and the application default credentials file.\n\
\n\
Accounts are stored in ~/.config/gctx (override with GCTX_HOME), with \
one saved copy of the credentials per account."
)]
struct Cli {
    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account backed by its own gcloud configuration
    Create {
        /// Account name
        name: String,
        /// GCP project id to bind to the account
        project_id: String,
        /// Run gcloud authentication now and save the resulting credentials
        #[arg(long)]
        auto_save: bool,
    },

    /// Re-authenticate an existing account and update its saved credentials
    Login {
        name: String,
    },

    /// Save the current application default credentials for an account
    Save {
        name: String,
    },

    /// Switch to an account
    Switch {
        name: String,
    },

    /// List all configured accounts
    #[command(alias = "ls")]
    List,

    /// Show the currently active account
    Active,

    /// Show detailed account information
    Info {
        name: String,
    },

    /// Delete an account
    Delete {
        name: String,
        /// Also delete the account's gcloud configuration
        #[arg(long)]
        gcloud_config: bool,
    },

    /// Run a gcloud command with a specific account
    Run {
        name: String,
        /// Arguments passed to gcloud verbatim
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("\n  {} {:#}\n", "Error:".red().bold(), e);
        if let Some(err) = e.downcast_ref::<GctxError>().filter(|err| err.is_not_found()) {
            let hint = match err {
                GctxError::AccountNotFound(_) => "gctx list",
                _ => "gctx save <name>",
            };
            eprintln!("  Try {}\n", hint.cyan().bold());
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gctx={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::from_env()?;
    tracing::debug!(
        "platform: {}, config dir: {}, adc: {}",
        platform::detect(),
        settings.config_dir.display(),
        settings.adc_path.display()
    );

    let mut manager = Manager::from_settings(&settings)?;

    match cli.command {
        Commands::Create {
            name,
            project_id,
            auto_save,
        } => manager.create(&name, &project_id, auto_save),
        Commands::Login { name } => manager.login(&name),
        Commands::Save { name } => manager.save_credentials(&name),
        Commands::Switch { name } => manager.switch(&name),
        Commands::List => {
            manager.list();
            Ok(())
        }
        Commands::Active => {
            manager.active();
            Ok(())
        }
        Commands::Info { name } => manager.info(&name),
        Commands::Delete {
            name,
            gcloud_config,
        } => manager.delete(&name, gcloud_config),
        Commands::Run { name, args } => manager.run_with_account(&name, &args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_passes_flags_through_to_gcloud() {
        let cli = Cli::parse_from(["gctx", "run", "dev", "compute", "instances", "list", "--format=json"]);
        match cli.command {
            Commands::Run { name, args } => {
                assert_eq!(name, "dev");
                assert_eq!(args, ["compute", "instances", "list", "--format=json"]);
            }
            _ => panic!("expected run"),
        }
    }
}
