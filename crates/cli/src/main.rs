use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use studio_types::TaskKind;
use tracing_subscriber::EnvFilter;

mod commands;

/// Develop and run tasks locally.
#[derive(Parser, Debug)]
#[command(name = "studio", version, about)]
struct Args {
    /// Dev config file; defaults to `STUDIO_DEV_CONFIG_PATH` or `airplane.dev.yaml`
    #[arg(long, global = true)]
    dev_config: Option<PathBuf>,

    /// Remote environment used for resources and configs missing locally; defaults to `AIRPLANE_ENV`
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a task locally and print the finished run
    Run(RunArgs),
    /// Edit the config and env vars of the dev config file
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect resources available to local runs
    #[command(subcommand)]
    Resources(ResourcesCommand),
    /// Manage the builtins binary
    #[command(subcommand)]
    Builtins(BuiltinsCommand),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Task slug
    slug: String,

    #[arg(long)]
    kind: TaskKind,

    /// Entrypoint file, relative to the working directory
    #[arg(long)]
    entrypoint: Option<PathBuf>,

    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Parameter value as `name=value`; values that parse as JSON are passed as JSON
    #[arg(long = "param", value_parser = commands::parse_key_value)]
    params: Vec<(String, String)>,

    /// Resource attachment as `alias=slug`
    #[arg(long = "resource", value_parser = commands::parse_key_value)]
    resources: Vec<(String, String)>,

    /// Task env var as `NAME=value`, or `NAME=config:<config name>` to reference a config var
    #[arg(long = "env-var", value_parser = commands::parse_key_value)]
    env_vars: Vec<(String, String)>,

    /// Kind option as `key=value` (for example `method=GET` for REST tasks)
    #[arg(long = "kind-option", value_parser = commands::parse_key_value)]
    kind_options: Vec<(String, String)>,

    /// Directory holding the builtins cache
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Set a config var
    Set { name: String, value: String },
    /// Delete a config var
    Delete { name: String },
    /// Set an env var passed to every local run
    SetEnv { name: String, value: String },
    /// Delete an env var
    DeleteEnv { name: String },
}

#[derive(Subcommand, Debug)]
enum ResourcesCommand {
    /// List local and remote resources with secrets masked
    List,
}

#[derive(Subcommand, Debug)]
enum BuiltinsCommand {
    /// Download the builtins binary if the cached one is missing or stale
    Install {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Download even when the cached binary is current
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let ctx = commands::Context::new(args.dev_config, args.env)?;

    match args.command {
        Command::Run(run) => commands::run_task(&ctx, run).await,
        Command::Config(config) => commands::edit_config(&ctx, config),
        Command::Resources(ResourcesCommand::List) => commands::list_resources(&ctx).await,
        Command::Builtins(BuiltinsCommand::Install { root, force }) => commands::install_builtins(&root, force).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG`, defaulting to `info`.
fn log_filter() -> EnvFilter {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    EnvFilter::new(directives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn log_filter_follows_rust_log() {
        temp_env::with_var_unset("RUST_LOG", || {
            assert_eq!(log_filter().max_level_hint(), Some(LevelFilter::INFO));
        });
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            assert_eq!(log_filter().max_level_hint(), Some(LevelFilter::WARN));
        });
    }
}
