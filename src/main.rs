//! basalt CLI

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use basalt::ui::{Output, Reporter};
use basalt::Paths;

mod cmd;

#[derive(Parser)]
#[command(name = "basalt")]
#[command(author, version, about = "basalt - transactional package manager")]
pub struct Cli {
    /// Install root (the directory treated as `/`)
    #[arg(long, global = true, default_value = "/")]
    root: PathBuf,

    /// Assume yes on confirmations
    #[arg(long, global = true)]
    yes: bool,

    /// Bypass the already-installed check and advisory protections
    #[arg(long, global = true)]
    force: bool,

    /// Disable signature verification
    #[arg(long = "skip-gpg", global = true)]
    skip_gpg: bool,

    /// Never download; use cached artifacts only
    #[arg(long = "skip-download", global = true)]
    skip_download: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, download and install packages (names or local .pkg files)
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove an installed package
    Remove {
        package: String,
    },
    /// Refresh repository indices
    Sync,
    /// Plan and apply all version upgrades
    Update,
    /// Enumerate installed packages
    List,
    /// Scan the installed set for broken dependencies
    Audit,
    /// Clean up after an interrupted transaction
    Recover,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = Paths::new(&cli.root);
    let reporter = Output::new(cli.quiet);

    let result = match &cli.command {
        Commands::Install { packages } => {
            cmd::install::install(
                &paths,
                &reporter,
                packages,
                cli.force,
                cli.skip_gpg,
                cli.skip_download,
            )
            .await
        }
        Commands::Remove { package } => {
            cmd::remove::remove(&paths, &reporter, package, cli.yes, cli.force)
        }
        Commands::Sync => cmd::sync::sync(&paths, &reporter, cli.skip_gpg, cli.skip_download).await,
        Commands::Update => {
            cmd::update::update(&paths, &reporter, cli.skip_gpg, cli.skip_download).await
        }
        Commands::List => cmd::list::list(&paths),
        Commands::Audit => cmd::audit::audit(&paths, &reporter),
        Commands::Recover => cmd::recover::recover(&paths, &reporter),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.error(&e.to_string());
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
