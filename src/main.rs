use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xxmi_installer::commands::install::{self, InstallArgs, Mode};

#[derive(Parser)]
#[command(name = "xxmi-installer")]
#[command(about = "Installs and updates XXMI Launcher", long_about = None)]
#[command(version)]
struct Cli {
    /// Switch between installer and updater behavior
    #[arg(short, long, value_enum, default_value = "installer")]
    mode: Mode,

    /// Launcher installation directory
    #[arg(short, long, value_name = "DIR")]
    dist_dir: Option<PathBuf>,

    /// Do not create a desktop shortcut
    #[arg(long)]
    no_shortcut: bool,

    /// Config file location (default: <data dir>/XXMI Installer/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Check versions without installing anything
    #[arg(long)]
    no_install: bool,

    /// Install even when auto-update is disabled
    #[arg(short, long)]
    force: bool,

    /// Reinstall even when already up to date
    #[arg(short, long)]
    reinstall: bool,

    /// Only process the named package (repeatable)
    #[arg(short, long = "package", value_name = "NAME")]
    packages: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    install::execute(InstallArgs {
        mode: cli.mode,
        dist_dir: cli.dist_dir,
        no_shortcut: cli.no_shortcut,
        config: cli.config,
        no_install: cli.no_install,
        force: cli.force,
        reinstall: cli.reinstall,
        packages: cli.packages,
    })?;
    Ok(())
}
