mod common;
mod package;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::common::config::EngineConfig;
use crate::common::paths;
use crate::common::platform::{Distribution, Platform, normalize_arch};
use crate::package::Engine;
use crate::package::context::ExecContext;
use crate::package::engine::Resolved;
use crate::package::manager::InstallOptions;
use crate::ui::prelude::*;

/// Game server panel package installer
#[derive(Parser, Debug)]
#[command(name = "panelctl", author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Print commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Additional catalog directory layered over the built-in catalogs (repeatable)
    #[arg(long = "catalog-dir", global = true, value_name = "DIR")]
    catalog_dirs: Vec<PathBuf>,

    /// Override the detected distribution ID
    #[arg(long, global = true)]
    distro: Option<String>,

    /// Override the detected distribution version
    #[arg(long, global = true)]
    distro_version: Option<String>,

    /// Override the detected distribution codename
    #[arg(long, global = true)]
    codename: Option<String>,

    /// Override the detected CPU architecture
    #[arg(long, global = true)]
    arch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install packages in the given order
    Install {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Value handed to catalog steps as {config:KEY} (repeatable)
        #[arg(long = "config-value", value_name = "KEY=VALUE", value_parser = parse_config_value)]
        config_values: Vec<(String, String)>,
    },
    /// Remove packages
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove packages including their configuration
    Purge {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Show what the active backend knows about a package
    Search { name: String },
    /// Refresh package metadata
    Update,
    /// Show the catalog definition install would use
    Resolve {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Show the detected platform and selected backend
    Platform,
    /// Show the effective engine configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::set_debug_mode(cli.debug);
    let format = if cli.json {
        ui::OutputFormat::Json
    } else {
        ui::OutputFormat::Text
    };
    ui::init(format, !cli.json && std::io::stdout().is_terminal());

    if let Err(e) = run(cli).await {
        emit(Level::Error, "panelctl.error", &format!("{:#}", e), None);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load()?;

    if let Commands::Config { write } = &cli.command {
        return show_config(&config, *write);
    }

    let platform = detect_platform(&cli)?;

    let token = CancellationToken::new();
    spawn_interrupt_handler(token.clone());

    let ctx = ExecContext::from_config(&config, token, cli.dry_run)?;
    let overlay_dirs = overlay_dirs(&config, &cli.catalog_dirs);
    let engine = Engine::build(platform, &config, ctx, &overlay_dirs)?;

    match cli.command {
        Commands::Install {
            packages,
            config_values,
        } => {
            let options = config_values
                .into_iter()
                .fold(InstallOptions::default(), |options, (key, value)| {
                    options.with_config_value(key, value)
                });
            engine.install(&packages, &options).await?;
            emit(
                Level::Success,
                "package.install.done",
                &format!("Installed {}", packages.join(", ")),
                Some(serde_json::json!({ "packages": packages })),
            );
        }
        Commands::Remove { packages } => {
            engine.remove(&packages).await?;
            emit(
                Level::Success,
                "package.remove.done",
                &format!("Removed {}", packages.join(", ")),
                Some(serde_json::json!({ "packages": packages })),
            );
        }
        Commands::Purge { packages } => {
            engine.purge(&packages).await?;
            emit(
                Level::Success,
                "package.purge.done",
                &format!("Purged {}", packages.join(", ")),
                Some(serde_json::json!({ "packages": packages })),
            );
        }
        Commands::Search { name } => {
            let found = engine.search(&name).await?;
            if found.is_empty() {
                emit(
                    Level::Warn,
                    "package.search.empty",
                    &format!("No package matches {}", name),
                    None,
                );
            }
            for info in found {
                let message = format!(
                    "{} {} {} {}",
                    info.name, info.version, info.architecture, info.description
                );
                emit(
                    Level::Info,
                    "package.search.result",
                    message.trim_end(),
                    serde_json::to_value(&info).ok(),
                );
            }
        }
        Commands::Update => {
            engine.check_for_updates().await?;
            emit(
                Level::Success,
                "package.update.done",
                "Package metadata is up to date",
                None,
            );
        }
        Commands::Resolve { packages } => {
            for name in &packages {
                let resolved = engine.resolve(name)?;
                show_resolved(name, &resolved)?;
            }
        }
        Commands::Platform => {
            let mut data = engine.platform().to_json();
            if let Some(map) = data.as_object_mut() {
                map.insert("backend".into(), engine.backend_name().into());
                map.insert(
                    "selection".into(),
                    serde_json::to_value(engine.selection())
                        .context("serializing backend selection")?,
                );
            }
            emit(
                Level::Info,
                "platform.detected",
                &format!("{} via {}", engine.platform(), engine.backend_name()),
                Some(data),
            );
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Detected platform with command-line overrides applied. Detection may fail
/// when the distribution is given explicitly.
fn detect_platform(cli: &Cli) -> Result<Platform> {
    let detected = match Platform::detect() {
        Ok(platform) => platform,
        Err(e) if cli.distro.is_some() => {
            emit(
                Level::Debug,
                "platform.detect",
                &format!("{:#}, using overrides", e),
                None,
            );
            Platform::new(
                Distribution::Other(String::new()),
                "",
                "",
                normalize_arch(std::env::consts::ARCH),
            )
        }
        Err(e) => return Err(e),
    };

    Ok(detected.with_overrides(
        cli.distro.as_deref(),
        cli.distro_version.as_deref(),
        cli.codename.as_deref(),
        cli.arch.as_deref(),
    ))
}

fn parse_config_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

/// Catalog overlays in precedence order: config file, user directory, then
/// command line.
fn overlay_dirs(config: &EngineConfig, cli_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = config
        .catalog_dirs
        .iter()
        .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).to_string()))
        .collect();
    dirs.extend(paths::user_catalog_dir());
    dirs.extend(cli_dirs.iter().cloned());
    dirs
}

fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            emit(
                Level::Warn,
                "panelctl.interrupted",
                "Interrupted, stopping after the current command",
                None,
            );
            token.cancel();
        }
    });
}

fn show_resolved(name: &str, resolved: &Resolved) -> Result<()> {
    if ui::get_output_format() == ui::OutputFormat::Json {
        emit(
            Level::Info,
            "package.resolve",
            name,
            Some(serde_json::to_value(resolved).context("serializing resolved package")?),
        );
        return Ok(());
    }

    let document = serde_yaml::to_string(resolved).context("serializing resolved package")?;
    emit(
        Level::Info,
        "package.resolve",
        &format!("# {}\n{}", name, document.trim_end()),
        None,
    );
    Ok(())
}

fn show_config(config: &EngineConfig, write: bool) -> Result<()> {
    let path = paths::engine_config_path()?;
    if write {
        config.save_to(&path)?;
        emit(
            Level::Success,
            "config.written",
            &format!("Wrote {}", path.display()),
            None,
        );
        return Ok(());
    }

    let content = toml::to_string_pretty(config).context("serializing engine config")?;
    emit(
        Level::Info,
        "config.show",
        &format!("# {}\n{}", path.display(), content.trim_end()),
        Some(serde_json::json!({ "path": path, "config": config })),
    );
    Ok(())
}
