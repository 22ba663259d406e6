//! KeyRelay.Macro - Trigger engine and macro runner process
//!
//! `run` arms the trigger engine and blocks until Ctrl+C; `macro` loops a
//! built-in recipe until auto-stop or Ctrl+C. The remaining subcommands
//! maintain the mapping file and print the control-plane response as JSON.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use keyrelay_core::config::{self, AppConfig};
use keyrelay_core::logging::init_logging;
use keyrelay_core::notify::{LogNotifier, NotificationHub};
use keyrelay_core::registry::MappingRegistry;
use keyrelay_macro::input_hooks::platform_hook;
use keyrelay_macro::input_sender::{platform_emitter, shared};
use keyrelay_macro::{ControlPlane, EngineSettings, KeyEngine, MacroRunner, Response, RunnerSettings};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "KeyRelay_Macro")]
#[command(version)]
#[command(about = "Global trigger keys that replay keystroke sequences", long_about = None)]
struct Cli {
    /// Override the data directory (mapping file, config, log)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (defaults to the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm the trigger engine until Ctrl+C
    Run,

    /// Loop a built-in macro until auto-stop or Ctrl+C
    Macro {
        /// Recipe id (see `recipes`)
        mode: String,

        /// Stop automatically after this many hours
        #[arg(long)]
        hours: Option<f64>,

        /// Continue a paused session without a start notification
        #[arg(long)]
        resume: bool,
    },

    /// List built-in macro recipes
    Recipes,

    /// List mappings grouped by trigger
    #[command(alias = "ls")]
    List,

    /// Add a mapping, e.g. `add "copy" end "ctrl+c(100), enter"`
    Add {
        name: String,
        trigger: String,
        sequence: String,
    },

    /// Replace a mapping's name, trigger and sequence
    Update {
        id: String,
        name: String,
        trigger: String,
        sequence: String,
    },

    /// Delete a mapping
    #[command(alias = "rm")]
    Remove(Target),

    /// Enable or disable a mapping
    Toggle(Target),

    /// Delete every mapping
    Clear,

    /// List usable key names
    Keys {
        /// Show combo examples instead
        #[arg(long)]
        combos: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it to config.json in the data directory
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Mapping id
    #[arg(long)]
    id: Option<String>,

    /// Trigger key; acts on the first mapping for it
    #[arg(long)]
    trigger: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => {
            config::ensure_directory(&dir)?;
            dir
        }
        None => config::get_data_directory()?,
    };
    let app_config = config::load_config_from(&data_dir);
    let level = cli.log_level.as_deref().unwrap_or(&app_config.log_level);
    init_logging(level, Some(&config::log_path(&data_dir)))?;
    info!("KeyRelay.Macro starting (data dir {})", data_dir.display());

    if let Commands::Config { write } = cli.command {
        if write {
            config::save_config_to(&data_dir, &app_config)?;
            info!("Wrote {}", data_dir.join(config::CONFIG_FILE).display());
        }
        println!("{}", serde_json::to_string_pretty(&app_config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let registry = MappingRegistry::open(config::mappings_path(&data_dir))
        .context("Failed to load mappings")?;
    let hub = Arc::new(if app_config.notifications {
        NotificationHub::new(vec![Box::new(LogNotifier)])
    } else {
        NotificationHub::disabled()
    });
    let plane = build_control_plane(Arc::new(registry), Arc::clone(&hub), &app_config);

    let success = match cli.command {
        Commands::Run => run_engine(&plane)?,
        Commands::Macro { mode, hours, resume } => run_macro(&plane, &mode, hours, resume)?,
        Commands::Recipes => print(&plane.recipes())?,
        Commands::List => print(&plane.list())?,
        Commands::Add {
            name,
            trigger,
            sequence,
        } => print(&plane.create(&name, &trigger, &sequence))?,
        Commands::Update {
            id,
            name,
            trigger,
            sequence,
        } => print(&plane.update(&id, &name, &trigger, &sequence))?,
        Commands::Remove(target) => match (target.id, target.trigger) {
            (Some(id), _) => print(&plane.delete_by_id(&id))?,
            (None, Some(trigger)) => print(&plane.delete_by_trigger(&trigger))?,
            (None, None) => false,
        },
        Commands::Toggle(target) => match (target.id, target.trigger) {
            (Some(id), _) => print(&plane.toggle_by_id(&id))?,
            (None, Some(trigger)) => print(&plane.toggle_by_trigger(&trigger))?,
            (None, None) => false,
        },
        Commands::Clear => print(&plane.engine_clear())?,
        Commands::Keys { combos: true } => print(&plane.combo_examples())?,
        Commands::Keys { combos: false } => print(&plane.available_keys())?,
        Commands::Config { .. } => true,
    };

    drop(plane);
    hub.shutdown();
    info!("KeyRelay.Macro shutting down");
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_control_plane(
    registry: Arc<MappingRegistry>,
    hub: Arc<NotificationHub>,
    app_config: &AppConfig,
) -> ControlPlane {
    let emitter = shared(platform_emitter());
    let engine = KeyEngine::new(
        registry,
        Arc::clone(&emitter),
        platform_hook(),
        EngineSettings::from_config(app_config),
    );
    let runner = MacroRunner::new(emitter, hub, RunnerSettings::from_config(app_config));
    ControlPlane::new(Arc::new(engine), Arc::new(runner))
}

fn print<T: Serialize>(response: &Response<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(response.success)
}

fn ctrl_c_channel() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(rx)
}

fn run_engine(plane: &ControlPlane) -> Result<bool> {
    let interrupted = ctrl_c_channel()?;
    if !print(&plane.engine_start())? {
        return Ok(false);
    }

    info!("Trigger engine armed, press Ctrl+C to stop");
    // A hook fault tears the engine down; exit instead of waiting forever
    loop {
        match interrupted.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !plane.engine_status().data.map(|d| d.status.running).unwrap_or(false) {
                    print(&plane.engine_status())?;
                    return Ok(false);
                }
            }
        }
    }
    print(&plane.engine_stop())
}

fn run_macro(plane: &ControlPlane, mode: &str, hours: Option<f64>, resume: bool) -> Result<bool> {
    let interrupted = ctrl_c_channel()?;
    if !print(&plane.macro_start(mode, hours, resume))? {
        return Ok(false);
    }

    loop {
        match interrupted.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return print(&plane.macro_stop()),
            Err(RecvTimeoutError::Timeout) => {
                let status = plane.macro_status();
                if !status.data.as_ref().map(|d| d.status.running).unwrap_or(false) {
                    return print(&status);
                }
            }
        }
    }
}
