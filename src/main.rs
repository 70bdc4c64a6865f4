//! hass-scenes-mcp - command line entry point
//!
//! Runs one scene or light tool against the configured Home Assistant and
//! prints the tool response as JSON on stdout. Logs go to stderr.

use hass_scenes_mcp::{
    logging::{init_logging, LogConfig},
    scenes::{CaptureRequest, LightControlRequest, SceneMode},
    tools::{lighting, scenes},
    SceneEngine, ServerConfig, ToolContext, ToolResponse,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, Level};

/// Home Assistant scene engine
#[derive(Parser, Debug)]
#[command(name = "hass-scenes-mcp")]
#[command(about = "Reconcile, repair and activate Home Assistant light scenes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Home Assistant base URL
    #[arg(long, global = true, env = "HASS_URL")]
    url: Option<String>,

    /// Long-lived access token
    #[arg(long, global = true, env = "HASS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a scene and drive its lights
    Activate { scene_id: String },
    /// Show how a scene resolves without writing anything
    Diagnose { scene_id: String },
    /// Write the resolved configuration back to both copies
    Repair { scene_id: String },
    /// Accept the controller's copy as the local baseline
    Sync { scene_id: String },
    /// List every known scene with its diagnosis
    List,
    /// Store the current light states as a scene
    Capture {
        scene_id: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        /// Turn off unlisted lights on activation
        #[arg(long)]
        exclusive: bool,
        /// Lights to include (default: all)
        #[arg(long = "light", value_name = "ENTITY_ID")]
        lights: Vec<String>,
    },
    /// Delete a scene from the controller and the local backup
    Delete { scene_id: String },
    /// List snapshots, newest first
    Snapshots {
        /// Only snapshots of this scene
        #[arg(long)]
        scene: Option<String>,
    },
    /// Write a snapshot back as the scene's configuration
    Restore { snapshot_id: String },
    /// List lights with their device profiles
    Lights,
    /// Set a single light
    Light {
        entity_id: String,
        /// Turn the light off instead of on
        #[arg(long)]
        off: bool,
        #[arg(long)]
        brightness: Option<u8>,
        #[arg(long)]
        kelvin: Option<u32>,
    },
    /// Check connectivity, credentials and the local backup
    Check,
}

impl Cli {
    fn initialize_logging(&self, config: &ServerConfig) {
        let mut log_config = LogConfig::from_settings(&config.logging);
        if self.debug {
            log_config.level = Level::DEBUG;
        }
        if let Err(e) = init_logging(log_config) {
            eprintln!("Failed to initialize logging: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Flags take precedence over the settings file
    if let Some(url) = &cli.url {
        std::env::set_var("HASS_URL", url);
    }
    if let Some(token) = &cli.token {
        std::env::set_var("HASS_TOKEN", token);
    }

    let config = ServerConfig::load().context("Invalid configuration")?;
    cli.initialize_logging(&config);
    debug!(
        url = %config.hass.url,
        backup = %config.storage.backup_path().display(),
        "Configuration loaded"
    );

    let engine = SceneEngine::from_config(&config).context("Failed to start scene engine")?;
    let context = ToolContext::new(Arc::new(engine));

    let response = run(cli.command, context).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status == "error" {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, context: ToolContext) -> ToolResponse {
    match command {
        Command::Activate { scene_id } => scenes::activate_scene(context, scene_id).await,
        Command::Diagnose { scene_id } => scenes::diagnose_scene(context, scene_id).await,
        Command::Repair { scene_id } => scenes::repair_scene(context, scene_id).await,
        Command::Sync { scene_id } => scenes::sync_scene(context, scene_id).await,
        Command::List => scenes::list_scenes(context).await,
        Command::Capture {
            scene_id,
            name,
            exclusive,
            lights,
        } => {
            let request = CaptureRequest {
                scene_id,
                name,
                mode: if exclusive {
                    SceneMode::Exclusive
                } else {
                    SceneMode::Additive
                },
                icon: None,
                entity_ids: (!lights.is_empty()).then_some(lights),
            };
            scenes::capture_scene(context, request).await
        }
        Command::Delete { scene_id } => scenes::delete_scene(context, scene_id).await,
        Command::Snapshots { scene } => scenes::list_snapshots(context, scene).await,
        Command::Restore { snapshot_id } => scenes::restore_snapshot(context, snapshot_id).await,
        Command::Lights => lighting::list_lights(context).await,
        Command::Light {
            entity_id,
            off,
            brightness,
            kelvin,
        } => {
            let request = LightControlRequest {
                entity_id,
                state: off.then_some(hass_scenes_mcp::scenes::model::PowerState::Off),
                brightness,
                color_temp_kelvin: kelvin,
                ..Default::default()
            };
            lighting::control_light(context, request).await
        }
        Command::Check => lighting::check_connection(context).await,
    }
}
