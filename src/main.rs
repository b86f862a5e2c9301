//! stagesync - headless live sync node.
//!
//! Joins a room on the sync server, opens the bridge link, and keeps both
//! connected until interrupted. Stage gear receives the MIDI clock and
//! section cues through the bridge.
//!
//! # Usage
//!
//! ```bash
//! stagesync --config live.json
//! stagesync --config live.json --role host --room sunday-am
//! RUST_LOG=stagesync=debug stagesync --config live.json
//! ```

use stagesync::midi::MidiSink;
use stagesync::{LiveConfig, LiveSession, Role, TransportEvent};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line options for the application.
struct CliOptions {
    /// Path to a JSON config file.
    config: Option<PathBuf>,
    /// Overrides the configured role.
    role: Option<Role>,
    /// Overrides the configured room.
    room: Option<String>,
    /// Name fragment of the native MIDI output port to drive.
    midi_port: Option<String>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--config <path>` or `-c <path>`: Load settings from a JSON file
    /// - `--role host|follower`: Override the sync role
    /// - `--room <id>`: Override the room id
    /// - `--midi-port <name>`: Native MIDI output port (native-midi builds)
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            config: None,
            role: None,
            room: None,
            midi_port: None,
        };
        let mut i = 1;

        let value = |i: usize, flag: &str| -> String {
            match args.get(i) {
                Some(value) => value.clone(),
                None => {
                    eprintln!("Error: {} requires a value", flag);
                    std::process::exit(1);
                }
            }
        };

        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    options.config = Some(PathBuf::from(value(i, "--config")));
                }
                "--role" => {
                    i += 1;
                    options.role = Some(match value(i, "--role").as_str() {
                        "host" => Role::Host,
                        "follower" => Role::Follower,
                        other => anyhow::bail!("unknown role '{}' (expected host or follower)", other),
                    });
                }
                "--room" => {
                    i += 1;
                    options.room = Some(value(i, "--room"));
                }
                "--midi-port" => {
                    i += 1;
                    options.midi_port = Some(value(i, "--midi-port"));
                }
                "--help" | "-h" => {
                    eprintln!("stagesync - live performance sync node");
                    eprintln!();
                    eprintln!(
                        "Usage: {} [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("stagesync")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -c, --config PATH      Load settings from a JSON config file");
                    eprintln!("      --role ROLE        host or follower");
                    eprintln!("      --room ID          Room to join on the sync server");
                    eprintln!("      --midi-port NAME   Native MIDI output port (native-midi builds)");
                    eprintln!("  -h, --help             Print this help message");
                    eprintln!();
                    eprintln!("Set RUST_LOG to control log output (e.g. RUST_LOG=stagesync=debug).");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        Ok(options)
    }
}

#[cfg(feature = "native-midi")]
fn native_sinks(port_hint: Option<&str>) -> Vec<Arc<dyn MidiSink>> {
    match stagesync::midi::NativeMidiOutput::open(port_hint) {
        Ok(output) => vec![Arc::new(output)],
        Err(e) => {
            tracing::warn!(error = %e, "no native MIDI output, clock goes to the bridge only");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "native-midi"))]
fn native_sinks(port_hint: Option<&str>) -> Vec<Arc<dyn MidiSink>> {
    if port_hint.is_some() {
        tracing::warn!("--midi-port ignored: built without native-midi");
    }
    Vec::new()
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI options first
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => LiveConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LiveConfig::default(),
    };
    if let Some(role) = cli.role {
        config.role = role;
    }
    if let Some(room) = cli.room {
        config.room_id = room;
    }
    let config = config.validate().context("invalid configuration")?;
    if config.sync_url.is_none() && config.bridge_url.is_none() {
        tracing::warn!("neither syncUrl nor bridgeUrl configured; nothing to connect");
    }

    let session = LiveSession::websocket(config, native_sinks(cli.midi_port.as_deref()));
    let _sync_log = session.sync().subscribe(|event| match event {
        TransportEvent::Status(status) => tracing::info!(?status, "sync link"),
        TransportEvent::Message(message) => tracing::debug!(?message, "sync message"),
    });
    let _bridge_log = session.bridge().subscribe(|event| match event {
        TransportEvent::Status(status) => tracing::info!(?status, "bridge link"),
        TransportEvent::Message(message) => tracing::debug!(?message, "bridge message"),
    });
    session.connect_all();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    session.shutdown();
    Ok(())
}
