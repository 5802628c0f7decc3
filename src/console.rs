//! ==============================================================================
//! console.rs - configuration commands over stdin
//! ==============================================================================
//!
//! purpose:
//!     lets an operator set up the station from a terminal. two forms are
//!     accepted, one command per line:
//!
//!     text:   ssid=MyNetwork
//!             pass=hunter2          (alias of secret=)
//!             api=abc123            (alias of apiKey=)
//!             station=berlin-01     (alias of stationId=)
//!             lat=52,5200           (comma or dot)
//!             interval=15           (alias of intervalMinutes=, min 1)
//!             info | restart | help
//!
//!     json:   {"ssid": "MyNetwork", "lat": 52.52, "command": "restart"}
//!
//!     lines are parsed on a reader task and applied by the device on its
//!     next tick, so the control loop stays the only writer of station state.
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use sysinfo::System;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::settings::{SettingKey, SettingsStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Set(SettingKey, String),
    Restart,
    Info,
    Help,
    /// settings file changed on disk
    Reload,
}

/// parse one console line into zero or more commands
pub fn parse_line(line: &str) -> Result<Vec<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(vec![]);
    }
    if line.starts_with('{') {
        return parse_json(line);
    }

    if let Some((key, value)) = line.split_once('=') {
        let key = SettingKey::parse(key).ok_or_else(|| anyhow!("unknown setting '{}'", key.trim()))?;
        return Ok(vec![Command::Set(key, value.trim().to_string())]);
    }

    Ok(vec![verb(line)?])
}

fn verb(word: &str) -> Result<Command> {
    match word.trim().to_ascii_lowercase().as_str() {
        "restart" | "reboot" => Ok(Command::Restart),
        "info" | "status" => Ok(Command::Info),
        "help" | "?" => Ok(Command::Help),
        other => bail!("unknown command '{}' (type 'help')", other),
    }
}

fn parse_json(line: &str) -> Result<Vec<Command>> {
    let object: serde_json::Map<String, Value> = serde_json::from_str(line)?;
    let mut commands = Vec::new();
    let mut trailing = None;

    for (name, value) in object {
        if name == "command" {
            let word = value
                .as_str()
                .ok_or_else(|| anyhow!("\"command\" must be a string"))?;
            // run after the settings in the same object
            trailing = Some(verb(word)?);
            continue;
        }
        let Some(key) = SettingKey::parse(&name) else {
            warn!("[CONSOLE] ignoring unknown key '{}'", name);
            continue;
        };
        let raw = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => bail!("'{}' must be a string or number, got {}", name, other),
        };
        commands.push(Command::Set(key, raw));
    }
    commands.extend(trailing);
    Ok(commands)
}

/// read stdin line by line and forward parsed commands
pub fn spawn_reader(tx: UnboundedSender<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[CONSOLE] Ready (type 'help')");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(commands) => {
                        for command in commands {
                            if tx.send(command).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("[CONSOLE] {:#}", e),
                },
                Ok(None) => {
                    debug!("[CONSOLE] stdin closed");
                    return;
                }
                Err(e) => {
                    warn!("[CONSOLE] read error: {}", e);
                    return;
                }
            }
        }
    })
}

pub fn help_lines() -> Vec<&'static str> {
    vec![
        "commands:",
        "  ssid=<name>              - network name (restart to apply)",
        "  pass=<secret>            - network secret (restart to apply)",
        "  api=<key>                - ingest api key",
        "  station=<id>             - station id",
        "  lat=<deg> / lon=<deg>    - coordinates, comma or dot decimals",
        "  interval=<minutes>       - upload interval, min 1",
        "  info                     - show settings and system status",
        "  restart                  - re-run boot with current settings",
        "  help                     - this text",
        "  json: {\"ssid\": \"..\", \"interval\": 15, \"command\": \"restart\"}",
    ]
}

/// settings (credentials masked) plus host uptime and memory
pub fn info_lines(settings: &SettingsStore) -> Vec<String> {
    let config = settings.config();
    let mut lines = vec![
        "--- current settings ---".to_string(),
        format!("SSID: {}", config.ssid),
        format!("Secret: {}", settings.masked(SettingKey::Secret)),
        format!("API key: {}", settings.masked(SettingKey::ApiKey)),
        format!("Station: {}", config.station_id),
        format!("Lat: {:.6}", config.lat),
        format!("Lon: {:.6}", config.lon),
        format!("Interval: {} min", config.interval_minutes),
        format!("Configured: {}", if settings.is_configured() { "yes" } else { "no" }),
    ];

    let mut sys = System::new();
    sys.refresh_memory();
    lines.push(format!("Uptime: {}s", System::uptime()));
    lines.push(format!(
        "Memory: {} / {} MiB",
        sys.used_memory() / (1024 * 1024),
        sys.total_memory() / (1024 * 1024)
    ));
    lines
}
