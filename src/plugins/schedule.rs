//! Periodic-sync configuration for an external scheduler.
//!
//! hnp never spawns its own timer thread. `.hnp/periodic-sync.yaml` is the
//! handshake with whatever cron/ticker drives it: operators set `enabled`
//! and the interval here, the scheduler reads them, and a successful
//! mutating sync stamps `last_run`/`next_run`.

use crate::core::error::HnpError;
use crate::core::layout::FgdLayout;
use crate::core::time;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicSyncConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub next_run: Option<String>,
}

impl Default for PeriodicSyncConfig {
    fn default() -> Self {
        PeriodicSyncConfig {
            enabled: false,
            interval_minutes: 15,
            last_run: None,
            next_run: None,
        }
    }
}

/// Missing file reads as the default config; a scheduler probing an
/// uninitialized fabric sees "disabled" rather than an error.
pub fn read_config(layout: &FgdLayout) -> Result<PeriodicSyncConfig, HnpError> {
    let path = layout.periodic_sync_path();
    if !path.exists() {
        return Ok(PeriodicSyncConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(HnpError::IoError)?;
    serde_yaml_ng::from_str(&content).map_err(|e| HnpError::YamlInvalid(e.to_string()))
}

pub fn write_config(layout: &FgdLayout, config: &PeriodicSyncConfig) -> Result<(), HnpError> {
    let rendered = serde_yaml_ng::to_string(config)
        .map_err(|e| HnpError::ValidationError(format!("scheduler config render failed: {}", e)))?;
    fs::write(layout.periodic_sync_path(), rendered).map_err(HnpError::IoError)?;
    Ok(())
}

/// Stamp a completed mutating run: `last_run = now`,
/// `next_run = now + interval`.
pub fn record_run(layout: &FgdLayout) -> Result<(), HnpError> {
    let mut config = read_config(layout)?;
    config.last_run = Some(time::now_rfc3339());
    config.next_run = Some(time::rfc3339_in_minutes(config.interval_minutes));
    write_config(layout, &config)
}

#[derive(Parser, Debug)]
pub struct ScheduleCli {
    #[clap(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Show the scheduler handshake file
    Show {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Update enabled flag and/or interval
    Set {
        #[clap(long)]
        enabled: Option<bool>,
        #[clap(long)]
        interval_minutes: Option<u64>,
    },
}

pub fn run_schedule_cli(layout: &FgdLayout, cli: ScheduleCli) -> Result<(), HnpError> {
    match cli.command {
        ScheduleCommand::Show { format } => {
            let config = read_config(layout)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&config).unwrap());
            } else {
                println!(
                    "periodic sync: {}",
                    if config.enabled { "enabled" } else { "disabled" }
                );
                println!("interval: {} minute(s)", config.interval_minutes);
                println!("last run: {}", config.last_run.as_deref().unwrap_or("never"));
                println!("next run: {}", config.next_run.as_deref().unwrap_or("unscheduled"));
            }
        }
        ScheduleCommand::Set {
            enabled,
            interval_minutes,
        } => {
            let mut config = read_config(layout)?;
            if let Some(flag) = enabled {
                config.enabled = flag;
            }
            if let Some(minutes) = interval_minutes {
                if minutes == 0 {
                    return Err(HnpError::ValidationError(
                        "interval must be at least 1 minute".to_string(),
                    ));
                }
                config.interval_minutes = minutes;
            }
            if config.enabled {
                config.next_run = Some(time::rfc3339_in_minutes(config.interval_minutes));
            }
            write_config(layout, &config)?;
            println!(
                "{}",
                serde_json::json!({
                    "ts": time::now_rfc3339(),
                    "cmd": "schedule.set",
                    "enabled": config.enabled,
                    "interval_minutes": config.interval_minutes,
                })
            );
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "schedule",
        "version": "0.1.0",
        "description": "Scheduler handshake file for externally driven periodic sync",
        "commands": [
            { "name": "show", "parameters": ["format"] },
            { "name": "set", "parameters": ["enabled", "interval_minutes"] }
        ],
        "storage": [".hnp/periodic-sync.yaml"]
    })
}
