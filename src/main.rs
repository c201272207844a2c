// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the OpenConfig telemetry client.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the OpenConfig telemetry client.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use tokio_util::sync::CancellationToken;

use oc_telemetry::config::SensorConfig;
use oc_telemetry::{
    load_config, run_session, validate_config, ClientConfig, ExitStatus, ManagedChannel,
    RunPhase, Verbosity,
};

/// Telemetry client command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "OpenConfig telemetry client", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "OC_TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Agent host, overriding the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Agent gRPC port, overriding the configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Sensor path to subscribe to; repeat for several. Replaces configured sensors.
    #[arg(long = "sensor", value_name = "PATH")]
    sensors: Vec<String>,

    /// Sampling period applied to every sensor given with --sensor.
    #[arg(long, value_name = "MS")]
    frequency_ms: Option<u32>,

    /// Operational-state reply verbosity.
    #[arg(long, value_enum)]
    verbosity: Option<Verbosity>,

    /// Deadline for each call and each stream read.
    #[arg(long, value_name = "MS")]
    call_timeout_ms: Option<u64>,

    /// Ask the agent to close the stream after this many records.
    #[arg(long, value_name = "N")]
    limit_records: Option<u32>,

    /// Leave trace-propagation headers on outgoing requests.
    #[arg(long)]
    keep_tracing: bool,

    /// Enable debug logging.
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.device.host = host.clone();
        }
        if let Some(port) = self.port {
            config.device.port = port;
        }
        if !self.sensors.is_empty() {
            let frequency_ms = self
                .frequency_ms
                .unwrap_or(oc_telemetry::config::DEFAULT_SENSOR_FREQUENCY_MS);
            config.sensors = self
                .sensors
                .iter()
                .map(|path| SensorConfig {
                    path: path.clone(),
                    frequency_ms,
                })
                .collect();
        } else if let Some(frequency_ms) = self.frequency_ms {
            for sensor in &mut config.sensors {
                sensor.frequency_ms = frequency_ms;
            }
        }
        if let Some(verbosity) = self.verbosity {
            config.probe.verbosity = verbosity;
        }
        if self.call_timeout_ms.is_some() {
            config.connect.call_timeout_ms = self.call_timeout_ms;
        }
        if let Some(limit) = self.limit_records {
            config.subscription.limit_records = limit;
        }
        if self.keep_tracing {
            config.connect.disable_tracing = false;
        }
        validate_config(&config)?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err:#}");
            process::exit(ExitStatus::Configuration.code());
        }
    };
    if config.has_credentials() {
        warn!("device credentials are configured but not applied; the channel is unauthenticated");
    }

    let cancel = CancellationToken::new();
    let device = config.device_endpoint();
    let mut channel = match ManagedChannel::connect(&device, &config.connect_options()) {
        Ok(channel) => channel.with_cancel(cancel.clone()),
        Err(err) => {
            error!("failed to build channel to {device}: {err}");
            process::exit(ExitStatus::for_error(RunPhase::Init, &err).code());
        }
    };

    channel.cancel_on_interrupt(cancel.clone());
    let report = run_session(&mut channel, &config, &cancel);
    info!(
        "run finished: {:?} after {:?} with {} update(s)",
        report.status, report.reached, report.updates
    );
    process::exit(report.status.code());
}
