// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate the telemetry client configuration.
// Author: Lukas Bower

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use crate::channel::{ConnectOptions, DeviceEndpoint, DEFAULT_TRACING_HEADERS};
use crate::probe::ALL_SUBSCRIPTIONS;
use crate::proto::VerbosityLevel;
use crate::stream::{SensorPath, SubscriptionLimits};

/// Default agent address.
pub const DEFAULT_DEVICE_HOST: &str = "10.49.239.48";
/// Default agent gRPC port.
pub const DEFAULT_DEVICE_PORT: u16 = 50051;
/// Default sensor path.
pub const DEFAULT_SENSOR_PATH: &str = "/interfaces/interface[name='ge-0/0/0']/state/";
/// Default sampling period in milliseconds.
pub const DEFAULT_SENSOR_FREQUENCY_MS: u32 = 5000;
/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    /// Agent address and placeholder credentials.
    pub device: DeviceConfig,
    /// Channel construction settings.
    pub connect: ConnectConfig,
    /// Operational-state query settings.
    pub probe: ProbeConfig,
    /// Sensor paths to subscribe to, in order.
    #[serde(rename = "sensor")]
    pub sensors: Vec<SensorConfig>,
    /// Agent-side subscription bounds.
    pub subscription: SubscriptionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            connect: ConnectConfig::default(),
            probe: ProbeConfig::default(),
            sensors: vec![SensorConfig::default()],
            subscription: SubscriptionConfig::default(),
        }
    }
}

/// `[device]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeviceConfig {
    /// Hostname or IP address of the agent.
    pub host: String,
    /// gRPC port of the agent.
    pub port: u16,
    /// Placeholder; credentials are never sent.
    pub username: String,
    /// Placeholder; credentials are never sent.
    pub password: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DEVICE_HOST.to_owned(),
            port: DEFAULT_DEVICE_PORT,
            username: String::new(),
            password: String::new(),
        }
    }
}

/// `[connect]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConnectConfig {
    /// Strip trace-propagation metadata from requests.
    pub disable_tracing: bool,
    /// Metadata keys stripped when tracing is disabled.
    pub tracing_headers: Vec<String>,
    /// Connection attempt bound in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Per-call (and per-read) deadline in milliseconds; unset blocks indefinitely.
    pub call_timeout_ms: Option<u64>,
    /// HTTP/2 keepalive interval in milliseconds.
    pub keepalive_ms: Option<u64>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            disable_tracing: true,
            tracing_headers: DEFAULT_TRACING_HEADERS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            call_timeout_ms: None,
            keepalive_ms: None,
        }
    }
}

/// `[probe]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProbeConfig {
    /// Subscription scope; defaults to every subscription.
    pub subscription_id: u32,
    /// Reply verbosity.
    pub verbosity: Verbosity,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            subscription_id: ALL_SUBSCRIPTIONS,
            verbosity: Verbosity::Brief,
        }
    }
}

/// Operational-state verbosity selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Full detail.
    Detail,
    /// Reduced detail.
    Terse,
    /// Summary only.
    Brief,
}

impl From<Verbosity> for VerbosityLevel {
    fn from(value: Verbosity) -> Self {
        match value {
            Verbosity::Detail => VerbosityLevel::Detail,
            Verbosity::Terse => VerbosityLevel::Terse,
            Verbosity::Brief => VerbosityLevel::Brief,
        }
    }
}

/// `[[sensor]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Sensor path.
    pub path: String,
    /// Sampling period in milliseconds.
    #[serde(default = "default_frequency_ms")]
    pub frequency_ms: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SENSOR_PATH.to_owned(),
            frequency_ms: DEFAULT_SENSOR_FREQUENCY_MS,
        }
    }
}

fn default_frequency_ms() -> u32 {
    DEFAULT_SENSOR_FREQUENCY_MS
}

/// `[subscription]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SubscriptionConfig {
    /// Close after this many records (0 = unbounded).
    pub limit_records: u32,
    /// Close after this many seconds (0 = unbounded).
    pub limit_time_seconds: u32,
    /// Request an explicit end-of-stream marker.
    pub need_eos: bool,
}

impl ClientConfig {
    /// Agent endpoint.
    #[must_use]
    pub fn device_endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.device.host.clone(), self.device.port)
    }

    /// Channel construction options.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            disable_tracing: self.connect.disable_tracing,
            tracing_headers: self.connect.tracing_headers.clone(),
            connect_timeout: self.connect.connect_timeout_ms.map(Duration::from_millis),
            keepalive_interval: self.connect.keepalive_ms.map(Duration::from_millis),
        }
    }

    /// Per-call deadline, if configured.
    #[must_use]
    pub fn call_deadline(&self) -> Option<Duration> {
        self.connect.call_timeout_ms.map(Duration::from_millis)
    }

    /// Sensor paths in subscription order.
    #[must_use]
    pub fn sensor_paths(&self) -> Vec<SensorPath> {
        self.sensors
            .iter()
            .map(|sensor| SensorPath::new(sensor.path.clone(), sensor.frequency_ms))
            .collect()
    }

    /// Agent-side subscription bounds.
    #[must_use]
    pub fn limits(&self) -> SubscriptionLimits {
        SubscriptionLimits {
            limit_records: self.subscription.limit_records,
            limit_time_seconds: self.subscription.limit_time_seconds,
            need_eos: self.subscription.need_eos,
        }
    }

    /// Whether placeholder credentials were supplied.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.device.username.is_empty() || !self.device.password.is_empty()
    }
}

/// Parse and validate a configuration document.
pub fn parse_config(text: &str) -> Result<ClientConfig> {
    let config: ClientConfig = toml::from_str(text).context("invalid telemetry client TOML")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read telemetry config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid telemetry config {}", path.display()))
}

/// Reject configurations the client cannot act on.
pub fn validate_config(config: &ClientConfig) -> Result<()> {
    if config.device.host.trim().is_empty() {
        return Err(anyhow!("device host must not be empty"));
    }
    if config.device.port == 0 {
        return Err(anyhow!("device port must be >= 1"));
    }
    if config.sensors.is_empty() {
        return Err(anyhow!("at least one [[sensor]] entry is required"));
    }
    for (index, sensor) in config.sensors.iter().enumerate() {
        if sensor.path.trim().is_empty() {
            return Err(anyhow!("sensor {index} path must not be empty"));
        }
        if sensor.frequency_ms == 0 {
            return Err(anyhow!(
                "sensor {index} ({}) frequency_ms must be >= 1",
                sensor.path
            ));
        }
    }
    if config.connect.connect_timeout_ms == Some(0) {
        return Err(anyhow!("connect_timeout_ms must be >= 1 when set"));
    }
    if config.connect.call_timeout_ms == Some(0) {
        return Err(anyhow!("call_timeout_ms must be >= 1 when set"));
    }
    if config.connect.keepalive_ms == Some(0) {
        return Err(anyhow!("keepalive_ms must be >= 1 when set"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_reference_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.device_endpoint().uri(), "http://10.49.239.48:50051");
        assert_eq!(config.probe.subscription_id, ALL_SUBSCRIPTIONS);
        assert_eq!(config.probe.verbosity, Verbosity::Brief);
        assert_eq!(
            config.sensor_paths(),
            vec![SensorPath::new(DEFAULT_SENSOR_PATH, 5000)]
        );
        assert!(config.connect_options().disable_tracing);
        assert!(!config.has_credentials());
    }

    #[test]
    fn sensors_replace_the_default_list() {
        let config = parse_config(
            r#"
            [device]
            host = "192.0.2.10"
            port = 32767

            [[sensor]]
            path = "/junos/system/linecard/interface/"
            frequency_ms = 2000

            [[sensor]]
            path = "/components/"

            [subscription]
            limit_records = 10
            "#,
        )
        .unwrap();
        assert_eq!(
            config.sensor_paths(),
            vec![
                SensorPath::new("/junos/system/linecard/interface/", 2000),
                SensorPath::new("/components/", DEFAULT_SENSOR_FREQUENCY_MS),
            ]
        );
        assert_eq!(config.limits().limit_records, 10);
        assert_eq!(config.device.port, 32767);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_config("[device]\nhostname = \"x\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("hostname"));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let err = parse_config("[[sensor]]\npath = \"/a/\"\nfrequency_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("frequency_ms"));
    }

    #[test]
    fn verbosity_parses_lowercase() {
        let config = parse_config("[probe]\nverbosity = \"detail\"\n").unwrap();
        assert_eq!(VerbosityLevel::from(config.probe.verbosity), VerbosityLevel::Detail);
    }

    #[test]
    fn call_timeout_maps_to_deadline() {
        let config = parse_config("[connect]\ncall_timeout_ms = 1500\n").unwrap();
        assert_eq!(config.call_deadline(), Some(Duration::from_millis(1500)));
    }
}
