// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library root for the blocking OpenConfig telemetry client.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Blocking gRPC client for a network device's OpenConfig telemetry agent.
//!
//! A run connects to one agent, queries its operational state, opens a single sensor
//! subscription and logs every update until the stream ends, then releases the channel.

pub mod channel;
pub mod config;
mod error;
pub mod probe;
pub mod proto;
pub mod session;
pub mod stream;

pub use channel::{
    AgentChannel, CallOptions, ConnectOptions, ConnectivityState, DeviceEndpoint, ManagedChannel,
};
pub use config::{load_config, parse_config, validate_config, ClientConfig, Verbosity};
pub use error::ClientError;
pub use probe::{get_operational_state, ALL_SUBSCRIPTIONS};
pub use session::{run_session, ExitStatus, RunPhase, RunReport};
pub use stream::{consume, subscription_request, SensorPath, SubscriptionLimits, TelemetryStream};
