// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Build sensor subscriptions and consume the resulting update stream.
// Author: Lukas Bower

//! Subscription stream consumer.
//!
//! A subscription is issued once and yields a single [`TelemetryStream`] handle. The handle
//! pairs `has_next` with the read that follows it, so every check and every read go to the
//! same server stream. It also implements [`Iterator`], which is what [`consume`] drives.

use std::fmt::Write as _;

use log::{debug, info};
use tokio::runtime::Runtime;
use tonic::codec::Streaming;

use crate::channel::{guarded, observe, CallOptions, ConnectivityState};
use crate::proto::key_value::Value;
use crate::proto::{OpenConfigData, Path, SubscriptionAdditionalConfig, SubscriptionRequest};
use crate::ClientError;

/// Sensor path sampled by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorPath {
    /// Hierarchical sensor identifier on the device.
    pub path: String,
    /// Sampling period in milliseconds.
    pub frequency_ms: u32,
}

impl SensorPath {
    /// Construct a sensor path entry.
    pub fn new(path: impl Into<String>, frequency_ms: u32) -> Self {
        Self {
            path: path.into(),
            frequency_ms,
        }
    }
}

/// Agent-side bounds on a subscription; zero means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionLimits {
    /// Close the stream after this many records.
    pub limit_records: u32,
    /// Close the stream after this many seconds.
    pub limit_time_seconds: u32,
    /// Ask the agent to mark the end of the stream explicitly.
    pub need_eos: bool,
}

impl SubscriptionLimits {
    fn is_unbounded(&self) -> bool {
        self.limit_records == 0 && self.limit_time_seconds == 0 && !self.need_eos
    }
}

/// Build the subscription request for `sensors`, preserving their order.
pub fn subscription_request(sensors: &[SensorPath], limits: SubscriptionLimits) -> SubscriptionRequest {
    let path_list = sensors
        .iter()
        .map(|sensor| Path {
            path: sensor.path.clone(),
            sample_frequency: sensor.frequency_ms,
            ..Path::default()
        })
        .collect();
    let additional_config = (!limits.is_unbounded()).then(|| SubscriptionAdditionalConfig {
        limit_records: clamp_i32(limits.limit_records),
        limit_time_seconds: clamp_i32(limits.limit_time_seconds),
        need_eos: limits.need_eos,
    });
    SubscriptionRequest {
        input: None,
        path_list,
        additional_config,
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Single server-stream handle for one subscription.
///
/// Borrows the channel runtime and state, so the channel cannot be shut down while the handle
/// lives. Read failures are folded into the channel's connectivity state.
pub struct TelemetryStream<'a> {
    runtime: &'a Runtime,
    state: &'a mut ConnectivityState,
    inner: Streaming<OpenConfigData>,
    options: CallOptions,
    peeked: Option<OpenConfigData>,
    finished: bool,
}

impl<'a> TelemetryStream<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        state: &'a mut ConnectivityState,
        inner: Streaming<OpenConfigData>,
        options: CallOptions,
    ) -> Self {
        Self {
            runtime,
            state,
            inner,
            options,
            peeked: None,
            finished: false,
        }
    }

    /// Block until the next update is available or the stream ends.
    ///
    /// Returns `Ok(false)` once the agent closes the stream. After an error the stream is
    /// finished and no further reads are issued.
    pub fn has_next(&mut self) -> Result<bool, ClientError> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }
        let Self {
            runtime,
            state,
            inner,
            options,
            ..
        } = self;
        let read = runtime.block_on(guarded(options, async {
            inner.message().await.map_err(ClientError::from)
        }));
        observe(state, &read);
        match read {
            Ok(Some(update)) => {
                self.peeked = Some(update);
                Ok(true)
            }
            Ok(None) => {
                debug!("agent closed the subscription stream");
                self.finished = true;
                Ok(false)
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    /// Return the update announced by the preceding [`TelemetryStream::has_next`].
    pub fn read_next(&mut self) -> Result<Option<OpenConfigData>, ClientError> {
        if self.has_next()? {
            Ok(self.peeked.take())
        } else {
            Ok(None)
        }
    }
}

impl Iterator for TelemetryStream<'_> {
    type Item = Result<OpenConfigData, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Totals for a drained subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Updates received before the stream ended.
    pub updates: u64,
}

/// Drain one subscription handle, passing each update to `sink`.
///
/// Stops at the first error; the error is returned after the updates already delivered.
pub fn consume<I, F>(updates: I, mut sink: F) -> Result<StreamSummary, ClientError>
where
    I: IntoIterator<Item = Result<OpenConfigData, ClientError>>,
    F: FnMut(&OpenConfigData),
{
    let mut summary = StreamSummary::default();
    for update in updates {
        let update = update?;
        sink(&update);
        summary.updates += 1;
    }
    Ok(summary)
}

/// Log one update as a single INFO line.
pub fn log_update(update: &OpenConfigData) {
    info!("{}", render_update(update));
    debug!("{update:?}");
}

/// Render an update as `system seq=.. ts=.. path=.. key=value ...`.
#[must_use]
pub fn render_update(update: &OpenConfigData) -> String {
    let mut line = format!(
        "{} seq={} ts={} path={}",
        update.system_id, update.sequence_number, update.timestamp, update.path
    );
    for kv in &update.kv {
        let _ = write!(line, " {}=", kv.key);
        match &kv.value {
            Some(Value::DoubleValue(v)) => {
                let _ = write!(line, "{v}");
            }
            Some(Value::IntValue(v)) | Some(Value::SintValue(v)) => {
                let _ = write!(line, "{v}");
            }
            Some(Value::UintValue(v)) => {
                let _ = write!(line, "{v}");
            }
            Some(Value::BoolValue(v)) => {
                let _ = write!(line, "{v}");
            }
            Some(Value::StrValue(v)) => line.push_str(v),
            Some(Value::BytesValue(v)) => {
                let _ = write!(line, "<{} bytes>", v.len());
            }
            None => line.push('-'),
        }
    }
    line
}
