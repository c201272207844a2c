// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Sequence connect, probe, subscribe and teardown for one telemetry run.
// Author: Lukas Bower

//! Run driver.
//!
//! [`run_session`] is the single error boundary of the client. It walks the channel through
//! the run phases, stops at the first failure, and always releases the channel before
//! reporting how the run ended.

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::channel::{AgentChannel, CallOptions, ConnectivityState};
use crate::config::ClientConfig;
use crate::probe::get_operational_state;
use crate::stream::{consume, log_update, subscription_request};
use crate::ClientError;

/// Phase of a telemetry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunPhase {
    /// Nothing attempted yet.
    Init,
    /// Waiting for the channel to report its state.
    Connecting,
    /// Channel state observed; the operational-state probe is next.
    Connected,
    /// Probe answered; the subscription is next.
    Probed,
    /// Subscription open; updates are being consumed.
    Subscribed,
    /// Releasing the channel.
    ShuttingDown,
    /// Channel released.
    Terminated,
}

/// Process outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Stream drained and channel released.
    Completed,
    /// Channel was shut down or terminated before any call.
    ChannelUnusable,
    /// The operational-state query failed.
    ProbeFailed,
    /// The subscribe call or a stream read failed.
    SubscriptionFailed,
    /// Configuration could not be applied.
    Configuration,
    /// The run was cancelled.
    Cancelled,
}

impl ExitStatus {
    /// Process exit code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::ChannelUnusable => 2,
            Self::ProbeFailed => 3,
            Self::SubscriptionFailed => 4,
            Self::Configuration => 5,
            Self::Cancelled => 130,
        }
    }

    /// Classify `err` raised while the run was in `phase`.
    #[must_use]
    pub fn for_error(phase: RunPhase, err: &ClientError) -> Self {
        match err {
            ClientError::Configuration(_) => Self::Configuration,
            ClientError::Connectivity { .. } | ClientError::Runtime(_) => Self::ChannelUnusable,
            ClientError::Cancelled => Self::Cancelled,
            ClientError::Rpc { .. } if phase <= RunPhase::Connected => Self::ProbeFailed,
            ClientError::Rpc { .. } => Self::SubscriptionFailed,
        }
    }
}

/// Outcome of [`run_session`].
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended.
    pub status: ExitStatus,
    /// Last phase reached before teardown.
    pub reached: RunPhase,
    /// Updates delivered by the subscription.
    pub updates: u64,
    /// Failure that ended the run early.
    pub error: Option<ClientError>,
    /// Connectivity state after shutdown.
    pub final_state: ConnectivityState,
}

struct Progress {
    phase: RunPhase,
    updates: u64,
}

impl Progress {
    fn enter(&mut self, next: RunPhase) {
        debug!("run phase {:?} -> {next:?}", self.phase);
        self.phase = next;
    }
}

/// Drive one run against `channel` and release it on every path.
pub fn run_session<C: AgentChannel>(
    channel: &mut C,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> RunReport {
    let options = CallOptions::new(cancel.clone()).with_deadline(config.call_deadline());
    let mut progress = Progress {
        phase: RunPhase::Init,
        updates: 0,
    };

    let outcome = drive(channel, config, &options, &mut progress);
    let reached = progress.phase;
    let status = match &outcome {
        Ok(()) => ExitStatus::Completed,
        Err(err @ ClientError::Connectivity { .. }) => {
            warn!("{err}; skipping operational state and subscription");
            ExitStatus::for_error(reached, err)
        }
        Err(err) => {
            error!("run failed during {reached:?}: {err}");
            ExitStatus::for_error(reached, err)
        }
    };

    progress.enter(RunPhase::ShuttingDown);
    channel.shutdown();
    let final_state = channel.get_state(false);
    info!(
        "final connectivity state: {final_state} (shutdown={}, terminated={})",
        channel.is_shutdown(),
        channel.is_terminated()
    );
    progress.enter(RunPhase::Terminated);

    RunReport {
        status,
        reached,
        updates: progress.updates,
        error: outcome.err(),
        final_state,
    }
}

fn drive<C: AgentChannel>(
    channel: &mut C,
    config: &ClientConfig,
    options: &CallOptions,
    progress: &mut Progress,
) -> Result<(), ClientError> {
    ensure_active(options)?;
    progress.enter(RunPhase::Connecting);
    let state = channel.get_state(true);
    info!("connectivity state: {state}");
    info!(
        "channel shutdown={}, terminated={}",
        channel.is_shutdown(),
        channel.is_terminated()
    );
    progress.enter(RunPhase::Connected);
    if !channel.is_usable() {
        return Err(ClientError::Connectivity { state });
    }

    ensure_active(options)?;
    get_operational_state(
        channel,
        config.probe.subscription_id,
        config.probe.verbosity.into(),
        options,
    )?;
    progress.enter(RunPhase::Probed);

    ensure_active(options)?;
    let request = subscription_request(&config.sensor_paths(), config.limits());
    let updates = channel.subscribe(request, options)?;
    progress.enter(RunPhase::Subscribed);
    let summary = consume(updates, |update| {
        progress.updates += 1;
        log_update(update);
    })?;
    info!("subscription ended after {} update(s)", summary.updates);
    Ok(())
}

fn ensure_active(options: &CallOptions) -> Result<(), ClientError> {
    if options.cancel.is_cancelled() {
        Err(ClientError::Cancelled)
    } else {
        Ok(())
    }
}
