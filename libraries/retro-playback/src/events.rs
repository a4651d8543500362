//! Pipeline events
//!
//! Decode workers, the sink feed and output sinks report to the transport
//! worker through one bounded channel. None of these reach the UI; the UI
//! polls `Player::status`.

use crossbeam_channel::{Sender, TrySendError};
use std::time::Duration;

/// Events consumed by the transport worker
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PipelineEvent {
    /// Decoder repositioned for `epoch`
    SeekCompleted {
        session: u64,
        epoch: u64,
        position: Duration,
    },

    /// Decoding failed mid-stream; an end-of-stream follows
    DecodeFailed { session: u64, error: String },

    /// The sink consumed the end-of-stream sentinel for `epoch`
    EndOfTrack { session: u64, epoch: u64 },

    /// The outgoing track of a crossfade has faded out completely
    FadeFinished { session: u64 },

    /// The output device stopped working
    DeviceFault { error: String },
}

/// Capacity of the event channel
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Hands device errors from an output sink to the transport
#[derive(Debug, Clone)]
pub struct FaultReporter {
    pub(crate) events: Sender<PipelineEvent>,
}

impl FaultReporter {
    /// Report a device failure. Never blocks; safe from an audio callback.
    pub fn report(&self, error: impl Into<String>) {
        let event = PipelineEvent::DeviceFault {
            error: error.into(),
        };
        if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
            tracing::warn!("Event channel full, device fault dropped");
        }
    }
}
