//! Producer task moving upstream events into the response body.

use std::time::Duration;

use axum::body::Bytes;
use futures::StreamExt;
use kairelay_ai::{EventStream, UpstreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, Span};

use super::RelayError;
use super::frame;

/// Item consumed by the HTTP body. An `Err` aborts the connection.
pub type Frame = Result<Bytes, RelayError>;

/// How a relayed stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream exhausted, `[DONE]` written.
    Completed { forwarded: usize },
    /// Upstream or encoding failure, connection aborted without `[DONE]`.
    Failed { forwarded: usize, reason: String },
    /// The client went away; the upstream stream was dropped.
    Cancelled { forwarded: usize },
}

impl RelayOutcome {
    fn log(&self) {
        match self {
            RelayOutcome::Completed { forwarded } => {
                tracing::info!(forwarded, "Relay completed");
            }
            RelayOutcome::Failed { forwarded, reason } => {
                tracing::warn!(forwarded, reason = %reason, "Relay failed mid-stream");
            }
            RelayOutcome::Cancelled { forwarded } => {
                tracing::info!(forwarded, "Client disconnected, upstream released");
            }
        }
    }
}

/// Spawn the producer for one request and hand back the body stream.
///
/// The channel holds a single frame, so the producer never runs more than
/// one event ahead of the client.
pub fn spawn_pump(
    upstream: EventStream,
    idle_timeout: Option<Duration>,
    span: Span,
) -> ReceiverStream<Frame> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(
        async move {
            let outcome = pump(upstream, &tx, idle_timeout).await;
            outcome.log();
        }
        .instrument(span),
    );

    ReceiverStream::new(rx)
}

/// Forward upstream events until exhaustion, failure or client disconnect.
///
/// `upstream` is dropped on return, which releases the upstream connection in
/// every terminal state.
pub async fn pump(
    mut upstream: EventStream,
    tx: &mpsc::Sender<Frame>,
    idle_timeout: Option<Duration>,
) -> RelayOutcome {
    let mut forwarded = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => return RelayOutcome::Cancelled { forwarded },
            next = next_event(&mut upstream, idle_timeout) => next,
        };

        let frame = match next.and_then(|event| match event {
            Some(event) => frame::encode_event(&event).map(Some).map_err(RelayError::from),
            None => Ok(None),
        }) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if tx.send(Ok(frame::done_frame())).await.is_err() {
                    return RelayOutcome::Cancelled { forwarded };
                }
                return RelayOutcome::Completed { forwarded };
            }
            Err(err) => {
                let reason = err.to_string();
                // Nobody left to tell if this fails; the outcome is logged either way.
                let _ = tx.send(Err(err)).await;
                return RelayOutcome::Failed { forwarded, reason };
            }
        };

        if tx.send(Ok(frame)).await.is_err() {
            return RelayOutcome::Cancelled { forwarded };
        }
        forwarded += 1;
    }
}

async fn next_event(
    upstream: &mut EventStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<UpstreamEvent>, RelayError> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, upstream.next())
            .await
            .map_err(|_| RelayError::IdleTimeout(limit))?,
        None => upstream.next().await,
    };

    next.transpose().map_err(RelayError::UpstreamStream)
}
