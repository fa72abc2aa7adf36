//! Per-connection send queues
//!
//! Every connection owns a bounded frame queue drained by its own writer
//! task. Publishing only enqueues: a connection that stops reading fills its
//! own queue and loses frames, while other connections keep receiving.

use crate::transport::{self, FrameWriter};
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of handing a frame to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Queued,
    /// Queue full, frame dropped for this connection only
    Dropped,
    /// Writer task is gone; the connection should be forgotten
    Closed,
}

#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    tx: mpsc::Sender<Bytes>,
}

impl Outbound {
    /// Start the writer task for `writer`
    pub(crate) fn spawn(
        writer: FrameWriter,
        capacity: usize,
        label: String,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(drain(writer, rx, label, shutdown));
        (Self { tx }, task)
    }

    pub(crate) fn enqueue(&self, frame: Bytes) -> Enqueued {
        match self.tx.try_send(frame) {
            Ok(()) => Enqueued::Queued,
            Err(TrySendError::Full(_)) => Enqueued::Dropped,
            Err(TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }
}

async fn drain(
    mut writer: FrameWriter,
    mut rx: mpsc::Receiver<Bytes>,
    label: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            _ = shutdown.changed() => break,
            written = transport::write_frame(&mut writer, &frame) => written,
        };

        if let Err(e) = written {
            warn!(connection = %label, error = %e, "Write failed, closing connection");
            break;
        }
    }

    debug!(connection = %label, "Writer stopped");
}
