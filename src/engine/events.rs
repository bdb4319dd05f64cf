use super::AbortReason;
use crate::peers::{PeerDescriptor, PieceIndex};
use crate::torrent::PeerId;
use tokio::sync::mpsc;

/// progress reported by the engine, for whoever renders logs or progress bars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    PeerConnected {
        peer: PeerDescriptor,
        peer_id: PeerId,
    },
    PeerFailed {
        peer: PeerDescriptor,
        reason: String,
    },
    PieceDownloading {
        index: PieceIndex,
        peer: PeerDescriptor,
    },
    PieceCompleted {
        index: PieceIndex,
    },
    PieceFailed {
        index: PieceIndex,
        reason: String,
    },
    Progress {
        percent: u8,
    },
    DownloadComplete,
    DownloadAborted {
        reason: AbortReason,
    },
}

pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;

/// optional event sink, a closed or missing receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter(Option<EventSender>);

impl EventEmitter {
    pub fn new(events_tx: EventSender) -> Self {
        Self(Some(events_tx))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: DownloadEvent) {
        if let Some(events_tx) = &self.0 {
            let _ = events_tx.send(event);
        }
    }
}
