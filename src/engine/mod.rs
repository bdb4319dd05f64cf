mod collector;
mod completion;
mod config;
mod engine;
mod events;
mod output;
mod shutdown;
mod worker;

pub use completion::{CompletionTracker, Progress};
pub use config::{EngineConfig, IntegrityPolicy};
pub use engine::{DownloadEngine, DownloadReport, EngineError};
pub use events::{DownloadEvent, EventEmitter, EventSender};
pub use output::{OutputError, OutputFile};
pub use shutdown::ShutdownSignal;

use crate::peers::{PeerDescriptor, PieceIndex, PieceOutcome};
use thiserror::Error;

/// why a download stopped before every piece was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("piece {index} failed: {outcome}")]
    PieceFailed {
        index: PieceIndex,
        outcome: PieceOutcome,
    },

    #[error("peer {peer} failed while downloading piece {index}: {reason}")]
    PeerFailure {
        index: PieceIndex,
        peer: PeerDescriptor,
        reason: String,
    },

    #[error("could not write piece {index}: {reason}")]
    WriteFailed { index: PieceIndex, reason: String },

    #[error("no peers left to download the {remaining} missing pieces")]
    NoPeersLeft { remaining: usize },

    #[error("engine task failed: {reason}")]
    TaskFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Aborted(AbortReason),
}
