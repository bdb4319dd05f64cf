use super::collector::PieceCollector;
use super::worker::{LiveWorkers, PeerWorker, WorkerContext};
use super::{
    AbortReason, CompletionTracker, DownloadEvent, DownloadOutcome, EngineConfig, EventEmitter,
    EventSender, OutputFile, ShutdownSignal,
};
use crate::metainfo::TorrentDescriptor;
use crate::peers::PeerDescriptor;
use crate::prelude::*;
use crate::torrent::PeerId;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not create output file {path:?}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub outcome: DownloadOutcome,
    /// one entry per piece, true once the piece is written to the output file.
    pub completed: Vec<bool>,
}

/// downloads every piece of one torrent from a fixed set of peers into a single file.
#[derive(Debug)]
pub struct DownloadEngine {
    config: EngineConfig,
    torrent: TorrentDescriptor,
    self_id: PeerId,
    peers: Vec<PeerDescriptor>,
    output_path: PathBuf,
    events: EventEmitter,
}

impl DownloadEngine {
    pub fn new(
        config: EngineConfig,
        torrent: TorrentDescriptor,
        self_id: PeerId,
        peers: Vec<PeerDescriptor>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            torrent,
            self_id,
            peers,
            output_path: output_path.into(),
            events: EventEmitter::disabled(),
        }
    }

    pub fn with_events(mut self, events_tx: EventSender) -> Self {
        self.events = EventEmitter::new(events_tx);
        self
    }

    /// runs one worker per peer and the collector until the download completes or aborts. only
    /// failing to create the output file is an error, every other failure is an aborted outcome.
    #[instrument(
        name = "download",
        level = "info",
        fields(pieces = self.torrent.piece_count(), peers = self.peers.len()),
        skip_all
    )]
    pub async fn run(self) -> Result<DownloadReport, EngineError> {
        let Self {
            config,
            torrent,
            self_id,
            peers,
            output_path,
            events,
        } = self;

        let output = OutputFile::create(&output_path, &torrent)
            .await
            .map_err(|source| EngineError::Output {
                path: output_path.clone(),
                source,
            })?;

        let pieces = torrent.pieces();
        let n_pieces = pieces.len();

        // every descriptor fits at once, so a requeue never waits on capacity.
        let (queue_tx, queue_rx) = async_channel::bounded(n_pieces.max(1));
        for piece in pieces {
            // the receiver is held right here, the channel cannot be closed yet.
            let _ = queue_tx.send(piece).await;
        }

        let (results_tx, results_rx) = mpsc::channel(n_pieces.max(1));
        let completion = Arc::new(CompletionTracker::new(n_pieces));
        let shutdown = ShutdownSignal::new();
        let live_workers = LiveWorkers::new(shutdown.clone(), completion.clone());

        let ctx = WorkerContext {
            info_hash: torrent.info_hash,
            self_id,
            config,
            queue_tx: queue_tx.clone(),
            queue_rx,
            results_tx,
            shutdown: shutdown.clone(),
            events: events.clone(),
        };

        let mut tasks = JoinSet::new();
        if peers.is_empty() {
            warn!("no peers to download from");
            shutdown.abort(AbortReason::NoPeersLeft {
                remaining: n_pieces,
            });
        }
        for peer in peers {
            let worker = PeerWorker::new(ctx.clone(), peer, live_workers.register());
            tasks.spawn(worker.run());
        }
        // the collector must see the results channel close once every worker is gone.
        drop(ctx);

        let collector = PieceCollector::new(
            results_rx,
            output,
            completion.clone(),
            shutdown.clone(),
            events.clone(),
        );
        tasks.spawn(collector.run());

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%err, "engine task failed");
                shutdown.abort(AbortReason::TaskFailed {
                    reason: err.to_string(),
                });
            }
        }
        queue_tx.close();

        let progress = completion.progress();
        let outcome = shutdown.outcome().cloned().unwrap_or_else(|| {
            DownloadOutcome::Aborted(AbortReason::NoPeersLeft {
                remaining: progress.total - progress.completed,
            })
        });

        match &outcome {
            DownloadOutcome::Completed => {
                info!(path = %output_path.display(), "download complete");
                events.emit(DownloadEvent::DownloadComplete);
            }
            DownloadOutcome::Aborted(reason) => {
                error!(%reason, "download aborted");
                events.emit(DownloadEvent::DownloadAborted {
                    reason: reason.clone(),
                });
            }
        }

        Ok(DownloadReport {
            outcome,
            completed: completion.snapshot(),
        })
    }
}
