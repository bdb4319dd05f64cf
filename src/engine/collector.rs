use super::{AbortReason, CompletionTracker, DownloadEvent, EventEmitter, OutputFile, ShutdownSignal};
use crate::peers::{PieceOutcome, PieceResult};
use crate::prelude::*;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

/// the only writer of the output file and of the completion state.
pub(super) struct PieceCollector {
    results_rx: mpsc::Receiver<PieceResult>,
    output: OutputFile,
    completion: Arc<CompletionTracker>,
    shutdown: ShutdownSignal,
    events: EventEmitter,
}

impl PieceCollector {
    pub fn new(
        results_rx: mpsc::Receiver<PieceResult>,
        output: OutputFile,
        completion: Arc<CompletionTracker>,
        shutdown: ShutdownSignal,
        events: EventEmitter,
    ) -> Self {
        Self {
            results_rx,
            output,
            completion,
            shutdown,
            events,
        }
    }

    #[instrument(name = "collector", level = "info", fields(output = %self.output.path().display()), skip_all)]
    pub async fn run(mut self) {
        loop {
            let result = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => break,
                result = self.results_rx.recv() => result,
            };

            let Some(result) = result else {
                let progress = self.completion.progress();
                if !progress.is_done() {
                    warn!("every peer worker is gone");
                    self.shutdown.abort(AbortReason::NoPeersLeft {
                        remaining: progress.total - progress.completed,
                    });
                }
                break;
            };

            if self.collect(result).await.is_break() {
                break;
            }
        }

        if let Err(err) = self.output.sync().await {
            warn!(%err, "could not sync output file");
        }
    }

    async fn collect(&mut self, result: PieceResult) -> ControlFlow<()> {
        let PieceResult {
            index,
            payload,
            outcome,
            peer,
        } = result;

        let payload = match (outcome, payload) {
            (PieceOutcome::Downloaded, Some(payload)) => payload,
            (outcome, _) => {
                error!(piece = index, %outcome, %peer, "piece failed, aborting download");
                self.events.emit(DownloadEvent::PieceFailed {
                    index,
                    reason: outcome.to_string(),
                });
                self.shutdown
                    .abort(AbortReason::PieceFailed { index, outcome });
                return ControlFlow::Break(());
            }
        };

        if self.completion.is_complete(index) {
            debug!(piece = index, "piece already written");
            return ControlFlow::Continue(());
        }

        if let Err(err) = self.output.write_piece(index, &payload).await {
            error!(piece = index, %err, "could not write piece");
            self.shutdown.abort(AbortReason::WriteFailed {
                index,
                reason: err.to_string(),
            });
            return ControlFlow::Break(());
        }

        let progress = self.completion.mark_complete(index);
        info!(
            piece = index,
            completed = progress.completed,
            total = progress.total,
            "piece written"
        );
        self.events.emit(DownloadEvent::PieceCompleted { index });
        self.events.emit(DownloadEvent::Progress {
            percent: progress.percent(),
        });

        if progress.is_done() {
            self.shutdown.complete();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
