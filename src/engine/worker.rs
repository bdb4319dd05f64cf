use super::{
    AbortReason, CompletionTracker, DownloadEvent, EngineConfig, EventEmitter, IntegrityPolicy,
    ShutdownSignal,
};
use crate::peers::{
    PeerDescriptor, PeerError, PeerErrorKind, PeerSession, PeerStream, PieceDescriptor,
    PieceIndex, PieceOutcome, PieceResult,
};
use crate::prelude::*;
use crate::torrent::{InfoHash, PeerId};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// everything a peer worker shares with the rest of the engine.
#[derive(Debug, Clone)]
pub(super) struct WorkerContext {
    pub info_hash: InfoHash,
    pub self_id: PeerId,
    pub config: EngineConfig,
    pub queue_tx: async_channel::Sender<PieceDescriptor>,
    pub queue_rx: async_channel::Receiver<PieceDescriptor>,
    pub results_tx: mpsc::Sender<PieceResult>,
    pub shutdown: ShutdownSignal,
    pub events: EventEmitter,
}

/// counts running workers, the last one out aborts a download that can no longer finish.
#[derive(Debug, Clone)]
pub(super) struct LiveWorkers {
    count: Arc<AtomicUsize>,
    shutdown: ShutdownSignal,
    completion: Arc<CompletionTracker>,
}

#[derive(Debug)]
pub(super) struct WorkerGuard {
    workers: LiveWorkers,
}

impl LiveWorkers {
    pub fn new(shutdown: ShutdownSignal, completion: Arc<CompletionTracker>) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            shutdown,
            completion,
        }
    }

    /// must be called before the worker is spawned so an early exit cannot see a zero count.
    pub fn register(&self) -> WorkerGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            workers: self.clone(),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let LiveWorkers {
            count,
            shutdown,
            completion,
        } = &self.workers;

        if count.fetch_sub(1, Ordering::SeqCst) != 1 || shutdown.is_triggered() {
            return;
        }

        let progress = completion.progress();
        if !progress.is_done() {
            let remaining = progress.total - progress.completed;
            warn!(remaining, "last peer worker exited before the download finished");
            shutdown.abort(AbortReason::NoPeersLeft { remaining });
        }
    }
}

pub(super) struct PeerWorker {
    ctx: WorkerContext,
    peer: PeerDescriptor,
    guard: WorkerGuard,
}

impl PeerWorker {
    pub fn new(ctx: WorkerContext, peer: PeerDescriptor, guard: WorkerGuard) -> Self {
        Self { ctx, peer, guard }
    }

    #[instrument(name = "peer worker", level = "info", fields(peer = %self.peer), skip_all)]
    pub async fn run(self) {
        let Self {
            ctx,
            peer,
            guard: _guard,
        } = self;

        let establish = PeerSession::establish(
            peer,
            ctx.info_hash,
            ctx.self_id,
            ctx.config.connect_timeout,
        );
        let established = tokio::select! {
            _ = ctx.shutdown.triggered() => {
                debug!("shutdown before the session was established");
                return;
            }
            established = establish => established,
        };

        match established {
            Ok(session) => {
                ctx.events.emit(DownloadEvent::PeerConnected {
                    peer,
                    peer_id: session.peer_id(),
                });
                ctx.drive(session).await;
            }
            Err(err) => {
                // a peer that never became usable only costs us that peer.
                warn!(%err, kind = ?err.kind(), "could not establish peer session");
                ctx.events.emit(DownloadEvent::PeerFailed {
                    peer,
                    reason: err.to_string(),
                });
            }
        }
    }
}

impl WorkerContext {
    /// pulls pieces until shutdown, a fatal peer error or a closed queue.
    pub async fn drive<S: PeerStream>(&self, mut session: PeerSession<S>) {
        loop {
            let piece = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => break,
                piece = self.queue_rx.recv() => match piece {
                    Ok(piece) => piece,
                    Err(_) => break,
                },
            };

            if self.attempt(&mut session, piece).await.is_break() {
                break;
            }
        }

        debug!("closing peer session");
        session.close().await;
    }

    async fn attempt<S: PeerStream>(
        &self,
        session: &mut PeerSession<S>,
        piece: PieceDescriptor,
    ) -> ControlFlow<()> {
        let peer = session.peer();
        let index = piece.index;

        if !session.can_handle(index) {
            trace!(piece = index, "peer does not have piece, handing it back");
            return self.requeue(piece).await;
        }

        self.events
            .emit(DownloadEvent::PieceDownloading { index, peer });

        let downloaded = tokio::select! {
            _ = self.shutdown.triggered() => {
                debug!(piece = index, "dropping in-flight download on shutdown");
                return ControlFlow::Break(());
            }
            downloaded = session.download(&piece) => downloaded,
        };

        match downloaded {
            Ok(payload) if piece.matches_hash(&payload) => {
                debug!(piece = index, "piece hash verified");
                self.send_result(PieceResult::downloaded(index, payload, peer))
                    .await
            }
            Ok(_) => {
                warn!(piece = index, "piece hash mismatch");
                match self.config.integrity_policy {
                    IntegrityPolicy::Abort => {
                        self.send_result(PieceResult::failed(
                            index,
                            PieceOutcome::IntegrityFailure,
                            peer,
                        ))
                        .await
                    }
                    IntegrityPolicy::Requeue => {
                        self.events.emit(DownloadEvent::PieceFailed {
                            index,
                            reason: format!("hash mismatch from peer {peer}"),
                        });
                        self.requeue(piece).await
                    }
                }
            }
            Err(err) => match err.kind() {
                PeerErrorKind::MissingPiece => self.requeue(piece).await,
                PeerErrorKind::ProtocolViolation | PeerErrorKind::HandshakeMismatch => {
                    // only this session is unusable, the piece goes back for the other peers.
                    warn!(%err, kind = ?err.kind(), piece = index, "dropping misbehaving peer");
                    self.events.emit(DownloadEvent::PeerFailed {
                        peer,
                        reason: err.to_string(),
                    });
                    let _ = self.queue_tx.send(piece).await;
                    ControlFlow::Break(())
                }
                PeerErrorKind::Transport | PeerErrorKind::Framing => {
                    self.fail_download(index, peer, err).await
                }
            },
        }
    }

    /// a transport level failure mid download ends the whole download.
    async fn fail_download(
        &self,
        index: PieceIndex,
        peer: PeerDescriptor,
        err: PeerError,
    ) -> ControlFlow<()> {
        error!(%err, kind = ?err.kind(), piece = index, "peer failed during download");
        let reason = err.to_string();
        self.events.emit(DownloadEvent::PeerFailed {
            peer,
            reason: reason.clone(),
        });
        self.shutdown
            .abort(AbortReason::PeerFailure { index, peer, reason });

        let _ = self
            .send_result(PieceResult::failed(
                index,
                PieceOutcome::TransportFailure,
                peer,
            ))
            .await;
        ControlFlow::Break(())
    }

    /// hands a piece back to the queue, then backs off so a worker that can serve nothing left
    /// does not spin.
    async fn requeue(&self, piece: PieceDescriptor) -> ControlFlow<()> {
        if self.queue_tx.send(piece).await.is_err() {
            return ControlFlow::Break(());
        }

        tokio::select! {
            _ = self.shutdown.triggered() => ControlFlow::Break(()),
            _ = tokio::time::sleep(self.config.requeue_backoff) => ControlFlow::Continue(()),
        }
    }

    async fn send_result(&self, result: PieceResult) -> ControlFlow<()> {
        match self.results_tx.send(result).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => {
                debug!("collector is gone, stopping");
                ControlFlow::Break(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DownloadOutcome;
    use crate::peer_protocol::{PeerMessage, PeerMessageCodec};
    use crate::peers::PeerConnection;
    use crate::torrent::Bitfield;
    use rstest::rstest;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio_test::io::{Builder, Mock};
    use tokio_util::{bytes::BytesMut, codec::Encoder};

    struct Harness {
        ctx: WorkerContext,
        results_rx: mpsc::Receiver<PieceResult>,
        events_rx: mpsc::UnboundedReceiver<DownloadEvent>,
    }

    fn harness() -> Harness {
        let (queue_tx, queue_rx) = async_channel::bounded(4);
        let (results_tx, results_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ctx = WorkerContext {
            info_hash: InfoHash::new([1; 20]),
            self_id: PeerId::random(),
            config: EngineConfig::default(),
            queue_tx,
            queue_rx,
            results_tx,
            shutdown: ShutdownSignal::new(),
            events: EventEmitter::new(events_tx),
        };
        Harness {
            ctx,
            results_rx,
            events_rx,
        }
    }

    fn encode(msg: PeerMessage) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        PeerMessageCodec::new().encode(msg, &mut buffer).unwrap();
        buffer.to_vec()
    }

    fn peer() -> PeerDescriptor {
        PeerDescriptor::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881), 0)
    }

    // the setup exchange of a peer that has pieces 0, 1 and 2.
    fn setup_exchange() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(&encode(PeerMessage::Bitfield(Bitfield::from_slice(&[0b1110_0000]))))
            .write(&encode(PeerMessage::Interested))
            .read(&encode(PeerMessage::Unchoke));
        builder
    }

    async fn session(mock: Mock) -> PeerSession<Mock> {
        let connection = PeerConnection::new(peer(), PeerId::new([2; 20]), mock);
        PeerSession::init_from(connection).await.unwrap()
    }

    #[tokio::test]
    async fn test_unavailable_piece_is_handed_back_untouched() {
        let Harness {
            ctx,
            mut results_rx,
            mut events_rx,
        } = harness();
        // no request may be written for piece 3, the mock fails on any unexpected write.
        let mut session = session(setup_exchange().build()).await;
        let piece = PieceDescriptor::new(3, 100, [4; 20]);

        let flow = ctx.attempt(&mut session, piece.clone()).await;

        assert!(flow.is_continue());
        assert_eq!(ctx.queue_rx.recv().await.unwrap(), piece);
        assert!(ctx.queue_rx.is_empty());
        assert!(results_rx.try_recv().is_err());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_protocol_violation_only_drops_the_peer() {
        let Harness {
            ctx,
            mut results_rx,
            mut events_rx,
        } = harness();
        let mock = setup_exchange()
            .write(&encode(PeerMessage::Request {
                index: 0,
                begin: 0,
                length: 100,
            }))
            .read(&encode(PeerMessage::Have(0)))
            .build();
        let mut session = session(mock).await;
        let piece = PieceDescriptor::new(0, 100, [4; 20]);

        let flow = ctx.attempt(&mut session, piece.clone()).await;

        assert!(flow.is_break());
        assert!(!ctx.shutdown.is_triggered());
        assert_eq!(ctx.queue_rx.recv().await.unwrap(), piece);
        assert!(results_rx.try_recv().is_err());

        assert_eq!(
            events_rx.try_recv().unwrap(),
            DownloadEvent::PieceDownloading {
                index: 0,
                peer: peer()
            }
        );
        assert!(matches!(
            events_rx.try_recv().unwrap(),
            DownloadEvent::PeerFailed { .. }
        ));
    }

    #[rstest]
    fn test_last_worker_out_aborts() {
        let shutdown = ShutdownSignal::new();
        let completion = Arc::new(CompletionTracker::new(3));
        let workers = LiveWorkers::new(shutdown.clone(), completion.clone());

        let first = workers.register();
        let second = workers.register();
        completion.mark_complete(0);

        drop(first);
        assert!(!shutdown.is_triggered());

        drop(second);
        assert_eq!(
            shutdown.outcome(),
            Some(&DownloadOutcome::Aborted(AbortReason::NoPeersLeft {
                remaining: 2
            }))
        );
    }

    #[rstest]
    fn test_workers_leaving_after_shutdown_change_nothing() {
        let shutdown = ShutdownSignal::new();
        let workers = LiveWorkers::new(shutdown.clone(), Arc::new(CompletionTracker::new(1)));

        let guard = workers.register();
        shutdown.complete();
        drop(guard);

        assert_eq!(shutdown.outcome(), Some(&DownloadOutcome::Completed));
    }
}
