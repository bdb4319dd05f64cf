use anyhow::Context;
use clap::Parser;
use crux_fetch::cli::Cli;
use crux_fetch::engine::{DownloadEngine, DownloadEvent, DownloadOutcome};
use crux_fetch::metainfo::Metainfo;
use crux_fetch::prelude::*;
use crux_fetch::torrent::PeerId;
use crux_fetch::tracker::{HttpTracker, TrackerRequest};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_target(false)
        .init();

    let metainfo = Metainfo::from_bencode_file(&cli.source).await?;
    let torrent = metainfo
        .download_info
        .torrent_descriptor()
        .context("unusable torrent metadata")?;
    info!(
        name = %torrent.suggested_file_name,
        pieces = torrent.piece_count(),
        length = torrent.total_length,
        info_hash = ?torrent.info_hash,
        "loaded torrent"
    );

    let peer_id = PeerId::random();
    let request =
        TrackerRequest::from_parts(torrent.info_hash, peer_id, cli.port, torrent.total_length);
    let client = reqwest::Client::new();
    let response = HttpTracker::from_tracker_url(&client, metainfo.tracker_url()?)?
        .announce(&request)
        .await?;

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;
    let output_path = cli.output_dir.join(&torrent.suggested_file_name);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_events(events_rx));

    let engine = DownloadEngine::new(
        cli.engine_config(),
        torrent,
        peer_id,
        response.peer_addresses.descriptors(),
        &output_path,
    )
    .with_events(events_tx);
    let report = engine.run().await?;
    // the engine dropped its sender, the reporter drains what is left and exits.
    let _ = reporter.await;

    match report.outcome {
        DownloadOutcome::Completed => {
            println!("downloaded {}", output_path.display());
            Ok(())
        }
        DownloadOutcome::Aborted(reason) => {
            let missing = report.completed.iter().filter(|done| !**done).count();
            anyhow::bail!("download aborted with {missing} pieces missing: {reason}")
        }
    }
}

async fn report_events(mut events_rx: mpsc::UnboundedReceiver<DownloadEvent>) {
    type DE = DownloadEvent;
    while let Some(event) = events_rx.recv().await {
        match event {
            DE::PeerConnected { peer, peer_id } => info!(%peer, %peer_id, "peer connected"),
            DE::PeerFailed { peer, reason } => warn!(%peer, %reason, "peer failed"),
            DE::PieceDownloading { index, peer } => debug!(index, %peer, "downloading piece"),
            DE::PieceCompleted { index } => debug!(index, "piece completed"),
            DE::PieceFailed { index, reason } => warn!(index, %reason, "piece failed"),
            DE::Progress { percent } => println!("progress: {percent}%"),
            DE::DownloadComplete => info!("download complete"),
            DE::DownloadAborted { reason } => error!(%reason, "download aborted"),
        }
    }
}
