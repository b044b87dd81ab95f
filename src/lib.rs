//! Pi-Track: a passive network traffic monitor.
//!
//! `run` constructs every subsystem in dependency order (cache and process
//! tracker first since the decoder and the pipeline consult them; the live
//! store next; persistence next since it can fail fatally; then the
//! broadcaster and the HTTP surface), opens the capture source, starts the
//! background tickers, and drives the capture loop until the process is
//! asked to stop.

pub mod capture;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod model;
pub mod server;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use capture::{decode::decode, CaptureSource, PcapSource};
use config::Cli;
use core::broadcaster::Broadcaster;
use core::ip_cache::IpInfoCache;
use core::process_tracker::ProcessTracker;
use core::store::LiveStore;
use db::Database;
use error::AppError;
use server::AppState;

/// Construct every subsystem, open capture, and serve until the process is
/// terminated. Exit codes follow §6 exactly: startup-fatal conditions
/// (missing interface, capture open failure, mandatory DB open failure)
/// return `Err`; `main` maps that to a nonzero exit code.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let ip_cache = IpInfoCache::new();
    let process_tracker = Arc::new(ProcessTracker::new());
    let store = Arc::new(LiveStore::new(cli.max_packets));
    let db = Arc::new(Database::open(&cli.db).map_err(anyhow::Error::new)?);
    let broadcaster = Arc::new(Broadcaster::new());

    let interface = match &cli.interface {
        Some(name) => name.clone(),
        None => capture::default_interface()
            .ok_or_else(|| AppError::Startup("no non-loopback capture device available".into()))?,
    };

    // Shared by the capture loop and `run()`'s shutdown path: flips to `true`
    // once, on Ctrl-C or a fatal HTTP/WS surface error, so `PcapSource`
    // unblocks on its next read-timeout tick and `run_capture_loop` returns.
    let shutdown = Arc::new(AtomicBool::new(false));

    let source =
        PcapSource::open(Some(&interface), Arc::clone(&shutdown)).map_err(anyhow::Error::new)?;
    tracing::info!(interface = %interface, "capture opened");

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        db: Arc::clone(&db),
        ip_cache: ip_cache.clone(),
        broadcaster: Arc::clone(&broadcaster),
        interface: interface.clone(),
    });

    // Persistence batch-writer: wakes on (ticker ∨ signal ∨ stop) (§4.5).
    let writer_db = Arc::clone(&db);
    tokio::spawn(async move { writer_db.run_writer().await });

    // Process-tracker refresh: rebuilds port→PID from scratch every cycle (§4.3).
    let tracker_for_refresh = Arc::clone(&process_tracker);
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(config::PROCESS_TRACKER_REFRESH_MS));
        loop {
            ticker.tick().await;
            let tracker = Arc::clone(&tracker_for_refresh);
            tokio::task::spawn_blocking(move || tracker.refresh())
                .await
                .ok();
        }
    });

    // Stats ticker: 1Hz, reads a C4 snapshot and broadcasts it (§4.6 "stats").
    let stats_store = Arc::clone(&store);
    let stats_cache = ip_cache.clone();
    let stats_broadcaster = Arc::clone(&broadcaster);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            config::STATS_TICKER_INTERVAL_SECS,
        ));
        loop {
            ticker.tick().await;
            let stats = stats_store.stats(&stats_cache);
            stats_broadcaster.broadcast("stats", stats);
        }
    });

    // Capture loop: decode → enrich (process attribution) → C4.add → C5.enqueue
    // → C6.broadcast (§5). Runs on a dedicated blocking thread since libpcap's
    // read API is not natively async.
    let capture_cache = ip_cache.clone();
    let capture_store = Arc::clone(&store);
    let capture_db = Arc::clone(&db);
    let capture_broadcaster = Arc::clone(&broadcaster);
    let capture_tracker = Arc::clone(&process_tracker);
    let capture_shutdown = Arc::clone(&shutdown);
    let capture_handle = tokio::task::spawn_blocking(move || {
        run_capture_loop(
            source,
            &capture_cache,
            &capture_store,
            &capture_db,
            &capture_broadcaster,
            &capture_tracker,
            &capture_shutdown,
        )
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tokio::select! {
        result = server::serve(addr, state) => {
            result.context("HTTP/WS surface failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    // Signal the capture loop to stop and wait for it to actually exit
    // before the final flush, so no packet is enqueued after `db.close()`
    // has drained the batch (§6 "0 on clean shutdown").
    shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = capture_handle.await {
        tracing::warn!("capture task did not shut down cleanly: {e}");
    }

    // Persistence state machine: stop signal → final flush → close (§4.7).
    db.close();
    Ok(())
}

/// Drives one `CaptureSource` to completion, feeding every decoded frame
/// through C4/C5/C6. Never returns an error upward (§7 "the capture path
/// never returns errors upward"): individual read errors are handled inside
/// the source itself (logged, loop continues); this function returns once
/// the source reports the device is truly gone, or once `shutdown` is set.
fn run_capture_loop(
    mut source: impl CaptureSource,
    cache: &IpInfoCache,
    store: &LiveStore,
    db: &Database,
    broadcaster: &Broadcaster,
    process_tracker: &ProcessTracker,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let Some(frame) = source.next_frame() else {
            break;
        };
        let mut packet = decode(&frame, cache);

        packet.process_name = process_tracker.name_for_local_port(packet.src_port);
        if packet.process_name.is_empty() {
            packet.process_name = process_tracker.name_for_local_port(packet.dst_port);
        }

        let mut persisted = packet.clone();
        let id = store.add(packet);
        persisted.id = id;

        db.enqueue(persisted.clone());
        broadcaster.broadcast("packet", &persisted);
    }
}
