use anyhow::{Context, Result};
use rollcall_core::{
    load_roster, AttendanceSession, Config, DailyLedger, PrecomputedEmbedder, Recognizer,
    SessionSummary, SystemClock,
};
use std::future::Future;
use tracing_subscriber::EnvFilter;

mod engine;
mod feed;

use engine::{EngineError, EngineHandle};
use feed::{FeedLines, FrameSampler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    tracing::info!(
        info_dir = %config.info_dir.display(),
        record_dir = %config.record_dir.display(),
        tolerance = config.tolerance,
        cooldown_secs = config.cooldown_secs,
        scope = ?config.cooldown_scope,
        tie_break = ?config.tie_break,
        skip_frames = config.skip_frames,
        "configuration loaded"
    );

    // Roster errors are fatal before any session state exists.
    let roster = load_roster(&config.info_dir, &PrecomputedEmbedder)
        .with_context(|| format!("loading roster from {}", config.info_dir.display()))?;

    let shutdown = shutdown_signal().context("installing signal handlers")?;

    let recognizer = Recognizer::new(config.matcher(), config.cooldown());
    let ledger = DailyLedger::new(&config.record_dir);
    let session = if config.resume_from_ledger {
        AttendanceSession::resume(roster, recognizer, ledger, SystemClock)?
    } else {
        AttendanceSession::start(roster, recognizer, ledger, SystemClock)
    };

    let (handle, thread) = engine::spawn_engine(session)?;
    tracing::info!("rollcalld ready");

    let feed = {
        let handle = handle.clone();
        let path = config.feed.clone();
        let skip_frames = config.skip_frames;
        async move {
            let lines = FeedLines::open(path.as_deref()).await?;
            run_feed(&handle, lines, skip_frames).await
        }
    };

    let end = run_session(handle, thread, feed, shutdown).await;

    let summary = end.summary.context("finalizing attendance")?;
    tracing::info!(
        roster = summary.roster,
        present = summary.present.len(),
        absent = summary.absent.len(),
        "rollcalld shutting down"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    end.feed
}

/// Resolves on SIGINT or SIGTERM with the name of the signal.
///
/// SIGTERM is registered before this returns, so a termination request that
/// arrives before the session loop starts is not lost.
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "interrupt",
            Some(()) = terminated => "terminate",
            else => std::future::pending().await,
        }
    })
}

/// How a session ended.
struct SessionEnd {
    summary: Result<SessionSummary, EngineError>,
    /// Error that ended the frame loop, if any.
    feed: Result<()>,
}

/// Drive `feed` until it ends or `shutdown` resolves, then finalize.
///
/// Every exit path reaches `stop`, which writes the absentee sweep before
/// the engine thread is joined.
async fn run_session<F, S>(
    handle: EngineHandle,
    thread: std::thread::JoinHandle<()>,
    feed: F,
    shutdown: S,
) -> SessionEnd
where
    F: Future<Output = Result<()>>,
    S: Future<Output = &'static str>,
{
    let feed = tokio::select! {
        r = feed => r,
        signal = shutdown => {
            tracing::info!(signal, "shutdown requested");
            Ok(())
        }
    };
    if let Err(e) = &feed {
        tracing::error!(error = %format!("{e:#}"), "frame loop failed; ending session");
    }

    if let Ok(status) = handle.status().await {
        tracing::info!(
            frames = status.frames,
            sampled = status.sampled,
            recorded = ?status.recorded,
            "session status"
        );
    }

    let summary = handle.stop().await;
    drop(handle);
    if tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_or(true, |joined| joined.is_err())
    {
        tracing::error!("engine thread panicked");
    }

    SessionEnd { summary, feed }
}

/// Pump frames from the provider into the engine until the feed ends.
async fn run_feed(handle: &EngineHandle, mut feed: FeedLines, skip_frames: u32) -> Result<()> {
    let mut sampler = FrameSampler::new(skip_frames);

    while let Some(cycle) = feed.next_cycle().await? {
        let sampled = sampler.next_is_sampled();
        // Unsampled frames carry no work for the matcher.
        let faces = if sampled { cycle.faces } else { Vec::new() };
        match handle.submit(sampled, faces).await {
            Ok(outcome) if outcome.skipped > 0 => {
                tracing::debug!(skipped = outcome.skipped, "observations skipped");
            }
            Ok(_) => {}
            Err(EngineError::Ledger(e)) => {
                tracing::warn!(error = %e, "ledger write failed; session continues");
            }
            Err(e) => return Err(e).context("engine stopped before the frame feed ended"),
        }
    }

    tracing::info!("frame feed ended");
    Ok(())
}
