use rollcall_core::{
    AttendanceSession, Clock, LedgerError, Matcher, ObservedFace, SessionPhase, SessionSummary,
    StepOutcome,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the running session.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: SessionPhase,
    pub roster: usize,
    pub recorded: Vec<String>,
    pub frames: u64,
    pub sampled: u64,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Frame {
        sampled: bool,
        faces: Vec<ObservedFace>,
        reply: oneshot::Sender<Result<StepOutcome, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Stop {
        reply: oneshot::Sender<Result<SessionSummary, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Submit one frame cycle; only sampled frames are matched.
    pub async fn submit(
        &self,
        sampled: bool,
        faces: Vec<ObservedFace>,
    ) -> Result<StepOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Frame {
                sampled,
                faces,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stop the session: sweeps absentees and ends the engine thread.
    pub async fn stop(&self) -> Result<SessionSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stop { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the session engine on a dedicated OS thread.
///
/// The thread is the only writer of session state and the ledger. It
/// finalizes on `Stop`; if every handle is dropped first, or the thread
/// unwinds, the session's own drop guard runs the absentee sweep instead.
pub fn spawn_engine<M, C>(
    session: AttendanceSession<M, C>,
) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError>
where
    M: Matcher + Send + 'static,
    C: Clock + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let thread = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut session = session;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Frame {
                        sampled,
                        faces,
                        reply,
                    } => {
                        let result = session.submit(sampled, &faces).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let (frames, sampled) = session.frame_counts();
                        let _ = reply.send(EngineStatus {
                            phase: session.phase(),
                            roster: session.roster().len(),
                            recorded: session.state().recorded().to_vec(),
                            frames,
                            sampled,
                        });
                    }
                    EngineRequest::Stop { reply } => {
                        let result = session.finalize().map_err(EngineError::from);
                        let _ = reply.send(result);
                        tracing::info!("engine thread exiting");
                        return;
                    }
                }
            }
            tracing::warn!("all engine handles dropped before stop");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, thread))
}
