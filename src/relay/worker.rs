use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{FrameRelay, RelayStats};
use crate::error::RelayError;
use crate::ingest::StreamOpener;
use crate::recognize::RecognitionSession;
use crate::sink::ResultSink;

const WORKER_THREAD_NAME: &str = "frame-relay";

/// Cooperative cancellation flag, checked by the relay between pulls.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Handle to a relay running on its own thread.
pub struct RelayHandle {
    cancel: CancelToken,
    join: JoinHandle<Result<RelayStats, RelayError>>,
}

impl RelayHandle {
    /// Ask the relay to stop. It finishes the frame in flight, then releases
    /// the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the relay thread and return its outcome.
    pub fn join(self) -> Result<RelayStats, RelayError> {
        self.join.join().map_err(|_| RelayError::WorkerPanicked)?
    }
}

/// Run `relay` on a dedicated background thread.
pub fn spawn_relay<O>(
    mut relay: FrameRelay,
    opener: O,
    mut session: Box<dyn RecognitionSession>,
    mut sink: Box<dyn ResultSink>,
) -> Result<RelayHandle>
where
    O: StreamOpener + Send + 'static,
{
    let cancel = relay.cancel_token();
    let join = std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let outcome = relay.run(&opener, session.as_mut(), sink.as_mut());
            match &outcome {
                Ok(stats) => log::info!(
                    "relay finished ({:?}): pulled={} skipped={} submitted={} codes={} buffer={}B",
                    stats.exit,
                    stats.frames_pulled,
                    stats.frames_skipped,
                    stats.frames_submitted,
                    stats.codes_emitted,
                    stats.buffer_capacity
                ),
                Err(e) => log::error!("relay for {} stopped: {}", relay.url(), e),
            }
            outcome
        })
        .context("spawn frame relay thread")?;

    Ok(RelayHandle { cancel, join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{DefaultOpener, TransportOptions};
    use crate::recognize::{Barcode, NullSession};
    use crate::relay::ExitReason;
    use std::time::{Duration, Instant};

    #[test]
    fn worker_runs_stub_stream_to_completion() -> Result<()> {
        let relay = FrameRelay::new("stub://worker?frames=3", TransportOptions::default());
        let handle = spawn_relay(
            relay,
            DefaultOpener,
            Box::new(NullSession::new()),
            Box::new(Vec::<Barcode>::new()),
        )?;
        let stats = handle.join()?;
        assert_eq!(stats.frames_submitted, 3);
        assert_eq!(stats.exit, ExitReason::EndOfStream);
        Ok(())
    }

    #[test]
    fn unbounded_stream_stops_on_cancel() -> Result<()> {
        let relay = FrameRelay::new("stub://worker?frames=0", TransportOptions::default());
        let handle = spawn_relay(
            relay,
            DefaultOpener,
            Box::new(NullSession::new()),
            Box::new(Vec::<Barcode>::new()),
        )?;

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(20) && !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.cancel();
        let stats = handle.join()?;
        assert_eq!(stats.exit, ExitReason::Cancelled);
        Ok(())
    }

    #[test]
    fn tokens_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
