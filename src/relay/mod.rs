//! Frame relay loop.
//!
//! The relay drives one stream from open to close:
//! 1. Opens the source and describes its negotiated format
//! 2. Pulls frames until end-of-stream, a fault, or cancellation
//! 3. Copies each payload into a grow-only `FrameBuffer`
//! 4. Submits the buffer to the recognition session
//! 5. Emits the codes that submission newly recognized
//!
//! The stream handle is released exactly once on every exit path. There is
//! no retry or reconnect: a failed or finished session is final.

mod worker;

use std::ops::{Deref, DerefMut};

use crate::error::RelayError;
use crate::frame::{FrameBuffer, ImageDescriptor, ImageLayout};
use crate::ingest::{StreamHandle, StreamOpener, TransportOptions};
use crate::recognize::RecognitionSession;
use crate::sink::ResultSink;

pub use worker::{spawn_relay, CancelToken, RelayHandle};

/// Lifecycle of a relay session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Unopened,
    Opened,
    Streaming,
    Closed,
}

/// Why a session ended without error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitReason {
    #[default]
    EndOfStream,
    Cancelled,
}

/// Counters for one relay session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_pulled: u64,
    pub frames_skipped: u64,
    pub frames_submitted: u64,
    pub codes_emitted: u64,
    pub buffer_capacity: usize,
    pub exit: ExitReason,
}

/// Drives one stream through the recognition session.
pub struct FrameRelay {
    url: String,
    options: TransportOptions,
    cancel: CancelToken,
    state: RelayState,
}

impl FrameRelay {
    pub fn new(url: impl Into<String>, options: TransportOptions) -> Self {
        Self {
            url: url.into(),
            options,
            cancel: CancelToken::new(),
            state: RelayState::Unopened,
        }
    }

    /// Share an existing cancellation token instead of the relay's own.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Run the session to completion on the calling thread.
    pub fn run(
        &mut self,
        opener: &dyn StreamOpener,
        session: &mut dyn RecognitionSession,
        sink: &mut dyn ResultSink,
    ) -> Result<RelayStats, RelayError> {
        let mut stats = RelayStats::default();
        if self.cancel.is_cancelled() {
            self.state = RelayState::Closed;
            stats.exit = ExitReason::Cancelled;
            return Ok(stats);
        }

        let handle = match opener.open(&self.url, &self.options) {
            Ok(handle) => handle,
            Err(e) => {
                self.state = RelayState::Closed;
                return Err(RelayError::stream_open(&self.url, e));
            }
        };
        let mut stream = StreamGuard::new(handle);
        self.state = RelayState::Opened;

        let mut descriptor = describe(&*stream);
        log::info!(
            "streaming {} ({}x{}, layout {:?}) into {} engine",
            self.url,
            descriptor.width,
            descriptor.height,
            descriptor.layout,
            session.name()
        );

        self.state = RelayState::Streaming;
        let mut buffer = FrameBuffer::new();
        let result = relay_frames(
            &mut stream,
            &mut descriptor,
            &mut buffer,
            session,
            sink,
            &self.cancel,
            &mut stats,
        );

        drop(stream);
        self.state = RelayState::Closed;
        stats.buffer_capacity = buffer.capacity();

        let exit = result?;
        stats.exit = exit;
        Ok(stats)
    }
}

/// Build the descriptor for a freshly opened stream.
pub fn describe(stream: &dyn StreamHandle) -> ImageDescriptor {
    let format = stream.negotiated_format();
    let layout = ImageLayout::for_pixel_format(&format.pixel_format);
    if layout == ImageLayout::Unknown {
        log::warn!(
            "pixel format {:?} has no engine layout; frames are passed as unknown",
            format.pixel_format
        );
    }
    ImageDescriptor::new(format.width, format.height, layout)
}

fn relay_frames(
    stream: &mut StreamGuard,
    descriptor: &mut ImageDescriptor,
    buffer: &mut FrameBuffer,
    session: &mut dyn RecognitionSession,
    sink: &mut dyn ResultSink,
    cancel: &CancelToken,
    stats: &mut RelayStats,
) -> Result<ExitReason, RelayError> {
    loop {
        if cancel.is_cancelled() {
            log::info!("relay cancelled after {} frames", stats.frames_pulled);
            return Ok(ExitReason::Cancelled);
        }

        let frame = match stream.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("end of stream after {} frames", stats.frames_pulled);
                return Ok(ExitReason::EndOfStream);
            }
            Err(source) => {
                return Err(RelayError::DecodeFault {
                    frame: stats.frames_pulled,
                    source,
                })
            }
        };
        stats.frames_pulled += 1;

        let payload = match frame.payload() {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                stats.frames_skipped += 1;
                log::trace!("frame {} has no pixel payload", stats.frames_pulled);
                continue;
            }
        };

        let (size, grew) = buffer.load(payload);
        if grew {
            log::debug!(
                "frame buffer grown to {} bytes for a {} byte frame",
                buffer.capacity(),
                size
            );
        }
        descriptor.set_memory_size(size);
        if descriptor.memory_size() > buffer.capacity() {
            return Err(RelayError::DescriptorOverflow {
                size: descriptor.memory_size(),
                capacity: buffer.capacity(),
            });
        }

        session
            .process_frame(descriptor, buffer.as_slice())
            .map_err(|source| RelayError::Recognition {
                frame: stats.frames_pulled,
                source,
            })?;
        stats.frames_submitted += 1;

        for code in session.newly_recognized() {
            sink.emit(&code);
            stats.codes_emitted += 1;
        }
    }
}

/// Releases the stream handle when dropped.
struct StreamGuard {
    handle: Box<dyn StreamHandle>,
}

impl StreamGuard {
    fn new(handle: Box<dyn StreamHandle>) -> Self {
        Self { handle }
    }
}

impl Deref for StreamGuard {
    type Target = dyn StreamHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl DerefMut for StreamGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.handle.release();
        log::debug!("released stream {}", self.handle.url());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{DefaultOpener, TransportOptions};
    use crate::recognize::{Barcode, NullSession};

    #[test]
    fn stub_stream_runs_to_end() -> Result<(), RelayError> {
        let mut relay = FrameRelay::new(
            "stub://unit?frames=4&width=8&height=8&format=gray8&empty_every=2",
            TransportOptions::default(),
        );
        let mut session = NullSession::new();
        let mut sink: Vec<Barcode> = Vec::new();

        let stats = relay.run(&DefaultOpener, &mut session, &mut sink)?;
        assert_eq!(stats.exit, ExitReason::EndOfStream);
        assert_eq!(stats.frames_pulled, 4);
        assert_eq!(stats.frames_skipped, 2);
        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.buffer_capacity, 128);
        assert_eq!(session.frames_processed(), 2);
        assert_eq!(relay.state(), RelayState::Closed);
        assert!(sink.is_empty());
        Ok(())
    }

    #[test]
    fn open_failure_is_stream_open_error() {
        let mut relay = FrameRelay::new("stub://bad?width=0", TransportOptions::default());
        let mut session = NullSession::new();
        let mut sink: Vec<Barcode> = Vec::new();

        let err = relay
            .run(&DefaultOpener, &mut session, &mut sink)
            .expect_err("open must fail");
        assert!(matches!(err, RelayError::StreamOpen { .. }));
        assert_eq!(relay.state(), RelayState::Closed);
    }

    #[test]
    fn cancelled_before_open_does_not_open() -> Result<(), RelayError> {
        let mut relay = FrameRelay::new("stub://unit", TransportOptions::default());
        relay.cancel_token().cancel();
        let mut session = NullSession::new();
        let mut sink: Vec<Barcode> = Vec::new();

        let stats = relay.run(&DefaultOpener, &mut session, &mut sink)?;
        assert_eq!(stats.exit, ExitReason::Cancelled);
        assert_eq!(stats.frames_pulled, 0);
        Ok(())
    }

    #[test]
    fn unknown_pixel_format_still_streams() -> Result<(), RelayError> {
        let mut relay = FrameRelay::new(
            "stub://unit?frames=2&width=4&height=4&format=yuv420p",
            TransportOptions::default(),
        );
        let mut session = NullSession::new();
        let mut sink: Vec<Barcode> = Vec::new();

        let stats = relay.run(&DefaultOpener, &mut session, &mut sink)?;
        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.buffer_capacity, 48);
        Ok(())
    }
}
