//! QR relay
//!
//! This crate pulls decoded frames from a network video stream and hands each
//! one to a barcode-recognition engine, emitting the codes it finds.
//!
//! # Architecture
//!
//! Three pieces, composed linearly on one thread:
//!
//! 1. **Stream source** (`ingest`): opens RTSP, HTTP or direct locators and
//!    lends out decoded frames with a negotiated width, height and pixel format.
//! 2. **Frame relay** (`relay`): copies each frame into a grow-only buffer,
//!    keeps the image descriptor in step with it, and drives the engine.
//! 3. **Recognition engine** (`recognize`): scans the buffer and reports
//!    codes newly recognized by each submission, which flow to a `sink`.
//!
//! # Module Structure
//!
//! - `frame`: pixel formats, engine layouts, `ImageDescriptor`, `FrameBuffer`
//! - `ingest`: `StreamHandle` sources and transport selection
//! - `recognize`: `RecognitionSession` backends and duplicate tracking
//! - `relay`: the relay loop, its worker thread and cancellation
//! - `sink`: result destinations
//! - `config`: file and environment configuration

pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod recognize;
pub mod relay;
pub mod sink;

pub use config::RelayConfig;
pub use error::RelayError;
pub use frame::{FrameBuffer, ImageDescriptor, ImageLayout, PixelFormat};
pub use ingest::{
    open_stream, DefaultOpener, Frame, RtspTransport, StreamFormat, StreamHandle, StreamOpener,
    Transport, TransportOptions,
};
pub use recognize::{create_session, Barcode, EngineSettings, RecognitionSession, Symbology};
pub use relay::{
    spawn_relay, CancelToken, ExitReason, FrameRelay, RelayHandle, RelayState, RelayStats,
};
pub use sink::{JsonLinesSink, LogSink, ResultSink, SinkFormat, StdoutSink};
