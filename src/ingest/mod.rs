//! Stream sources.
//!
//! This module opens a video transport and exposes decoded frames through the
//! pull-based `StreamHandle` trait:
//! - RTSP streams (feature: ingest-ffmpeg), reliable transport forced
//! - HTTP MJPEG/JPEG streams (feature: ingest-http)
//! - Direct locators such as local files (feature: ingest-ffmpeg)
//! - Synthetic `stub://` streams (testing, dry runs)
//!
//! Sources decode only. They never retry, reconnect or buffer more than the
//! frame they are currently lending to the caller.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::frame::PixelFormat;

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
#[cfg(feature = "ingest-http")]
pub(crate) mod http;
pub mod stub;

pub use stub::{StubConfig, StubSource};

pub const STUB_SCHEME: &str = "stub://";

/// Format negotiated with the decoder once the stream is open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// One decoded frame, borrowed from the source until the next pull.
///
/// A frame may carry no pixel payload (e.g. a non-video part interleaved in
/// the container). Consumers skip such frames.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    payload: Option<&'a [u8]>,
}

impl<'a> Frame<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    pub fn empty() -> Self {
        Self { payload: None }
    }

    pub fn payload(&self) -> Option<&'a [u8]> {
        self.payload
    }
}

/// An open video transport.
///
/// Implementations own their sockets and decoder state. The relay calls
/// `release` exactly once, on every exit path, before dropping the handle.
pub trait StreamHandle: Send {
    /// Locator the stream was opened from.
    fn url(&self) -> &str;

    /// Width, height and pixel format agreed with the decoder.
    fn negotiated_format(&self) -> StreamFormat;

    /// Pull the next decoded frame. `Ok(None)` is the normal end of stream;
    /// `Err` is a decoder fault.
    fn next_frame(&mut self) -> Result<Option<Frame<'_>>>;

    /// Free transport and decoder resources.
    fn release(&mut self);
}

/// Delivery mode for RTSP sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    /// Interleaved over the RTSP TCP connection (reliable).
    #[default]
    Tcp,
    Udp,
}

impl RtspTransport {
    /// Whether lost packets are retransmitted instead of surfacing as
    /// corrupt frames.
    pub fn is_reliable(self) -> bool {
        matches!(self, RtspTransport::Tcp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(RtspTransport::Tcp),
            "udp" => Ok(RtspTransport::Udp),
            other => Err(anyhow!("unknown rtsp transport '{}'; expected tcp or udp", other)),
        }
    }
}

/// Transport-level options applied when a stream is opened.
#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub rtsp_transport: RtspTransport,
    /// Connect/read timeout for web transports.
    pub http_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            rtsp_transport: RtspTransport::Tcp,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport family selected from a locator's scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Real-time streaming protocol, opened directly by the decoder.
    Streaming,
    /// Plain web transport: a byte stream is opened first and handed to the decoder.
    Web,
    /// In-process synthetic frames.
    Synthetic,
    /// Anything else, opened as-is (local files, device paths, other schemes).
    Direct,
}

impl Transport {
    pub fn classify(url: &str) -> Self {
        let lower = url.trim_start().to_ascii_lowercase();
        if lower.starts_with("rtsp:") || lower.starts_with("rtsps:") {
            Transport::Streaming
        } else if lower.starts_with("http:") || lower.starts_with("https:") {
            Transport::Web
        } else if lower.starts_with(STUB_SCHEME) {
            Transport::Synthetic
        } else {
            Transport::Direct
        }
    }
}

/// Opens stream handles. The relay depends on this seam so tests can inject
/// scripted sources.
pub trait StreamOpener {
    fn open(&self, url: &str, options: &TransportOptions) -> Result<Box<dyn StreamHandle>>;
}

/// Opener backed by the sources compiled into this build.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOpener;

impl StreamOpener for DefaultOpener {
    fn open(&self, url: &str, options: &TransportOptions) -> Result<Box<dyn StreamHandle>> {
        open_stream(url, options)
    }
}

/// Open `url` with the transport its scheme selects.
pub fn open_stream(url: &str, options: &TransportOptions) -> Result<Box<dyn StreamHandle>> {
    if url.trim().is_empty() {
        return Err(anyhow!("stream url is empty"));
    }
    match Transport::classify(url) {
        Transport::Synthetic => Ok(Box::new(StubSource::open(url)?)),
        Transport::Streaming => {
            if !options.rtsp_transport.is_reliable() {
                log::warn!(
                    "rtsp over {} for {} may drop packets and corrupt frames; tcp is the reliable default",
                    options.rtsp_transport.as_str(),
                    url
                );
            }
            open_streaming(url, options)
        }
        Transport::Web => open_web(url, options),
        Transport::Direct => open_direct(url),
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_streaming(url: &str, options: &TransportOptions) -> Result<Box<dyn StreamHandle>> {
    Ok(Box::new(ffmpeg::FfmpegSource::open(
        url,
        Some(options.rtsp_transport),
    )?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_streaming(_url: &str, _options: &TransportOptions) -> Result<Box<dyn StreamHandle>> {
    Err(anyhow!("RTSP requires the ingest-ffmpeg feature"))
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_direct(url: &str) -> Result<Box<dyn StreamHandle>> {
    Ok(Box::new(ffmpeg::FfmpegSource::open(url, None)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_direct(url: &str) -> Result<Box<dyn StreamHandle>> {
    Err(anyhow!(
        "opening '{}' directly requires the ingest-ffmpeg feature",
        url
    ))
}

/// Web streams are connected first. MJPEG and JPEG bodies are decoded in
/// process; any other container goes to the video decoder.
fn open_web(url: &str, options: &TransportOptions) -> Result<Box<dyn StreamHandle>> {
    match open_web_jpeg(url, options)? {
        Some(source) => Ok(source),
        None => open_web_video(url),
    }
}

#[cfg(feature = "ingest-http")]
fn open_web_jpeg(url: &str, options: &TransportOptions) -> Result<Option<Box<dyn StreamHandle>>> {
    match http::HttpSource::connect(url, options.http_timeout)? {
        http::Connection::Jpeg(source) => Ok(Some(Box::new(source))),
        http::Connection::Video { content_type } => {
            log::debug!(
                "{} serves '{}'; handing it to the video decoder",
                url,
                content_type
            );
            Ok(None)
        }
    }
}

#[cfg(not(feature = "ingest-http"))]
fn open_web_jpeg(_url: &str, _options: &TransportOptions) -> Result<Option<Box<dyn StreamHandle>>> {
    Ok(None)
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_web_video(url: &str) -> Result<Box<dyn StreamHandle>> {
    Ok(Box::new(ffmpeg::FfmpegSource::open(url, None)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_web_video(url: &str) -> Result<Box<dyn StreamHandle>> {
    Err(anyhow!(
        "'{}' is not an MJPEG or JPEG stream; web video requires the ingest-ffmpeg feature",
        url
    ))
}
