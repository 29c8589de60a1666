//! HTTP stream source.
//!
//! The connection is opened first and the body routed by what it carries:
//! - `multipart/x-mixed-replace` bodies are read as an MJPEG stream, one frame
//!   per JPEG image, until the server closes the connection.
//! - A body that starts with a JPEG marker is read as a single snapshot (one
//!   frame, then end).
//! - Anything else is left to the video decoder.
//!
//! Frames are decoded in-memory to RGB24. The first frame is decoded during
//! `connect` so that width and height are known before the relay describes them.

use anyhow::{anyhow, Context, Result};
use std::io::{Cursor, Read};
use std::time::Duration;

use url::Url;

use super::{Frame, StreamFormat, StreamHandle};
use crate::frame::PixelFormat;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;

pub(crate) struct HttpSource {
    url: String,
    body: Option<Body>,
    format: StreamFormat,
    pixels: Vec<u8>,
    pending_first: bool,
    frame_count: u64,
}

enum Body {
    Mjpeg(MjpegStream),
    Snapshot,
}

/// Outcome of connecting to a web stream.
pub(crate) enum Connection {
    /// MJPEG or single-JPEG body, decoded in process.
    Jpeg(HttpSource),
    /// Any other body. The caller hands the url to the video decoder.
    Video { content_type: String },
}

#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Mjpeg,
    Snapshot,
    Video,
}

/// Pick a body reader from the response content type and the first body bytes.
fn classify_body(content_type: &str, prefix: &[u8]) -> BodyKind {
    if content_type.starts_with("multipart/") {
        BodyKind::Mjpeg
    } else if prefix.starts_with(&[0xFF, 0xD8]) {
        BodyKind::Snapshot
    } else {
        BodyKind::Video
    }
}

impl HttpSource {
    pub(crate) fn connect(url: &str, timeout: Duration) -> Result<Connection> {
        let parsed = Url::parse(url).context("parse http stream url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        let response = agent
            .get(parsed.as_str())
            .call()
            .with_context(|| format!("connect to http stream {}", url))?;
        let content_type = response
            .header("Content-Type")
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let mut reader: Box<dyn Read + Send> = Box::new(response.into_reader());

        let mut prefix = Vec::with_capacity(2);
        if !content_type.starts_with("multipart/") {
            reader
                .by_ref()
                .take(2)
                .read_to_end(&mut prefix)
                .context("read http stream body")?;
        }

        let (body, first_jpeg) = match classify_body(&content_type, &prefix) {
            BodyKind::Video => return Ok(Connection::Video { content_type }),
            BodyKind::Mjpeg => {
                let mut stream = MjpegStream::new(reader);
                let first = stream
                    .read_next_jpeg()?
                    .ok_or_else(|| anyhow!("mjpeg stream ended before the first frame"))?;
                (Body::Mjpeg(stream), first)
            }
            BodyKind::Snapshot => {
                let rest: Box<dyn Read + Send> = Box::new(Cursor::new(prefix).chain(reader));
                (Body::Snapshot, read_snapshot(rest)?)
            }
        };

        let (pixels, width, height) = decode_jpeg(&first_jpeg)?;
        log::info!(
            "HttpSource: connected to {} ({}x{}, {})",
            url,
            width,
            height,
            if matches!(body, Body::Mjpeg(_)) {
                "mjpeg"
            } else {
                "snapshot"
            }
        );

        Ok(Connection::Jpeg(Self {
            url: url.to_string(),
            body: Some(body),
            format: StreamFormat {
                width,
                height,
                pixel_format: PixelFormat::Rgb24,
            },
            pixels,
            pending_first: true,
            frame_count: 0,
        }))
    }
}

impl StreamHandle for HttpSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn negotiated_format(&self) -> StreamFormat {
        self.format.clone()
    }

    fn next_frame(&mut self) -> Result<Option<Frame<'_>>> {
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| anyhow!("http source already released"))?;

        if self.pending_first {
            self.pending_first = false;
            self.frame_count += 1;
            return Ok(Some(Frame::new(&self.pixels)));
        }

        let jpeg = match body {
            Body::Snapshot => return Ok(None),
            Body::Mjpeg(stream) => match stream.read_next_jpeg()? {
                Some(jpeg) => jpeg,
                None => return Ok(None),
            },
        };

        let (pixels, _, _) = decode_jpeg(&jpeg)?;
        self.pixels = pixels;
        self.frame_count += 1;
        Ok(Some(Frame::new(&self.pixels)))
    }

    fn release(&mut self) {
        if self.body.take().is_some() {
            log::info!(
                "HttpSource: closed {} after {} frames",
                self.url,
                self.frame_count
            );
        }
        self.pixels = Vec::new();
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG image, or `None` once the server closes the stream.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn read_snapshot(reader: Box<dyn Read + Send>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg snapshot exceeds {} bytes", MAX_JPEG_BYTES));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|pair| *pair == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|pair| *pair == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jpeg_between_multipart_headers() {
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        body.extend_from_slice(b"\r\n--frame");
        let (start, end) = find_jpeg_bounds(&body).expect("jpeg bounds");
        assert_eq!(&body[start..end], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    #[test]
    fn incomplete_jpeg_has_no_bounds() {
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 0, 0]).is_none());
        assert!(find_jpeg_bounds(&[0, 1, 2]).is_none());
    }

    #[test]
    fn mjpeg_stream_ends_cleanly_on_close() -> Result<()> {
        let mut body = Vec::new();
        for payload in [[0xAAu8], [0xBB]] {
            body.extend_from_slice(b"--frame\r\n\r\n");
            body.extend_from_slice(&[0xFF, 0xD8]);
            body.extend_from_slice(&payload);
            body.extend_from_slice(&[0xFF, 0xD9]);
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        assert_eq!(stream.read_next_jpeg()?, Some(vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]));
        assert_eq!(stream.read_next_jpeg()?, Some(vec![0xFF, 0xD8, 0xBB, 0xFF, 0xD9]));
        assert_eq!(stream.read_next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn decodes_jpeg_to_rgb() -> Result<()> {
        let mut jpeg = Vec::new();
        let image = image::RgbImage::from_pixel(4, 2, image::Rgb([200, 10, 10]));
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)?;
        let (pixels, width, height) = decode_jpeg(&jpeg)?;
        assert_eq!((width, height), (4, 2));
        assert_eq!(pixels.len(), 4 * 2 * 3);
        Ok(())
    }

    #[test]
    fn body_kind_follows_content_type_then_magic() {
        assert_eq!(
            classify_body("multipart/x-mixed-replace; boundary=frame", &[]),
            BodyKind::Mjpeg
        );
        assert_eq!(classify_body("image/jpeg", &[0xFF, 0xD8]), BodyKind::Snapshot);
        assert_eq!(classify_body("", &[0xFF, 0xD8]), BodyKind::Snapshot);
        assert_eq!(classify_body("video/mp2t", &[0x47, 0x00]), BodyKind::Video);
        assert_eq!(classify_body("video/x-flv", b"FL"), BodyKind::Video);
        assert_eq!(classify_body("application/octet-stream", &[]), BodyKind::Video);
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        assert!(read_snapshot(Box::new(Cursor::new(Vec::new()))).is_err());
    }
}
