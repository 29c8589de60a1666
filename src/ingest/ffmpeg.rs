//! FFmpeg-backed stream source for RTSP and direct locators.
//!
//! Decoders that already emit one of the packed layouts the recognition
//! engine understands are passed through untouched. Everything else is
//! converted to BGR24. Rows are repacked to drop stride padding so the payload
//! handed to the relay is exactly `width * height * bpp` bytes.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;

use super::{Frame, RtspTransport, StreamFormat, StreamHandle};
use crate::frame::PixelFormat;

pub(crate) struct FfmpegSource {
    url: String,
    format: StreamFormat,
    bytes_per_pixel: usize,
    inner: Option<Decoding>,
    packed: Vec<u8>,
    frame_count: u64,
}

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    decoded: ffmpeg::frame::Video,
    converted: ffmpeg::frame::Video,
    eof_sent: bool,
}

impl FfmpegSource {
    /// Open `url`. `rtsp_transport` is set for streaming-protocol locators.
    pub(crate) fn open(url: &str, rtsp_transport: Option<RtspTransport>) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let input = match rtsp_transport {
            Some(transport) => {
                let mut options = ffmpeg::Dictionary::new();
                options.set("rtsp_transport", transport.as_str());
                ffmpeg::format::input_with_dictionary(&url, options)
                    .with_context(|| format!("failed to open rtsp stream '{}'", url))?
            }
            None => ffmpeg::format::input(&url)
                .with_context(|| format!("failed to open '{}' with ffmpeg", url))?,
        };

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", url))?;
        let stream_index = video_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let width = decoder.width();
        let height = decoder.height();
        let (pixel_format, output) = match native_format(decoder.format()) {
            Some(native) => (native, None),
            None => (PixelFormat::Bgr24, Some(Pixel::BGR24)),
        };
        let scaler = match output {
            Some(target) => Some(
                ffmpeg::software::scaling::Context::get(
                    decoder.format(),
                    width,
                    height,
                    target,
                    width,
                    height,
                    ffmpeg::software::scaling::flag::Flags::BILINEAR,
                )
                .context("create ffmpeg scaler")?,
            ),
            None => None,
        };
        let bytes_per_pixel = pixel_format
            .bytes_per_pixel()
            .ok_or_else(|| anyhow!("negotiated pixel format has no packed size"))?;

        log::info!(
            "FfmpegSource: connected to {} ({}x{} {:?} -> {:?})",
            url,
            width,
            height,
            decoder.format(),
            pixel_format
        );

        Ok(Self {
            url: url.to_string(),
            format: StreamFormat {
                width,
                height,
                pixel_format,
            },
            bytes_per_pixel,
            inner: Some(Decoding {
                input,
                stream_index,
                decoder,
                scaler,
                decoded: ffmpeg::frame::Video::empty(),
                converted: ffmpeg::frame::Video::empty(),
                eof_sent: false,
            }),
            packed: Vec::new(),
            frame_count: 0,
        })
    }
}

impl StreamHandle for FfmpegSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn negotiated_format(&self) -> StreamFormat {
        self.format.clone()
    }

    fn next_frame(&mut self) -> Result<Option<Frame<'_>>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg source already released"))?;

        loop {
            match inner.decoder.receive_frame(&mut inner.decoded) {
                Ok(()) => {
                    let frame = match inner.scaler.as_mut() {
                        Some(scaler) => {
                            scaler
                                .run(&inner.decoded, &mut inner.converted)
                                .context("convert frame to BGR24")?;
                            &inner.converted
                        }
                        None => &inner.decoded,
                    };
                    pack_rows(frame, self.bytes_per_pixel, &mut self.packed)?;
                    self.frame_count += 1;
                    return Ok(Some(Frame::new(&self.packed)));
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    if inner.eof_sent {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e).context("receive frame from ffmpeg decoder"),
            }

            match next_video_packet(&mut inner.input, inner.stream_index) {
                Some(packet) => inner
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    inner.decoder.send_eof().context("flush ffmpeg decoder")?;
                    inner.eof_sent = true;
                }
            }
        }
    }

    fn release(&mut self) {
        if self.inner.take().is_some() {
            log::info!(
                "FfmpegSource: closed {} after {} frames",
                self.url,
                self.frame_count
            );
        }
        self.packed = Vec::new();
    }
}

fn native_format(pixel: Pixel) -> Option<PixelFormat> {
    match pixel {
        Pixel::GRAY8 => Some(PixelFormat::Gray8),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::BGR24 => Some(PixelFormat::Bgr24),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::ARGB => Some(PixelFormat::Argb),
        _ => None,
    }
}

fn next_video_packet(
    input: &mut ffmpeg::format::context::Input,
    stream_index: usize,
) -> Option<ffmpeg::Packet> {
    input
        .packets()
        .find(|(stream, _)| stream.index() == stream_index)
        .map(|(_, packet)| packet)
}

fn pack_rows(frame: &ffmpeg::frame::Video, bytes_per_pixel: usize, out: &mut Vec<u8>) -> Result<()> {
    let row_bytes = frame.width() as usize * bytes_per_pixel;
    let height = frame.height() as usize;
    let stride = frame.stride(0) as usize;
    let data = frame.data(0);

    out.clear();
    if stride == row_bytes {
        out.extend_from_slice(
            data.get(..row_bytes * height)
                .context("ffmpeg frame is shorter than its dimensions")?,
        );
        return Ok(());
    }

    out.reserve(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        out.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(())
}
