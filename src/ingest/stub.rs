//! Synthetic frame source.
//!
//! `stub://<name>?frames=N&width=W&height=H&format=F&empty_every=K` produces
//! `N` deterministic frames (unbounded when `N` is 0), then ends the stream.
//! When `empty_every` is non-zero every K-th frame carries no payload, which
//! exercises the relay's skip path the way interleaved audio packets would.

use anyhow::{anyhow, Context, Result};

use super::{Frame, StreamFormat, StreamHandle, STUB_SCHEME};
use crate::frame::PixelFormat;

/// Configuration for a synthetic source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubConfig {
    pub name: String,
    /// Frames to produce before end-of-stream; 0 means unbounded.
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub empty_every: u64,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            name: "stub".to_string(),
            frames: 30,
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Rgb24,
            empty_every: 0,
        }
    }
}

impl StubConfig {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .get(..STUB_SCHEME.len())
            .filter(|scheme| scheme.eq_ignore_ascii_case(STUB_SCHEME))
            .map(|_| &url[STUB_SCHEME.len()..])
            .ok_or_else(|| anyhow!("'{}' is not a stub:// url", url))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, query),
            None => (rest, ""),
        };

        let mut cfg = StubConfig::default();
        if !name.is_empty() {
            cfg.name = name.to_string();
        }
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub option '{}' is missing a value", pair))?;
            match key {
                "frames" => cfg.frames = parse_number(key, value)?,
                "width" => cfg.width = parse_number(key, value)?,
                "height" => cfg.height = parse_number(key, value)?,
                "format" => cfg.pixel_format = PixelFormat::from_name(value),
                "empty_every" => cfg.empty_every = parse_number(key, value)?,
                other => return Err(anyhow!("unknown stub option '{}'", other)),
            }
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        Ok(cfg)
    }

    fn frame_len(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format.bytes_per_pixel() {
            Some(bpp) => pixels * bpp,
            // Unknown formats are sized like planar 4:2:0.
            None => pixels + pixels / 2,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("stub option '{}' has invalid value '{}'", key, value))
}

/// Deterministic in-process stream.
pub struct StubSource {
    url: String,
    config: StubConfig,
    frame_count: u64,
    pixels: Vec<u8>,
    released: bool,
}

impl StubSource {
    pub fn open(url: &str) -> Result<Self> {
        let config = StubConfig::parse(url)?;
        log::info!("StubSource: connected to {} (synthetic)", url);
        Ok(Self::with_config(url, config))
    }

    pub fn with_config(url: &str, config: StubConfig) -> Self {
        Self {
            url: url.to_string(),
            config,
            frame_count: 0,
            pixels: Vec::new(),
            released: false,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_count
    }

    fn fill_pixels(&mut self) {
        let len = self.config.frame_len();
        self.pixels.resize(len, 0);
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
    }
}

impl StreamHandle for StubSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn negotiated_format(&self) -> StreamFormat {
        StreamFormat {
            width: self.config.width,
            height: self.config.height,
            pixel_format: self.config.pixel_format.clone(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame<'_>>> {
        if self.released {
            return Err(anyhow!("stub source already released"));
        }
        if self.config.frames != 0 && self.frame_count >= self.config.frames {
            return Ok(None);
        }
        self.frame_count += 1;

        if self.config.empty_every != 0 && self.frame_count % self.config.empty_every == 0 {
            return Ok(Some(Frame::empty()));
        }

        self.fill_pixels();
        Ok(Some(Frame::new(&self.pixels)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pixels = Vec::new();
            log::debug!("StubSource: released {}", self.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_options() -> Result<()> {
        let cfg = StubConfig::parse("stub://front?frames=5&width=8&height=4&format=gray8")?;
        assert_eq!(cfg.name, "front");
        assert_eq!(cfg.frames, 5);
        assert_eq!(cfg.width, 8);
        assert_eq!(cfg.height, 4);
        assert_eq!(cfg.pixel_format, PixelFormat::Gray8);
        assert_eq!(cfg.empty_every, 0);
        Ok(())
    }

    #[test]
    fn rejects_unknown_options_and_zero_dimensions() {
        assert!(StubConfig::parse("stub://x?fps=10").is_err());
        assert!(StubConfig::parse("stub://x?width=0").is_err());
        assert!(StubConfig::parse("stub://x?frames").is_err());
        assert!(StubConfig::parse("rtsp://x").is_err());
    }

    #[test]
    fn produces_sized_frames_then_ends() -> Result<()> {
        let mut source = StubSource::open("stub://t?frames=2&width=4&height=2&format=rgba")?;
        let len = source
            .next_frame()?
            .and_then(|frame| frame.payload())
            .map(|payload| payload.len());
        assert_eq!(len, Some(32));
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.frames_produced(), 2);
        Ok(())
    }

    #[test]
    fn empty_every_interleaves_payloadless_frames() -> Result<()> {
        let mut source = StubSource::open("stub://t?frames=4&empty_every=2")?;
        let mut empties = 0;
        while let Some(frame) = source.next_frame()? {
            if frame.payload().is_none() {
                empties += 1;
            }
        }
        assert_eq!(empties, 2);
        Ok(())
    }

    #[test]
    fn pulling_after_release_is_an_error() -> Result<()> {
        let mut source = StubSource::open("stub://t")?;
        source.release();
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
