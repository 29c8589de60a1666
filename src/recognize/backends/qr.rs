//! QR recognition backed by the pure-Rust `rqrr` decoder.
//!
//! Frames are reduced to a luma plane with the `image` crate, scanned for QR
//! grids, and the decoded payloads run through a `RecognitionHistory` so a
//! code that stays in view is reported once.

use anyhow::Result;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::frame::{ImageDescriptor, ImageLayout};
use crate::recognize::{
    frame_bytes, Barcode, EngineSettings, RecognitionHistory, RecognitionSession, Symbology,
};

pub struct RqrrSession {
    history: RecognitionHistory,
    qr_enabled: bool,
    fresh: Vec<Barcode>,
}

impl RqrrSession {
    pub fn new(settings: &EngineSettings) -> Self {
        for symbology in &settings.symbologies {
            if *symbology != Symbology::Qr {
                log::warn!("rqrr engine cannot detect {:?}; ignoring", symbology);
            }
        }
        let qr_enabled = settings.symbologies.contains(&Symbology::Qr);
        if !qr_enabled {
            log::warn!("rqrr engine created without QR enabled; it will recognize nothing");
        }
        if settings.license_key.is_some() {
            log::debug!("rqrr engine does not use a licence key");
        }

        let mut history = RecognitionHistory::new(settings.duplicate_window);
        history.start_new_sequence();
        Self {
            history,
            qr_enabled,
            fresh: Vec::new(),
        }
    }

    fn scan(&self, luma: &GrayImage) -> Vec<Barcode> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            luma.width() as usize,
            luma.height() as usize,
            |x, y| luma.get_pixel(x as u32, y as u32)[0],
        );
        let mut found = Vec::new();
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) => found.push(Barcode {
                    symbology: Symbology::Qr,
                    data: content,
                }),
                Err(e) => log::debug!("qr grid failed to decode: {:?}", e),
            }
        }
        found
    }
}

impl RecognitionSession for RqrrSession {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn process_frame(&mut self, descriptor: &ImageDescriptor, buffer: &[u8]) -> Result<()> {
        let bytes = frame_bytes(descriptor, buffer)?;
        let found = if self.qr_enabled {
            match to_luma(descriptor, bytes) {
                Some(luma) => self.scan(&luma),
                None => {
                    log::debug!(
                        "frame of {} bytes does not match {}x{} {:?}; not scanned",
                        bytes.len(),
                        descriptor.width,
                        descriptor.height,
                        descriptor.layout
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        self.fresh = self.history.observe(found);
        Ok(())
    }

    fn newly_recognized(&mut self) -> Vec<Barcode> {
        std::mem::take(&mut self.fresh)
    }
}

/// Reduce a frame to 8-bit luma. `None` when the bytes do not fill the
/// described shape.
///
/// Unknown layouts are assumed to start with a full-resolution luma plane,
/// which holds for the planar YUV formats decoders commonly emit.
fn to_luma(descriptor: &ImageDescriptor, bytes: &[u8]) -> Option<GrayImage> {
    let width = descriptor.width;
    let height = descriptor.height;
    let pixels = width as usize * height as usize;

    match descriptor.layout {
        ImageLayout::Gray8 | ImageLayout::Unknown => {
            GrayImage::from_raw(width, height, bytes.get(..pixels)?.to_vec())
        }
        ImageLayout::Rgb8 => {
            let rgb = RgbImage::from_raw(width, height, bytes.get(..pixels * 3)?.to_vec())?;
            Some(DynamicImage::ImageRgb8(rgb).into_luma8())
        }
        ImageLayout::Rgba8 => {
            let rgba = RgbaImage::from_raw(width, height, bytes.get(..pixels * 4)?.to_vec())?;
            Some(DynamicImage::ImageRgba8(rgba).into_luma8())
        }
        ImageLayout::Argb8 => {
            let rgba: Vec<u8> = bytes
                .get(..pixels * 4)?
                .chunks_exact(4)
                .flat_map(|px| [px[1], px[2], px[3], px[0]])
                .collect();
            let rgba = RgbaImage::from_raw(width, height, rgba)?;
            Some(DynamicImage::ImageRgba8(rgba).into_luma8())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(width: u32, height: u32, layout: ImageLayout, size: usize) -> ImageDescriptor {
        let mut desc = ImageDescriptor::new(width, height, layout);
        desc.set_memory_size(size);
        desc
    }

    /// Render `data` as a QR code on a white quiet zone, 4 pixels per module.
    fn render_qr(data: &str) -> (Vec<u8>, u32) {
        let code = qrcode::QrCode::new(data.as_bytes()).expect("encode qr");
        let modules = code.width();
        let colors = code.to_colors();
        let (scale, quiet) = (4, 4);
        let side = (modules + 2 * quiet) * scale;
        let mut pixels = vec![255u8; side * side];
        for y in 0..side {
            for x in 0..side {
                let (mx, my) = (x / scale, y / scale);
                let inside = (quiet..quiet + modules).contains(&mx)
                    && (quiet..quiet + modules).contains(&my);
                if inside && colors[(my - quiet) * modules + (mx - quiet)] == qrcode::Color::Dark {
                    pixels[y * side + x] = 0;
                }
            }
        }
        (pixels, side as u32)
    }

    fn qr(data: &str) -> Barcode {
        Barcode {
            symbology: Symbology::Qr,
            data: data.to_string(),
        }
    }

    #[test]
    fn gray_frame_yields_its_code_once_within_the_window() -> Result<()> {
        let (pixels, side) = render_qr("relay-check");
        let size = pixels.len();
        let mut buffer = pixels;
        buffer.extend_from_slice(&[0x5A; 777]);

        let mut session = RqrrSession::new(&EngineSettings::default());
        let desc = descriptor(side, side, ImageLayout::Gray8, size);
        session.process_frame(&desc, &buffer)?;
        assert_eq!(session.newly_recognized(), vec![qr("relay-check")]);
        assert!(session.newly_recognized().is_empty());

        session.process_frame(&desc, &buffer)?;
        assert!(session.newly_recognized().is_empty());
        Ok(())
    }

    #[test]
    fn argb_frame_yields_its_code() -> Result<()> {
        let (pixels, side) = render_qr("argb-check");
        let mut buffer: Vec<u8> = pixels.iter().flat_map(|&v| [255, v, v, v]).collect();
        let size = buffer.len();
        buffer.extend_from_slice(&[0x00, 0xFF, 0x13, 0x37]);

        let mut session = RqrrSession::new(&EngineSettings::default());
        session.process_frame(&descriptor(side, side, ImageLayout::Argb8, size), &buffer)?;
        assert_eq!(session.newly_recognized(), vec![qr("argb-check")]);
        Ok(())
    }

    #[test]
    fn qr_disabled_recognizes_nothing() -> Result<()> {
        let (pixels, side) = render_qr("ignored");
        let size = pixels.len();
        let mut session = RqrrSession::new(&EngineSettings {
            symbologies: vec![Symbology::Ean13],
            ..EngineSettings::default()
        });
        session.process_frame(&descriptor(side, side, ImageLayout::Gray8, size), &pixels)?;
        assert!(session.newly_recognized().is_empty());
        Ok(())
    }

    #[test]
    fn argb_and_rgba_reduce_to_the_same_luma() {
        let rgba = [10u8, 200, 30, 255, 250, 250, 250, 255];
        let argb = [255u8, 10, 200, 30, 255, 250, 250, 250];
        let a = to_luma(&descriptor(2, 1, ImageLayout::Rgba8, 8), &rgba).expect("rgba luma");
        let b = to_luma(&descriptor(2, 1, ImageLayout::Argb8, 8), &argb).expect("argb luma");
        assert_eq!(a.into_raw(), b.into_raw());
    }

    #[test]
    fn short_frames_are_not_scanned() {
        let bytes = [0u8; 5];
        assert!(to_luma(&descriptor(2, 1, ImageLayout::Rgb8, 5), &bytes).is_none());
        assert!(to_luma(&descriptor(4, 4, ImageLayout::Unknown, 5), &bytes).is_none());
    }

    #[test]
    fn blank_frame_yields_no_codes() -> Result<()> {
        let mut session = RqrrSession::new(&EngineSettings {
            backend: "rqrr".to_string(),
            ..EngineSettings::default()
        });
        let buffer = vec![255u8; 64 * 64 * 2];
        session.process_frame(&descriptor(64, 64, ImageLayout::Gray8, 64 * 64), &buffer)?;
        assert!(session.newly_recognized().is_empty());
        Ok(())
    }

    #[test]
    fn oversized_descriptor_is_an_error() {
        let mut session = RqrrSession::new(&EngineSettings::default());
        let buffer = vec![0u8; 4];
        assert!(session
            .process_frame(&descriptor(4, 4, ImageLayout::Gray8, 16), &buffer)
            .is_err());
    }
}
