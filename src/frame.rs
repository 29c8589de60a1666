//! Frame buffer and image description.
//!
//! - `PixelFormat`: pixel format negotiated by a stream source.
//! - `ImageLayout`: the byte layouts a recognition engine understands.
//! - `ImageDescriptor`: shape of the frame currently held in the buffer.
//! - `FrameBuffer`: reusable, grow-only byte buffer owned by the relay loop.
//!
//! The descriptor's `memory_size` is authoritative. Bytes in the buffer past
//! `memory_size` belong to earlier, larger frames and MUST be ignored.

use serde::{Deserialize, Serialize};

/// Growth factor applied when a frame does not fit the current buffer.
pub const BUFFER_GROWTH_FACTOR: usize = 2;

// ----------------------------------------------------------------------------
// Pixel formats and layouts
// ----------------------------------------------------------------------------

/// Pixel format reported by a stream source after negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Rgba,
    Argb,
    /// Any format the relay has no fixed mapping for, tagged with the
    /// decoder's own name for diagnostics.
    Other(String),
}

impl PixelFormat {
    /// Parse a format name as used in config files and `stub://` URLs.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gray8" | "gray" | "grey" => PixelFormat::Gray8,
            "rgb24" | "rgb" => PixelFormat::Rgb24,
            "bgr24" | "bgr" => PixelFormat::Bgr24,
            "rgba" => PixelFormat::Rgba,
            "argb" => PixelFormat::Argb,
            other => PixelFormat::Other(other.to_string()),
        }
    }

    /// Bytes per pixel for packed formats; `None` for formats we cannot size.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba | PixelFormat::Argb => Some(4),
            PixelFormat::Other(_) => None,
        }
    }
}

/// Byte layout of a frame as understood by the recognition engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLayout {
    Gray8,
    Rgb8,
    Rgba8,
    Argb8,
    Unknown,
}

impl ImageLayout {
    /// Fixed, total mapping from a negotiated pixel format to an engine layout.
    ///
    /// BGR24 shares the RGB layout: channel order does not matter for
    /// luminance-based barcode scanning.
    pub fn for_pixel_format(format: &PixelFormat) -> Self {
        match format {
            PixelFormat::Gray8 => ImageLayout::Gray8,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => ImageLayout::Rgb8,
            PixelFormat::Rgba => ImageLayout::Rgba8,
            PixelFormat::Argb => ImageLayout::Argb8,
            PixelFormat::Other(_) => ImageLayout::Unknown,
        }
    }

    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            ImageLayout::Gray8 => Some(1),
            ImageLayout::Rgb8 => Some(3),
            ImageLayout::Rgba8 | ImageLayout::Argb8 => Some(4),
            ImageLayout::Unknown => None,
        }
    }
}

// ----------------------------------------------------------------------------
// ImageDescriptor
// ----------------------------------------------------------------------------

/// Describes the frame currently held in a `FrameBuffer`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub layout: ImageLayout,
    memory_size: usize,
}

impl ImageDescriptor {
    pub fn new(width: u32, height: u32, layout: ImageLayout) -> Self {
        Self {
            width,
            height,
            layout,
            memory_size: 0,
        }
    }

    /// Byte length of the current frame's payload.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn set_memory_size(&mut self, size: usize) {
        self.memory_size = size;
    }

    /// Number of bytes a tightly packed frame of this shape occupies, when known.
    pub fn expected_size(&self) -> Option<usize> {
        let bpp = self.layout.bytes_per_pixel()?;
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(bpp)
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Reusable byte buffer holding one decoded frame.
///
/// Capacity only grows. A frame larger than the current capacity triggers a
/// reallocation to `BUFFER_GROWTH_FACTOR * size`, so a stream settles on a
/// steady-state allocation after its first large frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Number of bytes the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Copy `payload` to offset 0, growing first if needed. Returns the number
    /// of bytes copied and whether the buffer was reallocated.
    pub fn load(&mut self, payload: &[u8]) -> (usize, bool) {
        let size = payload.len();
        let grew = size > self.data.len();
        if grew {
            self.data = vec![0u8; size.saturating_mul(BUFFER_GROWTH_FACTOR)];
        }
        self.data[..size].copy_from_slice(payload);
        (size, grew)
    }

    /// Full backing storage. Only the first `memory_size` bytes are meaningful.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_mapping_covers_known_formats() {
        assert_eq!(
            ImageLayout::for_pixel_format(&PixelFormat::Gray8),
            ImageLayout::Gray8
        );
        assert_eq!(
            ImageLayout::for_pixel_format(&PixelFormat::Rgb24),
            ImageLayout::Rgb8
        );
        assert_eq!(
            ImageLayout::for_pixel_format(&PixelFormat::Bgr24),
            ImageLayout::Rgb8
        );
        assert_eq!(
            ImageLayout::for_pixel_format(&PixelFormat::Rgba),
            ImageLayout::Rgba8
        );
        assert_eq!(
            ImageLayout::for_pixel_format(&PixelFormat::Argb),
            ImageLayout::Argb8
        );
    }

    #[test]
    fn unrecognized_formats_map_to_unknown() {
        for name in ["yuv420p", "nv12", "", "p010le"] {
            let format = PixelFormat::from_name(name);
            assert_eq!(ImageLayout::for_pixel_format(&format), ImageLayout::Unknown);
        }
    }

    #[test]
    fn buffer_grows_to_twice_the_frame() {
        let mut buffer = FrameBuffer::new();
        let (size, grew) = buffer.load(&[7u8; 100]);
        assert_eq!(size, 100);
        assert!(grew);
        assert_eq!(buffer.capacity(), 200);

        let (size, grew) = buffer.load(&[1u8; 150]);
        assert_eq!(size, 150);
        assert!(!grew);
        assert_eq!(buffer.capacity(), 200);
        assert_eq!(&buffer.as_slice()[..150], &[1u8; 150][..]);
    }

    #[test]
    fn buffer_never_shrinks() {
        let mut buffer = FrameBuffer::new();
        let mut last = 0;
        for size in [64usize, 512, 16, 1024, 1, 700] {
            buffer.load(&vec![0xAB; size]);
            assert!(buffer.capacity() >= size);
            assert!(buffer.capacity() >= last);
            last = buffer.capacity();
        }
        assert_eq!(last, 1024);

        let (_, grew) = buffer.load(&[0xCD; 1024]);
        assert!(!grew);
        let (size, grew) = buffer.load(&vec![0xCD; 1025]);
        assert_eq!(size, 1025);
        assert!(grew);
        assert_eq!(buffer.capacity(), 2050);
    }

    #[test]
    fn descriptor_expected_size_uses_layout() {
        let desc = ImageDescriptor::new(4, 2, ImageLayout::Rgba8);
        assert_eq!(desc.expected_size(), Some(32));
        let unknown = ImageDescriptor::new(4, 2, ImageLayout::Unknown);
        assert_eq!(unknown.expected_size(), None);
    }
}
