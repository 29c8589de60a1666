use anyhow::Result;

use crate::frame::ImageDescriptor;
use crate::recognize::{frame_bytes, Barcode, RecognitionSession};

/// Session that accepts frames and recognizes nothing. Used for dry runs that
/// exercise ingestion without a decoder.
#[derive(Debug, Default)]
pub struct NullSession {
    frames: u64,
}

impl NullSession {
    pub fn new() -> Self {
        Self { frames: 0 }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }
}

impl RecognitionSession for NullSession {
    fn name(&self) -> &'static str {
        "null"
    }

    fn process_frame(&mut self, descriptor: &ImageDescriptor, buffer: &[u8]) -> Result<()> {
        frame_bytes(descriptor, buffer)?;
        self.frames += 1;
        Ok(())
    }

    fn newly_recognized(&mut self) -> Vec<Barcode> {
        Vec::new()
    }
}
