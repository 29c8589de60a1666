//! Barcode recognition boundary.
//!
//! The relay submits one frame at a time to a `RecognitionSession` and then
//! asks for the codes recognized by that submission. Sessions own whatever
//! history they need to decide what "newly recognized" means; the relay never
//! creates or destroys code records itself.

mod backends;
mod history;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::frame::ImageDescriptor;

pub use backends::NullSession;
#[cfg(feature = "engine-rqrr")]
pub use backends::RqrrSession;
pub use history::RecognitionHistory;

/// How long a code must be out of view before it counts as new again.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_millis(5000);

/// Barcode symbologies a session can be asked to detect.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Qr,
    MicroQr,
    DataMatrix,
    Ean13,
    Code128,
}

impl Symbology {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "qr" => Ok(Symbology::Qr),
            "micro_qr" => Ok(Symbology::MicroQr),
            "data_matrix" => Ok(Symbology::DataMatrix),
            "ean13" => Ok(Symbology::Ean13),
            "code128" => Ok(Symbology::Code128),
            other => Err(anyhow!("unknown symbology '{}'", other)),
        }
    }
}

/// A recognized code: symbology plus decoded payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Barcode {
    pub symbology: Symbology,
    pub data: String,
}

/// Settings used to create a recognition session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Backend name (`rqrr`, `null`).
    pub backend: String,
    /// Licence credential for engines that need one.
    pub license_key: Option<String>,
    pub symbologies: Vec<Symbology>,
    pub duplicate_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: default_backend().to_string(),
            license_key: None,
            symbologies: vec![Symbology::Qr],
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

/// Backend used when none is configured.
pub fn default_backend() -> &'static str {
    if cfg!(feature = "engine-rqrr") {
        "rqrr"
    } else {
        "null"
    }
}

/// Engine state spanning the frames of one stream.
///
/// # Buffer contract
///
/// `process_frame` receives the relay's whole frame buffer. Only the first
/// `descriptor.memory_size()` bytes belong to the current frame; sessions must
/// not read past them.
pub trait RecognitionSession: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Scan one frame. Blocks until the frame has been processed.
    fn process_frame(&mut self, descriptor: &ImageDescriptor, buffer: &[u8]) -> Result<()>;

    /// Codes newly recognized by the most recent `process_frame` call only.
    fn newly_recognized(&mut self) -> Vec<Barcode>;
}

/// Create a session for the configured backend.
pub fn create_session(settings: &EngineSettings) -> Result<Box<dyn RecognitionSession>> {
    if settings.symbologies.is_empty() {
        return Err(anyhow!("at least one symbology must be enabled"));
    }
    match settings.backend.as_str() {
        "null" => Ok(Box::new(NullSession::new())),
        #[cfg(feature = "engine-rqrr")]
        "rqrr" => Ok(Box::new(RqrrSession::new(settings))),
        #[cfg(not(feature = "engine-rqrr"))]
        "rqrr" => Err(anyhow!("the rqrr engine requires the engine-rqrr feature")),
        other => Err(anyhow!("unknown recognition backend '{}'", other)),
    }
}

/// The bytes of the current frame, checked against the descriptor.
pub(crate) fn frame_bytes<'a>(descriptor: &ImageDescriptor, buffer: &'a [u8]) -> Result<&'a [u8]> {
    buffer.get(..descriptor.memory_size()).ok_or_else(|| {
        anyhow!(
            "descriptor size {} exceeds buffer length {}",
            descriptor.memory_size(),
            buffer.len()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageLayout;

    #[test]
    fn parses_symbology_names() -> Result<()> {
        assert_eq!(Symbology::parse("QR")?, Symbology::Qr);
        assert_eq!(Symbology::parse("micro-qr")?, Symbology::MicroQr);
        assert_eq!(Symbology::parse("data_matrix")?, Symbology::DataMatrix);
        assert!(Symbology::parse("aztec").is_err());
        Ok(())
    }

    #[test]
    fn create_session_rejects_unknown_backend() {
        let settings = EngineSettings {
            backend: "scandit".to_string(),
            ..EngineSettings::default()
        };
        assert!(create_session(&settings).is_err());
    }

    #[test]
    fn create_session_requires_a_symbology() {
        let settings = EngineSettings {
            backend: "null".to_string(),
            symbologies: vec![],
            ..EngineSettings::default()
        };
        assert!(create_session(&settings).is_err());
    }

    #[test]
    fn frame_bytes_respects_descriptor_size() -> Result<()> {
        let mut desc = ImageDescriptor::new(2, 2, ImageLayout::Gray8);
        desc.set_memory_size(4);
        let buffer = [1u8, 2, 3, 4, 9, 9, 9, 9];
        assert_eq!(frame_bytes(&desc, &buffer)?, &[1, 2, 3, 4]);

        desc.set_memory_size(16);
        assert!(frame_bytes(&desc, &buffer).is_err());
        Ok(())
    }
}
