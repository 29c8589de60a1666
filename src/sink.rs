//! Destinations for recognized codes.

use anyhow::{anyhow, Result};
use std::io::Write;

use crate::recognize::Barcode;

/// Receives each newly recognized code, in recognition order.
pub trait ResultSink: Send {
    fn emit(&mut self, code: &Barcode);
}

/// Logs each code at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn emit(&mut self, code: &Barcode) {
        log::info!("recognized {:?}: {}", code.symbology, code.data);
    }
}

/// Writes each payload on its own line.
pub struct StdoutSink<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> StdoutSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ResultSink for StdoutSink<W> {
    fn emit(&mut self, code: &Barcode) {
        if let Err(e) = writeln!(self.out, "{}", code.data).and_then(|_| self.out.flush()) {
            log::warn!("failed to write recognized code: {}", e);
        }
    }
}

/// Writes each code as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl JsonLinesSink {
    pub fn new() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl Default for JsonLinesSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn emit(&mut self, code: &Barcode) {
        let line = match serde_json::to_string(code) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("failed to encode recognized code: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            log::warn!("failed to write recognized code: {}", e);
        }
    }
}

/// Collects codes in memory.
impl ResultSink for Vec<Barcode> {
    fn emit(&mut self, code: &Barcode) {
        self.push(code.clone());
    }
}

/// Output format selectable from config and the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkFormat {
    #[default]
    Plain,
    Json,
    Log,
}

impl SinkFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(SinkFormat::Plain),
            "json" => Ok(SinkFormat::Json),
            "log" => Ok(SinkFormat::Log),
            other => Err(anyhow!(
                "unknown output format '{}'; expected plain, json or log",
                other
            )),
        }
    }

    pub fn build(self) -> Box<dyn ResultSink> {
        match self {
            SinkFormat::Plain => Box::new(StdoutSink::new()),
            SinkFormat::Json => Box::new(JsonLinesSink::new()),
            SinkFormat::Log => Box::new(LogSink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::Symbology;

    fn code(data: &str) -> Barcode {
        Barcode {
            symbology: Symbology::Qr,
            data: data.to_string(),
        }
    }

    #[test]
    fn plain_sink_writes_payload_lines() {
        let mut sink = StdoutSink::with_writer(Vec::new());
        sink.emit(&code("hello"));
        sink.emit(&code("world"));
        assert_eq!(String::from_utf8_lossy(&sink.into_inner()), "hello\nworld\n");
    }

    #[test]
    fn json_sink_tags_symbology() -> Result<()> {
        let mut sink = JsonLinesSink::with_writer(Vec::new());
        sink.emit(&code("https://example.test/a"));
        let out = String::from_utf8(sink.into_inner())?;
        let value: serde_json::Value = serde_json::from_str(out.trim())?;
        assert_eq!(value["symbology"], "qr");
        assert_eq!(value["data"], "https://example.test/a");
        Ok(())
    }

    #[test]
    fn parses_formats() -> Result<()> {
        assert_eq!(SinkFormat::parse("JSON")?, SinkFormat::Json);
        assert_eq!(SinkFormat::parse("plain")?, SinkFormat::Plain);
        assert!(SinkFormat::parse("xml").is_err());
        Ok(())
    }
}
