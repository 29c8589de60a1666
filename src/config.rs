use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ingest::{RtspTransport, TransportOptions};
use crate::recognize::{default_backend, EngineSettings, Symbology, DEFAULT_DUPLICATE_WINDOW};
use crate::sink::SinkFormat;

const DEFAULT_STREAM_URL: &str = "stub://camera";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    url: Option<String>,
    output: Option<String>,
    stream: Option<StreamConfigFile>,
    engine: Option<EngineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    rtsp_transport: Option<String>,
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    backend: Option<String>,
    license_key: Option<String>,
    symbologies: Option<Vec<String>>,
    duplicate_window_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub output: SinkFormat,
    pub stream: StreamSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub rtsp_transport: RtspTransport,
    pub http_timeout: Duration,
}

impl RelayConfig {
    /// Load from the file named by `QR_RELAY_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("QR_RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit config file (if any), then apply environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let url = file.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
        let output = match file.output.as_deref() {
            Some(output) => SinkFormat::parse(output)?,
            None => SinkFormat::default(),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            rtsp_transport: match stream_file.rtsp_transport.as_deref() {
                Some(transport) => RtspTransport::parse(transport)?,
                None => RtspTransport::Tcp,
            },
            http_timeout: Duration::from_secs(
                stream_file
                    .http_timeout_secs
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        };

        let engine_file = file.engine.unwrap_or_default();
        let symbologies = match engine_file.symbologies {
            Some(names) => parse_symbologies(names.iter().map(String::as_str))?,
            None => vec![Symbology::Qr],
        };
        let engine = EngineSettings {
            backend: engine_file
                .backend
                .unwrap_or_else(|| default_backend().to_string()),
            license_key: engine_file.license_key,
            symbologies,
            duplicate_window: engine_file
                .duplicate_window_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DUPLICATE_WINDOW),
        };

        Ok(Self {
            url,
            output,
            stream,
            engine,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("QR_RELAY_URL") {
            if !url.trim().is_empty() {
                self.url = url;
            }
        }
        if let Ok(key) = std::env::var("QR_RELAY_LICENSE_KEY") {
            if !key.trim().is_empty() {
                self.engine.license_key = Some(key);
            }
        }
        if let Ok(transport) = std::env::var("QR_RELAY_RTSP_TRANSPORT") {
            if !transport.trim().is_empty() {
                self.stream.rtsp_transport = RtspTransport::parse(&transport)?;
            }
        }
        if let Ok(engine) = std::env::var("QR_RELAY_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine.backend = engine.trim().to_string();
            }
        }
        if let Ok(symbologies) = std::env::var("QR_RELAY_SYMBOLOGIES") {
            let parsed = parse_symbologies(split_csv(&symbologies))?;
            if !parsed.is_empty() {
                self.engine.symbologies = parsed;
            }
        }
        if let Ok(window) = std::env::var("QR_RELAY_DUPLICATE_WINDOW_MS") {
            let millis: u64 = window.trim().parse().map_err(|_| {
                anyhow!("QR_RELAY_DUPLICATE_WINDOW_MS must be an integer number of milliseconds")
            })?;
            self.engine.duplicate_window = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.url = self.url.trim().to_string();
        if self.url.is_empty() {
            return Err(anyhow!("stream url must not be empty"));
        }
        if self.engine.symbologies.is_empty() {
            return Err(anyhow!("at least one symbology must be enabled"));
        }
        if self.stream.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            rtsp_transport: self.stream.rtsp_transport,
            http_timeout: self.stream.http_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_symbologies<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<Symbology>> {
    let mut parsed = Vec::new();
    for name in names {
        let symbology = Symbology::parse(name)?;
        if !parsed.contains(&symbology) {
            parsed.push(symbology);
        }
    }
    Ok(parsed)
}

fn split_csv(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .collect()
}
