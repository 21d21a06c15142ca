use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::relay::StagingMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub relay: RelayConfig,
    pub staging: StagingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
    /// Browser origin allowed by CORS ("*" for any)
    pub allowed_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Processing service endpoint receiving the forwarded multipart upload
    pub downstream_url: String,
    /// Multipart field carrying the recording, inbound and outbound
    pub field_name: String,
    pub timeout_secs: u64,
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    pub mode: StagingMode,
    pub dir: PathBuf,
    /// Largest accepted payload, per upload
    pub max_bytes: u64,
}

impl Config {
    /// Defaults, then `path` (any format the config crate knows, optional),
    /// then `SUMMORA_*` environment variables, e.g. `SUMMORA_RELAY__DOWNSTREAM_URL`.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "summora-gateway")?
            .set_default("service.http.bind", "0.0.0.0")?
            .set_default("service.http.port", 3001_i64)?
            .set_default("service.allowed_origin", "http://localhost:3000")?
            .set_default("relay.downstream_url", "http://localhost:5000/process-video")?
            .set_default("relay.field_name", "recording")?
            .set_default("relay.timeout_secs", 300_i64)?
            .set_default("staging.mode", "disk")?
            .set_default("staging.dir", "temp_uploads")?
            .set_default("staging.max_bytes", 512_i64 * 1024 * 1024)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SUMMORA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}
