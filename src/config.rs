use crate::error::{Result, SyncError};
use crate::serialization::{BinaryFormat, ValueCodec};
use crate::snapshot::SmoothingOptions;
use crate::transport::Persistence;
use std::env;

/// Defaults shared by every entity created from one [`SyncContext`](crate::entity::SyncContext).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub codec_format: BinaryFormat,
    /// Applied to properties that did not set their own send limit.
    pub default_send_limit: Option<f64>,
    /// Applied to non-discrete properties that did not enable smoothing.
    pub default_smoothing: Option<SmoothingOptions>,
    pub default_persistence: Persistence,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            codec_format: BinaryFormat::MessagePack,
            default_send_limit: None,
            default_smoothing: None,
            default_persistence: Persistence::Session,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `SYNC_KIT_FORMAT` (`json`, `msgpack`, `bincode`) and
    /// `SYNC_KIT_SENDS_PER_SECOND` over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(format) = env::var("SYNC_KIT_FORMAT") {
            config.codec_format = format.parse()?;
        }

        if let Ok(rate) = env::var("SYNC_KIT_SENDS_PER_SECOND") {
            let rate: f64 = rate.trim().parse().map_err(|_| {
                SyncError::InvalidConfig(format!("SYNC_KIT_SENDS_PER_SECOND is not a number: '{}'", rate))
            })?;
            config.default_send_limit = Some(rate);
        }

        Ok(config)
    }

    pub fn with_codec_format(mut self, format: BinaryFormat) -> Self {
        self.codec_format = format;
        self
    }

    pub fn with_send_limit(mut self, sends_per_second: Option<f64>) -> Self {
        self.default_send_limit = sends_per_second;
        self
    }

    pub fn with_smoothing(mut self, options: SmoothingOptions) -> Self {
        self.default_smoothing = Some(options);
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.default_persistence = persistence;
        self
    }

    pub fn codec(&self) -> ValueCodec {
        ValueCodec::new(self.codec_format)
    }
}
