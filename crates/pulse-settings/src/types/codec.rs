//! Wire codec settings.

use pulse_codec::{Encryption, FrameCodec};
use pulse_core::constants::DEFAULT_SECRET_KEY;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Encryption and compression defaults for outbound frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecSettings {
    /// Default scheme for outbound frames.
    pub encryption: Encryption,
    /// Shared secret for XOR and RC4.
    pub secret_key: String,
    /// Compress outbound payloads of at least this many bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress_threshold: Option<usize>,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            encryption: Encryption::None,
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            compress_threshold: None,
        }
    }
}

impl CodecSettings {
    /// Build a [`FrameCodec`] limited to `max_payload` decoded bytes.
    pub fn build_codec(&self, max_payload: usize) -> Result<FrameCodec> {
        FrameCodec::new()
            .with_key(self.secret_key.as_bytes().to_vec())
            .and_then(|c| c.with_encryption(self.encryption))
            .map(|c| {
                c.with_compress_threshold(self.compress_threshold)
                    .with_max_payload(max_payload)
            })
            .map_err(|e| SettingsError::InvalidValue(format!("codec.secretKey: {e}")))
    }
}
