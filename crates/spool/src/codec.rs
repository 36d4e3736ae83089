//! Bundle codecs
//!
//! A bundle is one serialized sequence of values. The [`Codec`] trait is the
//! seam between the stack and the on-disk representation; [`Format`] provides
//! the two built-in encodings:
//!
//! - **json**: human-readable, one JSON array per bundle (serde_json)
//! - **bincode**: compact native binary (bincode)
//!
//! A stack picks its codec at construction and never mixes formats within a
//! root directory.

use crate::error::{CodecError, StackError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encodes and decodes whole bundles
pub trait Codec: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Serialize an ordered sequence of values into one bundle payload
    fn encode<T: Serialize>(&self, values: &[T]) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a bundle payload back into its ordered values
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Vec<T>, CodecError>;
}

/// Built-in bundle formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Structured text (JSON array)
    #[default]
    Json,
    /// Native binary (bincode)
    #[serde(alias = "binary")]
    Bincode,
}

impl Codec for Format {
    fn name(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Bincode => "bincode",
        }
    }

    fn encode<T: Serialize>(&self, values: &[T]) -> Result<Vec<u8>, CodecError> {
        match self {
            Format::Json => serde_json::to_vec(values).map_err(CodecError::from),
            Format::Bincode => bincode::serialize(values).map_err(CodecError::from),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Vec<T>, CodecError> {
        match self {
            Format::Json => serde_json::from_slice(bytes).map_err(CodecError::from),
            Format::Bincode => bincode::deserialize(bytes).map_err(CodecError::from),
        }
    }
}

impl FromStr for Format {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "bincode" | "binary" => Ok(Format::Bincode),
            other => Err(StackError::Config(format!(
                "unknown format '{}' (expected 'json' or 'bincode')",
                other
            ))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
