use crate::error::{Result, SyncError};
use crate::value::{PropertyType, StorageValue};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryFormat {
    Json,
    MessagePack,
    Bincode,
}

impl FromStr for BinaryFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(BinaryFormat::Json),
            "msgpack" | "messagepack" => Ok(BinaryFormat::MessagePack),
            "bincode" => Ok(BinaryFormat::Bincode),
            other => Err(SyncError::InvalidConfig(format!("unknown codec format '{}'", other))),
        }
    }
}

/// Encodes property values into the opaque byte payloads held by a store.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    format: BinaryFormat,
}

impl ValueCodec {
    pub fn new(format: BinaryFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(BinaryFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(BinaryFormat::MessagePack)
    }

    pub fn bincode() -> Self {
        Self::new(BinaryFormat::Bincode)
    }

    pub fn encode(&self, value: &StorageValue) -> Result<Bytes> {
        match self.format {
            BinaryFormat::Json => {
                let json = serde_json::to_vec(value)?;
                Ok(Bytes::from(json))
            }
            BinaryFormat::MessagePack => {
                let msgpack = rmp_serde::to_vec(value)?;
                Ok(Bytes::from(msgpack))
            }
            BinaryFormat::Bincode => {
                let bincode_data = bincode::serialize(value)?;
                Ok(Bytes::from(bincode_data))
            }
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<StorageValue> {
        match self.format {
            BinaryFormat::Json => {
                let value = serde_json::from_slice(data)?;
                Ok(value)
            }
            BinaryFormat::MessagePack => {
                let value = rmp_serde::from_slice(data)?;
                Ok(value)
            }
            BinaryFormat::Bincode => {
                let value = bincode::deserialize(data)?;
                Ok(value)
            }
        }
    }

    /// Decodes a payload and rejects it unless it matches the declared type.
    pub fn decode_as(&self, key: &str, property_type: &PropertyType, data: &[u8]) -> Result<StorageValue> {
        let value = self.decode(data)?;
        if !value.matches_type(property_type) {
            return Err(SyncError::TypeMismatch {
                key: key.to_string(),
                expected: property_type.to_string(),
                actual: value.type_name(),
            });
        }
        Ok(value)
    }

    pub fn format(&self) -> BinaryFormat {
        self.format
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::messagepack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PackedTransform;
    use glam::{Mat4, Quat, Vec3};

    fn sample_values() -> Vec<StorageValue> {
        vec![
            StorageValue::Bool(true),
            StorageValue::Int(-42),
            StorageValue::Double(0.125),
            StorageValue::String("hello".to_string()),
            StorageValue::Quat(Quat::from_rotation_x(0.5)),
            StorageValue::Mat4(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))),
            StorageValue::PackedTransform(PackedTransform::new(
                Vec3::ONE,
                Quat::from_rotation_y(1.0),
                Vec3::splat(2.0),
            )),
            StorageValue::from(vec![Vec3::X, Vec3::Y]),
        ]
    }

    #[test]
    fn test_every_format_preserves_values() {
        for codec in [ValueCodec::json(), ValueCodec::messagepack(), ValueCodec::bincode()] {
            for value in sample_values() {
                let bytes = codec.encode(&value).unwrap();
                let decoded = codec.decode(&bytes).unwrap();
                assert_eq!(decoded, value, "format {:?}", codec.format());
            }
        }
    }

    #[test]
    fn test_decode_as_rejects_wrong_type() {
        let codec = ValueCodec::default();
        let bytes = codec.encode(&StorageValue::Float(1.0)).unwrap();

        assert!(codec.decode_as("speed", &PropertyType::float(), &bytes).is_ok());

        let err = codec.decode_as("speed", &PropertyType::vec3(), &bytes).unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { .. }));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<BinaryFormat>().unwrap(), BinaryFormat::Json);
        assert_eq!("msgpack".parse::<BinaryFormat>().unwrap(), BinaryFormat::MessagePack);
        assert!("xml".parse::<BinaryFormat>().is_err());
    }
}
