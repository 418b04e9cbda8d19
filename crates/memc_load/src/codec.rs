//! Payload encoding for stored records.
//!
//! The value stored under `{device_type}:{device_id}` is a protobuf `UserApps`
//! message holding the coordinates and the app list; identity lives in the key.

use prost::Message;

use crate::error::CodecError;
use crate::record::Record;

/// Wire message for one device's installed apps.
///
/// ```text
/// message UserApps {
///   repeated uint32 apps = 1 [packed = true];
///   optional double lat = 2;
///   optional double lon = 3;
/// }
/// ```
#[derive(Clone, PartialEq, Message)]
pub struct UserApps {
    #[prost(uint32, repeated, tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl From<&Record> for UserApps {
    fn from(record: &Record) -> Self {
        Self {
            apps: record.apps.clone(),
            lat: Some(record.lat),
            lon: Some(record.lon),
        }
    }
}

pub fn encode_payload(record: &Record) -> Vec<u8> {
    UserApps::from(record).encode_to_vec()
}

pub fn decode_payload(data: &[u8]) -> Result<UserApps, CodecError> {
    Ok(UserApps::decode(data)?)
}
