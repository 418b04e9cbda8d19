//! Device-type to store-endpoint routing.

use std::collections::BTreeMap;

use crate::error::RoutingError;

/// Device types known out of the box, in CLI order.
pub const DEFAULT_DEVICE_TYPES: [&str; 4] = ["idfa", "gaid", "adid", "dvid"];

/// Immutable mapping from device type to `host:port` endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardTable {
    endpoints: BTreeMap<String, String>,
}

impl ShardTable {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            endpoints: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up the endpoint for a device type.
    pub fn route(&self, device_type: &str) -> Result<&str, RoutingError> {
        self.endpoints
            .get(device_type)
            .map(String::as_str)
            .ok_or_else(|| RoutingError::UnknownDeviceType(device_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.endpoints
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
