// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use entman_app::{
    BulkFailure, BulkOutcome, DeviceGroup, DeviceId, EntityId, EntityRecord, IntegrationGroup,
};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Incoming {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Auth<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub access_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireIntegration {
    pub integration: String,
    #[serde(default, deserialize_with = "ordered_devices")]
    pub devices: Vec<(String, WireDevice)>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDevice {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
}

impl From<WireIntegration> for IntegrationGroup {
    fn from(wire: WireIntegration) -> Self {
        Self {
            integration: wire.integration,
            devices: wire
                .devices
                .into_iter()
                .map(|(key, device)| DeviceGroup {
                    device_id: DeviceId::new(key),
                    name: device.name,
                    entities: device.entities,
                })
                .collect(),
        }
    }
}

// serde_json sorts object keys unless `preserve_order` is on, so the device
// map is read entry by entry to keep the host's order.
fn ordered_devices<'de, D>(deserializer: D) -> Result<Vec<(String, WireDevice)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DeviceMap;

    impl<'de> Visitor<'de> for DeviceMap {
        type Value = Vec<(String, WireDevice)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an object keyed by device id")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut devices = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, WireDevice>()? {
                devices.push(entry);
            }
            Ok(devices)
        }
    }

    deserializer.deserialize_map(DeviceMap)
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBulkResult {
    #[serde(default)]
    pub success: Vec<EntityId>,
    #[serde(default)]
    pub failed: Vec<WireFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireFailure {
    Id(EntityId),
    Detailed {
        entity_id: EntityId,
        #[serde(default)]
        error: Option<String>,
    },
}

impl From<WireBulkResult> for BulkOutcome {
    fn from(wire: WireBulkResult) -> Self {
        Self {
            succeeded: wire.success,
            failed: wire
                .failed
                .into_iter()
                .map(|failure| match failure {
                    WireFailure::Id(entity_id) => BulkFailure {
                        entity_id,
                        error: None,
                    },
                    WireFailure::Detailed { entity_id, error } => BulkFailure { entity_id, error },
                })
                .collect(),
        }
    }
}
