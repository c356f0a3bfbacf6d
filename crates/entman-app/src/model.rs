// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    #[default]
    All,
    Enabled,
    Disabled,
}

impl StateFilter {
    pub const ALL: [Self; 3] = [Self::All, Self::Enabled, Self::Disabled];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub const fn next(self) -> Self {
        match self {
            Self::All => Self::Enabled,
            Self::Enabled => Self::Disabled,
            Self::Disabled => Self::All,
        }
    }

    pub const fn admits(self, is_disabled: bool) -> bool {
        match self {
            Self::All => true,
            Self::Enabled => !is_disabled,
            Self::Disabled => is_disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: EntityId,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
}

impl EntityRecord {
    pub fn new(entity_id: impl Into<EntityId>, is_disabled: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            original_name: None,
            is_disabled,
            state: None,
            disabled_by: None,
            entity_category: None,
            area_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub device_id: DeviceId,
    /// Name the host attached to the group, if any.
    pub name: Option<String>,
    pub entities: Vec<EntityRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationGroup {
    pub integration: String,
    /// Keyed by `device_id`; host order is kept.
    pub devices: Vec<DeviceGroup>,
}

impl IntegrationGroup {
    pub fn device(&self, device_id: &DeviceId) -> Option<&DeviceGroup> {
        self.devices
            .iter()
            .find(|device| &device.device_id == device_id)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.devices
            .iter()
            .flat_map(|device| device.entities.iter())
            .map(|entity| entity.entity_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_by_user: Option<String>,
}

/// Device registry lookup used for display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDirectory {
    devices: HashMap<DeviceId, DeviceInfo>,
}

impl DeviceDirectory {
    pub fn new(devices: impl IntoIterator<Item = DeviceInfo>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| (device.id.clone(), device))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn display_name(&self, device_id: &DeviceId, host_name: Option<&str>) -> String {
        let info = self.devices.get(device_id);
        info.and_then(|info| non_blank(info.name_by_user.as_deref()))
            .or_else(|| info.and_then(|info| non_blank(info.name.as_deref())))
            .or_else(|| non_blank(host_name))
            .unwrap_or(device_id.as_str())
            .to_owned()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub entity_id: EntityId,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: Vec<EntityId>,
    pub failed: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

/// Answer to a registry removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    #[serde(default)]
    pub removed_config_entry: bool,
    /// Set when the entity is defined in YAML and comes back after a restart.
    #[serde(default)]
    pub warning: Option<String>,
}

/// One registry row of a state export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub entity_id: EntityId,
    #[serde(default = "unknown_platform")]
    pub platform: String,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub disabled_by: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
}

fn unknown_platform() -> String {
    "unknown".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    pub old: EntityId,
    pub new: EntityId,
}

impl RenamePair {
    pub fn new(old: impl Into<EntityId>, new: impl Into<EntityId>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn swapped(&self) -> Self {
        Self {
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: String,
    pub text: String,
}

/// User-facing toast raised by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: &str, text: &str) -> Self {
        self.action = Some(NotificationAction {
            action: action.to_owned(),
            text: text.to_owned(),
        });
        self
    }
}
