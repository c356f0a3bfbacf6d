// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use entman_app::{
    BulkFailure, BulkOutcome, DeviceGroup, DeviceId, DeviceInfo, EntityId, EntityRecord, Gateway,
    GatewayError, IntegrationGroup, NO_DEVICE, RegistryEntry, RemovalOutcome, StateFilter,
};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

const INTEGRATIONS: [(&str, &[&str]); 7] = [
    ("hue", &["light", "sensor"]),
    ("zha", &["switch", "sensor", "binary_sensor"]),
    ("mqtt", &["sensor", "switch"]),
    ("esphome", &["sensor", "switch", "button"]),
    ("shelly", &["switch", "sensor"]),
    ("cast", &["media_player"]),
    ("met", &["weather"]),
];

const ROOMS: [&str; 12] = [
    "Living Room",
    "Bedroom",
    "Kitchen",
    "Office",
    "Garage",
    "Hallway",
    "Basement",
    "Porch",
    "Attic",
    "Laundry",
    "Nursery",
    "Patio",
];

const DEVICE_KINDS: [&str; 8] = [
    "Lamp",
    "Plug",
    "Multisensor",
    "Bridge",
    "Thermostat",
    "Speaker",
    "Relay",
    "Motion Sensor",
];

const ENTITY_SUFFIXES: [&str; 8] = [
    "power",
    "energy",
    "temperature",
    "humidity",
    "battery",
    "signal_strength",
    "illuminance",
    "status",
];

const DISABLED_BY: [&str; 2] = ["user", "integration"];

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn chance(&mut self, one_in: usize) -> bool {
        self.int_n(one_in) == 0
    }
}

/// A generated installation: entity groups plus the matching device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoInstall {
    pub groups: Vec<IntegrationGroup>,
    pub devices: Vec<DeviceInfo>,
}

impl DemoInstall {
    pub fn entity_count(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.entity_ids().len())
            .sum()
    }
}

/// Seeded generator for believable Home Assistant installs.
#[derive(Debug, Clone)]
pub struct InstallFaker {
    rng: DeterministicRng,
    next_device: usize,
}

impl InstallFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            next_device: 0,
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn install(&mut self) -> DemoInstall {
        let mut groups = Vec::with_capacity(INTEGRATIONS.len());
        let mut devices = Vec::new();
        for (integration, domains) in INTEGRATIONS {
            let group = self.integration(integration, domains, &mut devices);
            groups.push(group);
        }
        DemoInstall { groups, devices }
    }

    fn integration(
        &mut self,
        integration: &str,
        domains: &[&str],
        registry: &mut Vec<DeviceInfo>,
    ) -> IntegrationGroup {
        let mut devices = Vec::new();
        if integration == "met" {
            let mut hourly = EntityRecord::new("weather.forecast_home_hourly", true)
                .with_name("Forecast Home (hourly)");
            hourly.disabled_by = Some("integration".to_owned());
            devices.push(DeviceGroup {
                device_id: DeviceId::no_device(),
                name: None,
                entities: vec![
                    EntityRecord::new("weather.forecast_home", false).with_name("Forecast Home"),
                    hourly,
                ],
            });
            return IntegrationGroup {
                integration: integration.to_owned(),
                devices,
            };
        }

        let device_count = 1 + self.rng.int_n(4);
        for _ in 0..device_count {
            self.next_device += 1;
            let room = self.pick(&ROOMS);
            let kind = self.pick(&DEVICE_KINDS);
            let device_id = DeviceId::new(format!(
                "{:016x}{:04x}",
                self.rng.next_u64(),
                self.next_device
            ));
            let name = format!("{room} {kind}");
            let name_by_user = self
                .rng
                .chance(5)
                .then(|| format!("{room} {}", self.pick(&DEVICE_KINDS)));
            registry.push(DeviceInfo {
                id: device_id.clone(),
                name: Some(name.clone()),
                name_by_user,
            });

            let slug = slugify(&format!("{room} {kind}"));
            let entity_count = 1 + self.rng.int_n(4);
            let offset = self.rng.int_n(ENTITY_SUFFIXES.len());
            let mut entities = Vec::with_capacity(entity_count);
            for index in 0..entity_count {
                let domain = domains[self.rng.int_n(domains.len())];
                let suffix = ENTITY_SUFFIXES[(offset + index) % ENTITY_SUFFIXES.len()];
                let entity_id = format!("{domain}.{slug}_{suffix}_{}", self.next_device);
                let disabled = self.rng.chance(4);
                let mut entity = EntityRecord::new(entity_id, disabled)
                    .with_name(format!("{name} {}", title_case(suffix)));
                if disabled {
                    entity.disabled_by = Some(self.pick(&DISABLED_BY).to_owned());
                } else {
                    entity.state = Some("on".to_owned());
                }
                entities.push(entity);
            }

            devices.push(DeviceGroup {
                device_id,
                name: Some(name),
                entities,
            });
        }

        IntegrationGroup {
            integration: integration.to_owned(),
            devices,
        }
    }

    fn pick<'a>(&mut self, values: &[&'a str]) -> &'a str {
        values[self.rng.int_n(values.len())]
    }
}

fn slugify(value: &str) -> String {
    value
        .to_ascii_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn title_case(value: &str) -> String {
    value
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `hue` with one device holding `light.living_room` (enabled) and
/// `light.bedroom` (disabled).
pub fn hue_fixture() -> Vec<IntegrationGroup> {
    vec![IntegrationGroup {
        integration: "hue".to_owned(),
        devices: vec![DeviceGroup {
            device_id: DeviceId::new("device_1"),
            name: None,
            entities: vec![
                EntityRecord::new("light.living_room", false).with_name("Living Room"),
                EntityRecord::new("light.bedroom", true).with_name("Bedroom"),
            ],
        }],
    }]
}

/// Three integrations, one of them with entities outside any device.
pub fn mixed_fixture() -> Vec<IntegrationGroup> {
    let mut groups = hue_fixture();
    groups.push(IntegrationGroup {
        integration: "zha".to_owned(),
        devices: vec![
            DeviceGroup {
                device_id: DeviceId::new("zha_plug"),
                name: Some("Garage Plug".to_owned()),
                entities: vec![
                    EntityRecord::new("switch.garage_plug", false).with_name("Garage Plug"),
                    EntityRecord::new("sensor.garage_plug_power", true)
                        .with_name("Garage Plug Power"),
                ],
            },
            DeviceGroup {
                device_id: DeviceId::new("zha_motion"),
                name: Some("Hallway Motion".to_owned()),
                entities: vec![
                    EntityRecord::new("binary_sensor.hallway_motion", false)
                        .with_name("Hallway Motion"),
                ],
            },
        ],
    });
    groups.push(IntegrationGroup {
        integration: "mqtt".to_owned(),
        devices: vec![DeviceGroup {
            device_id: DeviceId::new(NO_DEVICE),
            name: None,
            entities: vec![
                EntityRecord::new("sensor.outdoor_temperature", false)
                    .with_name("Outdoor Temperature"),
                EntityRecord::new("sensor.outdoor_humidity", true).with_name("Outdoor Humidity"),
            ],
        }],
    });
    groups
}

pub fn fixture_devices() -> Vec<DeviceInfo> {
    vec![
        DeviceInfo {
            id: DeviceId::new("device_1"),
            name: Some("Hue Bridge".to_owned()),
            name_by_user: Some("Upstairs Lights".to_owned()),
        },
        DeviceInfo {
            id: DeviceId::new("zha_plug"),
            name: Some("Smart Plug".to_owned()),
            name_by_user: None,
        },
    ]
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("entman.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> &'static str {
    "2026-02-19T12:34:56Z"
}

/// One recorded call against [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    FetchEntities(StateFilter),
    FetchDeviceRegistry,
    Enable(EntityId),
    Disable(EntityId),
    BulkEnable(Vec<EntityId>),
    BulkDisable(Vec<EntityId>),
    Rename { old: EntityId, new: EntityId },
    SetDisplayName { entity_id: EntityId, name: Option<String> },
    Remove(EntityId),
    ExportStates,
}

impl GatewayCall {
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::FetchEntities(_))
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::FetchEntities(_) | Self::FetchDeviceRegistry | Self::ExportStates
        )
    }
}

/// In-memory host that applies mutations to its own dataset and records
/// every call. Also backs the `--demo` mode of the CLI.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    groups: Vec<IntegrationGroup>,
    devices: Vec<DeviceInfo>,
    calls: Vec<GatewayCall>,
    failures: VecDeque<GatewayError>,
    rejected: BTreeSet<EntityId>,
    yaml_defined: BTreeSet<EntityId>,
    registry_error: Option<GatewayError>,
}

impl MemoryGateway {
    pub fn new(groups: Vec<IntegrationGroup>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    pub fn demo(seed: u64) -> Self {
        let install = InstallFaker::new(seed).install();
        Self::new(install.groups).with_devices(install.devices)
    }

    /// The next call fails with `error` before touching any state.
    pub fn fail_next(&mut self, error: GatewayError) {
        self.failures.push_back(error);
    }

    /// Bulk calls report `entity_id` as failed; single calls reject it.
    pub fn reject_entity(&mut self, entity_id: impl Into<EntityId>) {
        self.rejected.insert(entity_id.into());
    }

    /// Removing `entity_id` succeeds but warns that it comes back on restart.
    pub fn mark_yaml_defined(&mut self, entity_id: impl Into<EntityId>) {
        self.yaml_defined.insert(entity_id.into());
    }

    pub fn fail_device_registry(&mut self, error: GatewayError) {
        self.registry_error = Some(error);
    }

    pub fn calls(&self) -> &[GatewayCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.iter().filter(|call| call.is_fetch()).count()
    }

    pub fn mutation_count(&self) -> usize {
        self.calls.iter().filter(|call| call.is_mutation()).count()
    }

    pub fn groups(&self) -> &[IntegrationGroup] {
        &self.groups
    }

    pub fn entity(&self, entity_id: &EntityId) -> Option<&EntityRecord> {
        self.groups
            .iter()
            .flat_map(|group| group.devices.iter())
            .flat_map(|device| device.entities.iter())
            .find(|entity| &entity.entity_id == entity_id)
    }

    fn entity_mut(&mut self, entity_id: &EntityId) -> Option<&mut EntityRecord> {
        self.groups
            .iter_mut()
            .flat_map(|group| group.devices.iter_mut())
            .flat_map(|device| device.entities.iter_mut())
            .find(|entity| &entity.entity_id == entity_id)
    }

    fn scripted_failure(&mut self) -> Result<(), GatewayError> {
        match self.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn set_disabled(&mut self, entity_id: &EntityId, disabled: bool) -> Result<(), GatewayError> {
        if self.rejected.contains(entity_id) {
            return Err(rejected(entity_id));
        }
        let Some(entity) = self.entity_mut(entity_id) else {
            return Err(not_found(entity_id));
        };
        entity.is_disabled = disabled;
        entity.disabled_by = disabled.then(|| "user".to_owned());
        entity.state = (!disabled).then(|| "on".to_owned());
        Ok(())
    }

    fn set_many(&mut self, entity_ids: &[EntityId], disabled: bool) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for entity_id in entity_ids {
            match self.set_disabled(entity_id, disabled) {
                Ok(()) => outcome.succeeded.push(entity_id.clone()),
                Err(error) => outcome.failed.push(BulkFailure {
                    entity_id: entity_id.clone(),
                    error: Some(error.to_string()),
                }),
            }
        }
        outcome
    }
}

fn rejected(entity_id: &EntityId) -> GatewayError {
    GatewayError::Rejected {
        code: "home_assistant_error".to_owned(),
        message: format!("cannot change {entity_id}"),
    }
}

fn not_found(entity_id: &EntityId) -> GatewayError {
    GatewayError::Rejected {
        code: "not_found".to_owned(),
        message: format!("Entity not found: {entity_id}"),
    }
}

impl Gateway for MemoryGateway {
    fn fetch_entities(
        &mut self,
        state: StateFilter,
    ) -> Result<Vec<IntegrationGroup>, GatewayError> {
        self.calls.push(GatewayCall::FetchEntities(state));
        self.scripted_failure()?;
        Ok(self
            .groups
            .iter()
            .filter_map(|group| {
                let devices: Vec<DeviceGroup> = group
                    .devices
                    .iter()
                    .filter_map(|device| {
                        let entities: Vec<EntityRecord> = device
                            .entities
                            .iter()
                            .filter(|entity| state.admits(entity.is_disabled))
                            .cloned()
                            .collect();
                        (!entities.is_empty()).then(|| DeviceGroup {
                            device_id: device.device_id.clone(),
                            name: device.name.clone(),
                            entities,
                        })
                    })
                    .collect();
                (!devices.is_empty()).then(|| IntegrationGroup {
                    integration: group.integration.clone(),
                    devices,
                })
            })
            .collect())
    }

    fn fetch_device_registry(&mut self) -> Result<Vec<DeviceInfo>, GatewayError> {
        self.calls.push(GatewayCall::FetchDeviceRegistry);
        match &self.registry_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.devices.clone()),
        }
    }

    fn enable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Enable(entity_id.clone()));
        self.scripted_failure()?;
        self.set_disabled(entity_id, false)
    }

    fn disable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Disable(entity_id.clone()));
        self.scripted_failure()?;
        self.set_disabled(entity_id, true)
    }

    fn bulk_enable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        self.calls.push(GatewayCall::BulkEnable(entity_ids.to_vec()));
        self.scripted_failure()?;
        Ok(self.set_many(entity_ids, false))
    }

    fn bulk_disable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        self.calls.push(GatewayCall::BulkDisable(entity_ids.to_vec()));
        self.scripted_failure()?;
        Ok(self.set_many(entity_ids, true))
    }

    fn rename(&mut self, old: &EntityId, new: &EntityId) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Rename {
            old: old.clone(),
            new: new.clone(),
        });
        self.scripted_failure()?;
        if self.entity(new).is_some() {
            return Err(GatewayError::Rejected {
                code: "invalid_info".to_owned(),
                message: format!("Entity with this ID is already registered: {new}"),
            });
        }
        let Some(entity) = self.entity_mut(old) else {
            return Err(not_found(old));
        };
        entity.entity_id = new.clone();
        Ok(())
    }

    fn set_display_name(
        &mut self,
        entity_id: &EntityId,
        name: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::SetDisplayName {
            entity_id: entity_id.clone(),
            name: name.map(str::to_owned),
        });
        self.scripted_failure()?;
        let Some(entity) = self.entity_mut(entity_id) else {
            return Err(not_found(entity_id));
        };
        if let Some(name) = name {
            entity.original_name = Some(name.to_owned());
        }
        Ok(())
    }

    fn remove_entity(&mut self, entity_id: &EntityId) -> Result<RemovalOutcome, GatewayError> {
        self.calls.push(GatewayCall::Remove(entity_id.clone()));
        self.scripted_failure()?;
        if self.entity(entity_id).is_none() {
            return Err(GatewayError::Rejected {
                code: "not_found".to_owned(),
                message: format!("Entity {entity_id} not found"),
            });
        }
        for group in &mut self.groups {
            for device in &mut group.devices {
                device.entities.retain(|entity| &entity.entity_id != entity_id);
            }
            group.devices.retain(|device| !device.entities.is_empty());
        }
        self.groups.retain(|group| !group.devices.is_empty());

        let yaml = self.yaml_defined.contains(entity_id);
        Ok(RemovalOutcome {
            removed_config_entry: !yaml,
            warning: yaml.then(|| {
                "This entity is defined in YAML and will return after the next HA restart."
                    .to_owned()
            }),
        })
    }

    fn export_states(&mut self) -> Result<Vec<RegistryEntry>, GatewayError> {
        self.calls.push(GatewayCall::ExportStates);
        self.scripted_failure()?;
        let mut entries: Vec<RegistryEntry> = self
            .groups
            .iter()
            .flat_map(|group| {
                group.devices.iter().flat_map(move |device| {
                    device.entities.iter().map(move |entity| RegistryEntry {
                        entity_id: entity.entity_id.clone(),
                        platform: group.integration.clone(),
                        device_id: (!device.device_id.is_no_device())
                            .then(|| device.device_id.clone()),
                        disabled_by: entity.disabled_by.clone(),
                        is_disabled: entity.is_disabled,
                        original_name: entity.original_name.clone(),
                        entity_category: entity.entity_category.clone(),
                    })
                })
            })
            .collect();
        entries.sort_by(|left, right| left.entity_id.cmp(&right.entity_id));
        Ok(entries)
    }
}
