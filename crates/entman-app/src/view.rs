// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::*;
use crate::model::*;

/// Label of the implicit "no domain filter" option.
pub const ALL_DOMAINS: &str = "all";

static NO_FAVORITES: BTreeSet<EntityId> = BTreeSet::new();
static NO_TAGS: BTreeMap<EntityId, Vec<String>> = BTreeMap::new();

/// Raw registry snapshot from the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    groups: Vec<IntegrationGroup>,
    devices: DeviceDirectory,
}

impl Dataset {
    pub fn new(groups: Vec<IntegrationGroup>) -> Self {
        Self {
            groups,
            devices: DeviceDirectory::default(),
        }
    }

    pub fn with_devices(mut self, devices: DeviceDirectory) -> Self {
        self.devices = devices;
        self
    }

    pub fn groups(&self) -> &[IntegrationGroup] {
        &self.groups
    }

    pub fn devices(&self) -> &DeviceDirectory {
        &self.devices
    }

    pub fn integration(&self, name: &str) -> Option<&IntegrationGroup> {
        self.groups.iter().find(|group| group.integration == name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.groups
            .iter()
            .flat_map(|group| group.devices.iter())
            .flat_map(|device| device.entities.iter())
    }

    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.entities()
            .map(|entity| entity.entity_id.clone())
            .collect()
    }

    pub fn find(&self, entity_id: &EntityId) -> Option<&EntityRecord> {
        self.entities().find(|entity| &entity.entity_id == entity_id)
    }

    /// `"all"` followed by the sorted distinct domains of every entity.
    pub fn domain_options(&self) -> Vec<String> {
        let domains: BTreeSet<&str> = self
            .entities()
            .filter_map(|entity| entity.entity_id.domain())
            .collect();
        std::iter::once(ALL_DOMAINS)
            .chain(domains)
            .map(str::to_owned)
            .collect()
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.entities()
            .any(|entity| entity.entity_id.domain() == Some(domain))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub search_term: String,
    pub view_state: StateFilter,
    /// `None` means every domain.
    pub domain: Option<String>,
    pub favorites_only: bool,
    pub tag: Option<String>,
}

impl Filters {
    pub fn domain_label(&self) -> &str {
        self.domain.as_deref().unwrap_or(ALL_DOMAINS)
    }
}

/// Per-entity marks consulted by the favorites and tag predicates.
#[derive(Debug, Clone, Copy)]
pub struct EntityMarks<'a> {
    pub favorites: &'a BTreeSet<EntityId>,
    pub tags: &'a BTreeMap<EntityId, Vec<String>>,
}

impl EntityMarks<'static> {
    pub fn none() -> Self {
        Self {
            favorites: &NO_FAVORITES,
            tags: &NO_TAGS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewCounts {
    pub integrations: usize,
    pub devices: usize,
    pub entities: usize,
    pub enabled: usize,
    pub disabled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDevice {
    pub device_id: DeviceId,
    pub name: String,
    pub entities: Vec<EntityRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewIntegration {
    pub integration: String,
    pub devices: Vec<ViewDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelView {
    pub integrations: Vec<ViewIntegration>,
    pub counts: ViewCounts,
    pub domain_options: Vec<String>,
    /// Domain filter actually applied after falling back from unknown domains.
    pub domain: Option<String>,
}

impl PanelView {
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.integrations
            .iter()
            .flat_map(|integration| integration.devices.iter())
            .flat_map(|device| device.entities.iter())
            .map(|entity| entity.entity_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

/// Filters and groups `dataset` without reordering anything.
pub fn compute_view(dataset: &Dataset, filters: &Filters, marks: &EntityMarks<'_>) -> PanelView {
    let domain_options = dataset.domain_options();
    let domain = filters
        .domain
        .as_deref()
        .filter(|domain| *domain != ALL_DOMAINS)
        .filter(|domain| domain_options.iter().any(|option| option == domain));
    let needle = filters.search_term.to_lowercase();

    let mut integrations = Vec::new();
    let mut counts = ViewCounts::default();

    for group in dataset.groups() {
        let integration_key = group.integration.to_lowercase();
        let mut devices = Vec::new();

        for device in &group.devices {
            let name = dataset
                .devices()
                .display_name(&device.device_id, device.name.as_deref());
            let name_key = name.to_lowercase();

            let entities: Vec<EntityRecord> = device
                .entities
                .iter()
                .filter(|entity| domain.is_none_or(|domain| entity.entity_id.has_domain(domain)))
                .filter(|entity| filters.view_state.admits(entity.is_disabled))
                .filter(|entity| {
                    needle.is_empty()
                        || entity_matches_search(entity, &needle, &integration_key, &name_key)
                })
                .filter(|entity| !filters.favorites_only || marks.favorites.contains(&entity.entity_id))
                .filter(|entity| {
                    filters.tag.as_deref().is_none_or(|tag| {
                        marks
                            .tags
                            .get(&entity.entity_id)
                            .is_some_and(|tags| tags.iter().any(|candidate| candidate == tag))
                    })
                })
                .cloned()
                .collect();

            if entities.is_empty() {
                continue;
            }

            for entity in &entities {
                if entity.is_disabled {
                    counts.disabled += 1;
                } else {
                    counts.enabled += 1;
                }
            }
            counts.entities += entities.len();
            devices.push(ViewDevice {
                device_id: device.device_id.clone(),
                name,
                entities,
            });
        }

        if devices.is_empty() {
            continue;
        }
        counts.devices += devices.len();
        integrations.push(ViewIntegration {
            integration: group.integration.clone(),
            devices,
        });
    }
    counts.integrations = integrations.len();

    PanelView {
        integrations,
        counts,
        domain_options,
        domain: domain.map(str::to_owned),
    }
}

fn entity_matches_search(
    entity: &EntityRecord,
    needle: &str,
    integration_key: &str,
    device_key: &str,
) -> bool {
    entity.entity_id.as_str().to_lowercase().contains(needle)
        || entity
            .original_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(needle))
        || integration_key.contains(needle)
        || device_key.contains(needle)
}

#[cfg(test)]
mod tests {
    use super::{Dataset, EntityMarks, Filters, compute_view};
    use crate::{
        DeviceDirectory, DeviceGroup, DeviceId, DeviceInfo, EntityId, EntityRecord,
        IntegrationGroup, StateFilter,
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn hue_dataset() -> Dataset {
        Dataset::new(vec![IntegrationGroup {
            integration: "hue".to_owned(),
            devices: vec![DeviceGroup {
                device_id: DeviceId::new("device_1"),
                name: None,
                entities: vec![
                    EntityRecord::new("light.living_room", false).with_name("Living Room"),
                    EntityRecord::new("light.bedroom", true).with_name("Bedroom"),
                ],
            }],
        }])
    }

    fn mixed_dataset() -> Dataset {
        Dataset::new(vec![
            IntegrationGroup {
                integration: "zha".to_owned(),
                devices: vec![
                    DeviceGroup {
                        device_id: DeviceId::new("plug_1"),
                        name: Some("Desk plug".to_owned()),
                        entities: vec![
                            EntityRecord::new("switch.desk", false),
                            EntityRecord::new("sensor.desk_power", true),
                        ],
                    },
                    DeviceGroup {
                        device_id: DeviceId::new("motion_1"),
                        name: None,
                        entities: vec![EntityRecord::new("binary_sensor.hall_motion", false)],
                    },
                ],
            },
            IntegrationGroup {
                integration: "mqtt".to_owned(),
                devices: vec![DeviceGroup {
                    device_id: DeviceId::no_device(),
                    name: None,
                    entities: vec![
                        EntityRecord::new("sensor.outdoor_temp", false),
                        EntityRecord::new("sensor.outdoor_humidity", true),
                    ],
                }],
            },
        ])
    }

    fn filters() -> Filters {
        Filters::default()
    }

    #[test]
    fn disabled_view_keeps_only_disabled_entities() {
        let view = compute_view(
            &hue_dataset(),
            &Filters {
                view_state: StateFilter::Disabled,
                ..filters()
            },
            &EntityMarks::none(),
        );

        assert_eq!(view.integrations.len(), 1);
        assert_eq!(view.integrations[0].integration, "hue");
        assert_eq!(view.integrations[0].devices.len(), 1);
        assert_eq!(
            view.integrations[0].devices[0].device_id,
            DeviceId::new("device_1")
        );
        assert_eq!(view.entity_ids(), vec![EntityId::new("light.bedroom")]);
        assert_eq!(view.counts.enabled, 0);
        assert_eq!(view.counts.disabled, 1);
    }

    #[test]
    fn search_matches_original_name_case_insensitively() {
        let view = compute_view(
            &hue_dataset(),
            &Filters {
                search_term: "LIVING".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(view.entity_ids(), vec![EntityId::new("light.living_room")]);
    }

    #[test]
    fn search_matches_integration_and_device_name() {
        let dataset = mixed_dataset();

        let by_integration = compute_view(
            &dataset,
            &Filters {
                search_term: "mqt".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(by_integration.counts.entities, 2);

        let by_device = compute_view(
            &dataset,
            &Filters {
                search_term: "desk plug".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(
            by_device.entity_ids(),
            vec![EntityId::new("switch.desk"), EntityId::new("sensor.desk_power")]
        );
    }

    #[test]
    fn search_matches_the_raw_no_device_id() {
        let dataset = Dataset::new(vec![IntegrationGroup {
            integration: "template".to_owned(),
            devices: vec![DeviceGroup {
                device_id: DeviceId::no_device(),
                name: None,
                entities: vec![EntityRecord::new("sensor.loose", false)],
            }],
        }]);
        let view = compute_view(
            &dataset,
            &Filters {
                search_term: "no_device".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(view.counts.entities, 1);
        assert_eq!(view.entity_ids(), vec![EntityId::new("sensor.loose")]);
        assert_eq!(view.integrations[0].devices[0].name, "no_device");
    }

    #[test]
    fn search_uses_registry_device_name_over_host_name() {
        let dataset = mixed_dataset().with_devices(DeviceDirectory::new([DeviceInfo {
            id: DeviceId::new("motion_1"),
            name: Some("Aqara motion".to_owned()),
            name_by_user: Some("Hallway sensor".to_owned()),
        }]));
        let view = compute_view(
            &dataset,
            &Filters {
                search_term: "hallway".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(
            view.entity_ids(),
            vec![EntityId::new("binary_sensor.hall_motion")]
        );
        assert_eq!(view.integrations[0].devices[0].name, "Hallway sensor");
    }

    #[test]
    fn domain_filter_requires_prefix_with_dot() {
        let view = compute_view(
            &mixed_dataset(),
            &Filters {
                domain: Some("sensor".to_owned()),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(
            view.entity_ids(),
            vec![
                EntityId::new("sensor.desk_power"),
                EntityId::new("sensor.outdoor_temp"),
                EntityId::new("sensor.outdoor_humidity"),
            ]
        );
        assert_eq!(view.counts.devices, 2);
        assert_eq!(view.counts.integrations, 2);
    }

    #[test]
    fn unknown_domain_falls_back_to_all() {
        let view = compute_view(
            &mixed_dataset(),
            &Filters {
                domain: Some("climate".to_owned()),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(view.domain, None);
        assert_eq!(view.counts.entities, 5);
    }

    #[test]
    fn empty_devices_and_integrations_are_dropped() {
        let view = compute_view(
            &mixed_dataset(),
            &Filters {
                view_state: StateFilter::Disabled,
                domain: Some("switch".to_owned()),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert!(view.is_empty());
        assert_eq!(view.counts.integrations, 0);
        assert_eq!(view.counts.entities, 0);
    }

    #[test]
    fn filtering_preserves_host_order() {
        let view = compute_view(
            &mixed_dataset(),
            &Filters {
                view_state: StateFilter::Enabled,
                ..filters()
            },
            &EntityMarks::none(),
        );
        let integrations: Vec<&str> = view
            .integrations
            .iter()
            .map(|integration| integration.integration.as_str())
            .collect();
        assert_eq!(integrations, vec!["zha", "mqtt"]);
        assert_eq!(
            view.entity_ids(),
            vec![
                EntityId::new("switch.desk"),
                EntityId::new("binary_sensor.hall_motion"),
                EntityId::new("sensor.outdoor_temp"),
            ]
        );
    }

    #[test]
    fn compute_view_is_idempotent() {
        let dataset = mixed_dataset();
        let filters = Filters {
            search_term: "desk".to_owned(),
            ..filters()
        };
        let first = compute_view(&dataset, &filters, &EntityMarks::none());
        let second = compute_view(&dataset, &filters, &EntityMarks::none());
        assert_eq!(first, second);
    }

    #[test]
    fn domain_options_come_from_unfiltered_data() {
        let view = compute_view(
            &mixed_dataset(),
            &Filters {
                view_state: StateFilter::Disabled,
                search_term: "nothing-matches".to_owned(),
                ..filters()
            },
            &EntityMarks::none(),
        );
        assert_eq!(
            view.domain_options,
            vec!["all", "binary_sensor", "sensor", "switch"]
        );
    }

    #[test]
    fn favorites_and_tag_predicates_apply_only_when_enabled() {
        let dataset = mixed_dataset();
        let favorites = BTreeSet::from([EntityId::new("switch.desk")]);
        let tags = BTreeMap::from([(
            EntityId::new("sensor.outdoor_temp"),
            vec!["garden".to_owned()],
        )]);
        let marks = EntityMarks {
            favorites: &favorites,
            tags: &tags,
        };

        let unfiltered = compute_view(&dataset, &filters(), &marks);
        assert_eq!(unfiltered.counts.entities, 5);

        let favorites_only = compute_view(
            &dataset,
            &Filters {
                favorites_only: true,
                ..filters()
            },
            &marks,
        );
        assert_eq!(favorites_only.entity_ids(), vec![EntityId::new("switch.desk")]);

        let tagged = compute_view(
            &dataset,
            &Filters {
                tag: Some("garden".to_owned()),
                ..filters()
            },
            &marks,
        );
        assert_eq!(tagged.entity_ids(), vec![EntityId::new("sensor.outdoor_temp")]);
    }

    #[test]
    fn counts_cover_filtered_result() {
        let view = compute_view(&mixed_dataset(), &filters(), &EntityMarks::none());
        assert_eq!(view.counts.integrations, 2);
        assert_eq!(view.counts.devices, 3);
        assert_eq!(view.counts.entities, 5);
        assert_eq!(view.counts.enabled, 3);
        assert_eq!(view.counts.disabled, 2);
    }
}
