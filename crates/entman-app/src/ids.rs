// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device key the host uses for entities that have no registry device.
pub const NO_DEVICE: &str = "no_device";

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(EntityId);
string_id!(DeviceId);

impl EntityId {
    /// Prefix before the first `.`, or `None` for malformed ids.
    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('.').map(|(domain, _)| domain)
    }

    pub fn object_id(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, object_id)| object_id)
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.0
            .strip_prefix(domain)
            .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Strict registry form: `[a-z][a-z0-9_]*` `.` `[a-z0-9_]+`.
    pub fn is_well_formed(&self) -> bool {
        let Some((domain, object_id)) = self.0.split_once('.') else {
            return false;
        };
        let mut domain_chars = domain.chars();
        let Some(first) = domain_chars.next() else {
            return false;
        };
        if !first.is_ascii_lowercase() {
            return false;
        }
        let valid_tail = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
        domain_chars.all(valid_tail) && !object_id.is_empty() && object_id.chars().all(valid_tail)
    }
}

impl DeviceId {
    pub fn no_device() -> Self {
        Self(NO_DEVICE.to_owned())
    }

    pub fn is_no_device(&self) -> bool {
        self.0 == NO_DEVICE
    }
}
