//! Service secrets as downloaded from the Empire login site.
//!
//! The file maps each service name to its connection options:
//! `{"salesforce": {"option": {"access_token": {"value": "..."}}}}`.
//! Only `option.*.value` is used; any other fields are ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{EmpireError, Result};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ServiceSecrets {
    services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceEntry {
    #[serde(default)]
    pub option: BTreeMap<String, SecretOption>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecretOption {
    #[serde(default)]
    pub value: Value,
}

impl ServiceSecrets {
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EmpireError::SecretsIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| EmpireError::SecretsFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Service names in sorted order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// The body to send when connecting to `service`: each option name mapped
    /// to its value.
    pub fn connect_body(&self, service: &str) -> Option<Map<String, Value>> {
        self.services.get(service).map(|entry| {
            entry
                .option
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect()
        })
    }
}
