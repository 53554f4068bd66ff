//! Deployable units: named, environment-scoped provisioning targets.
//!
//! The configuration bag is opaque to the orchestrator. Its schema belongs
//! to whichever provisioner applies the unit.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of unit kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Table or other data store
    DataStore,

    /// HTTP API endpoint and its handler
    ApiService,

    /// Static documentation host
    DocSite,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::DataStore => "data_store",
            UnitKind::ApiService => "api_service",
            UnitKind::DocSite => "doc_site",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit owned by exactly one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployableUnit {
    /// Unit name (unique within its stage)
    pub name: String,

    pub kind: UnitKind,

    /// Environment-scoped configuration, passed through untouched
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl DeployableUnit {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Config entries flattened to strings (JSON for non-string values)
    pub fn config_strings(&self) -> impl Iterator<Item = (&str, String)> {
        self.config.iter().map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.as_str(), value)
        })
    }
}
