//! Build output and provisioning references.
//!
//! The artifact reference is produced once by the build step and shared
//! read-only by every stage of the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::unit::UnitKind;

/// Opaque handle to the build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Content-addressed identifier (16 hex chars)
    pub id: String,

    /// Where the build left its primary output (e.g. `cdk/cdk.out`)
    pub location: String,

    /// When the build produced the artifact
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of applying one deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedRef {
    /// Unit name
    pub unit: String,

    pub kind: UnitKind,

    /// Collaborator-defined reference (stack id, endpoint, ...)
    pub reference: String,

    pub applied_at: DateTime<Utc>,
}

impl ProvisionedRef {
    pub fn new(unit: impl Into<String>, kind: UnitKind, reference: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            kind,
            reference: reference.into(),
            applied_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_creation() {
        let artifact = ArtifactRef::new("0123456789abcdef", "cdk/cdk.out");

        assert_eq!(artifact.id, "0123456789abcdef");
        assert_eq!(artifact.location, "cdk/cdk.out");
    }

    #[test]
    fn test_provisioned_ref_serialization() {
        let provisioned = ProvisionedRef::new(
            "sample-backend-db",
            UnitKind::DataStore,
            "StagingDB/sample-backend-db",
        );

        let json = serde_json::to_string(&provisioned).unwrap();
        assert!(json.contains("\"kind\":\"data_store\""));

        let parsed: ProvisionedRef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, provisioned);
    }
}
