//! Provisioning backends.
//!
//! `CommandProvisioner` hands each unit to an external deploy command chosen
//! by unit kind (e.g. `npx cdk deploy {unit}`); `DryRunProvisioner` only logs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::error::ProvisionError;
use crate::domain::{DeployableUnit, ProvisionedRef, UnitKind};

use super::{ApplyContext, CommandGroup, CommandRunner, Provisioner};

/// Runs a per-kind command template through a [`CommandRunner`]
pub struct CommandProvisioner {
    runner: Arc<dyn CommandRunner>,

    /// Command template per unit kind
    templates: HashMap<UnitKind, String>,
}

impl CommandProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            templates: HashMap::new(),
        }
    }

    pub fn with_template(mut self, kind: UnitKind, template: impl Into<String>) -> Self {
        self.templates.insert(kind, template.into());
        self
    }

    /// Build the command group for one unit
    pub fn command_for(
        &self,
        unit: &DeployableUnit,
        ctx: &ApplyContext,
    ) -> Result<CommandGroup, ProvisionError> {
        let template = self.templates.get(&unit.kind).ok_or_else(|| {
            ProvisionError::new(
                &unit.name,
                format!("no provisioning command configured for kind '{}'", unit.kind),
            )
        })?;

        let command = render(template, unit, ctx);

        let mut group = CommandGroup::new(format!("provision:{}", unit.name), vec![command])
            .with_var("PIPELINE_NAME", &ctx.pipeline)
            .with_var("RUN_ID", ctx.run_id.to_string())
            .with_var("UNIT_NAME", &unit.name)
            .with_var("UNIT_KIND", unit.kind.as_str())
            .with_var("STAGE_NAME", &ctx.stage)
            .with_var("STAGE_ENVIRONMENT", &ctx.environment)
            .with_var("ARTIFACT_ID", &ctx.artifact.id)
            .with_var("ARTIFACT_LOCATION", &ctx.artifact.location);

        if let Some(account) = &ctx.target.account {
            group = group.with_var("TARGET_ACCOUNT", account);
        }
        if let Some(region) = &ctx.target.region {
            group = group.with_var("TARGET_REGION", region);
        }
        for (key, value) in unit.config_strings() {
            group = group.with_var(format!("UNIT_CONFIG_{}", env_key(key)), value);
        }

        Ok(group)
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    fn name(&self) -> &str {
        "command"
    }

    async fn apply(
        &self,
        unit: &DeployableUnit,
        ctx: &ApplyContext,
    ) -> Result<ProvisionedRef, ProvisionError> {
        let group = self.command_for(unit, ctx)?;

        self.runner.execute(&group).await.map_err(|failure| {
            let cause = if failure.stderr.is_empty() {
                failure.to_string()
            } else {
                format!("{}: {}", failure, failure.stderr)
            };
            ProvisionError::new(&unit.name, cause)
        })?;

        Ok(ProvisionedRef::new(
            &unit.name,
            unit.kind,
            format!("{}/{}@{}", ctx.stage, unit.name, ctx.artifact.id),
        ))
    }
}

/// Logs what would be applied and succeeds
#[derive(Debug, Default)]
pub struct DryRunProvisioner;

#[async_trait]
impl Provisioner for DryRunProvisioner {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn apply(
        &self,
        unit: &DeployableUnit,
        ctx: &ApplyContext,
    ) -> Result<ProvisionedRef, ProvisionError> {
        info!(
            stage = %ctx.stage,
            unit = %unit.name,
            kind = %unit.kind,
            config_keys = unit.config.len(),
            "Dry run: would apply unit"
        );
        Ok(ProvisionedRef::new(
            &unit.name,
            unit.kind,
            format!("dry-run:{}/{}", ctx.stage, unit.name),
        ))
    }
}

/// Substitute `{unit}`, `{kind}`, `{stage}`, `{environment}` placeholders
fn render(template: &str, unit: &DeployableUnit, ctx: &ApplyContext) -> String {
    template
        .replace("{unit}", &unit.name)
        .replace("{kind}", unit.kind.as_str())
        .replace("{stage}", &ctx.stage)
        .replace("{environment}", &ctx.environment)
}

/// `app-env.name` -> `APP_ENV_NAME`
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ShellRunner;
    use crate::core::pipeline::DeployTarget;
    use crate::domain::ArtifactRef;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ApplyContext {
        ApplyContext {
            pipeline: "sample-backend".to_string(),
            run_id: Uuid::new_v4(),
            stage: "StagingAPI".to_string(),
            environment: "staging".to_string(),
            target: DeployTarget {
                account: Some("111111111111".to_string()),
                region: Some("ap-northeast-1".to_string()),
            },
            artifact: ArtifactRef::new("0123456789abcdef", "cdk/cdk.out"),
        }
    }

    #[test]
    fn test_command_rendering_and_env() {
        let provisioner = CommandProvisioner::new(Arc::new(ShellRunner::new()))
            .with_template(UnitKind::ApiService, "npx cdk deploy {stage}/{unit} --context env={environment}");

        let unit = DeployableUnit::new("sample-backend-api", UnitKind::ApiService)
            .with_config("app_env", json!("stg"))
            .with_config("target-api-url", json!("https://api.example.com"));

        let group = provisioner.command_for(&unit, &ctx()).unwrap();
        assert_eq!(
            group.commands,
            vec!["npx cdk deploy StagingAPI/sample-backend-api --context env=staging".to_string()]
        );
        assert_eq!(group.env.get("UNIT_CONFIG_APP_ENV").map(String::as_str), Some("stg"));
        assert_eq!(
            group.env.get("UNIT_CONFIG_TARGET_API_URL").map(String::as_str),
            Some("https://api.example.com")
        );
        assert_eq!(group.env.get("TARGET_REGION").map(String::as_str), Some("ap-northeast-1"));
        assert_eq!(group.env.get("ARTIFACT_ID").map(String::as_str), Some("0123456789abcdef"));
    }

    #[test]
    fn test_missing_template_is_provision_error() {
        let provisioner = CommandProvisioner::new(Arc::new(ShellRunner::new()));
        let unit = DeployableUnit::new("docs", UnitKind::DocSite);

        let err = provisioner.command_for(&unit, &ctx()).unwrap_err();
        assert_eq!(err.unit, "docs");
        assert!(err.cause.contains("doc_site"));
    }

    #[tokio::test]
    async fn test_failed_command_maps_to_provision_error() {
        let provisioner = CommandProvisioner::new(Arc::new(ShellRunner::new()))
            .with_template(UnitKind::DataStore, "echo table exists >&2; exit 7");
        let unit = DeployableUnit::new("sample-backend-db", UnitKind::DataStore);

        let err = provisioner.apply(&unit, &ctx()).await.unwrap_err();
        assert_eq!(err.unit, "sample-backend-db");
        assert!(err.cause.contains("exited with 7"), "{}", err.cause);
        assert!(err.cause.contains("table exists"), "{}", err.cause);
    }

    #[tokio::test]
    async fn test_dry_run_always_succeeds() {
        let unit = DeployableUnit::new("docs", UnitKind::DocSite);
        let provisioned = DryRunProvisioner.apply(&unit, &ctx()).await.unwrap();
        assert_eq!(provisioned.reference, "dry-run:StagingAPI/docs");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("app-env.name"), "APP_ENV_NAME");
    }
}
