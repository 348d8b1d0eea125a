//! Automation rows: rule loading for the engine and CRUD for operators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::warn;
use uuid::Uuid;

use super::Db;
use crate::engine::evaluator::check_conditions;
use crate::error::{Error, Result};
use crate::model::{
    ActionConfig, Automation, AutomationId, Conditions, NewAutomation, TenantId, TriggerType,
};
use crate::repo::RuleRepository;
use crate::telemetry::metrics;

const COLUMNS: &str = "id, tenant_id, name, active, trigger_type, conditions, action_type, \
     action_config, last_triggered_at, trigger_count, created_at, updated_at";

/// Changes applied by [`Db::update_automation`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct AutomationPatch {
    pub name: Option<String>,
    pub trigger: Option<TriggerType>,
    pub conditions: Option<Conditions>,
    pub action: Option<ActionConfig>,
}

impl Db {
    /// Validate and insert a new automation.
    pub async fn create_automation(&self, new: NewAutomation) -> Result<Automation> {
        check_conditions(new.trigger, &new.conditions)?;
        new.action.validate()?;
        let automation = new.build();
        let (action_type, action_config) = automation.action.to_parts();

        sqlx::query(
            "INSERT INTO automations (id, tenant_id, name, active, trigger_type, conditions, action_type, action_config, trigger_count, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $9)",
        )
        .bind(automation.id.0)
        .bind(automation.tenant_id.0)
        .bind(&automation.name)
        .bind(automation.active)
        .bind(automation.trigger.as_str())
        .bind(serde_json::to_value(&automation.conditions)?)
        .bind(action_type.as_str())
        .bind(action_config)
        .bind(automation.created_at)
        .execute(self.pool())
        .await?;

        Ok(automation)
    }

    pub async fn get_automation(&self, id: AutomationId) -> Result<Automation> {
        let row: Option<AutomationRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM automations WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| Error::NotFound(format!("automation {id}")))?
            .try_into_automation()
    }

    /// Every automation of a tenant, active or not, oldest first. Rows that
    /// no longer parse are skipped with a warning.
    pub async fn list_automations(&self, tenant_id: TenantId) -> Result<Vec<Automation>> {
        let rows: Vec<AutomationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM automations WHERE tenant_id = $1 ORDER BY created_at"
        ))
        .bind(tenant_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(parse_rows(rows))
    }

    pub async fn update_automation(
        &self,
        id: AutomationId,
        patch: AutomationPatch,
    ) -> Result<Automation> {
        let mut automation = self.get_automation(id).await?;
        if let Some(name) = patch.name {
            automation.name = name;
        }
        if let Some(trigger) = patch.trigger {
            automation.trigger = trigger;
        }
        if let Some(conditions) = patch.conditions {
            automation.conditions = conditions;
        }
        if let Some(action) = patch.action {
            automation.action = action;
        }
        check_conditions(automation.trigger, &automation.conditions)?;
        automation.action.validate()?;

        let (action_type, action_config) = automation.action.to_parts();
        let (updated_at,): (DateTime<Utc>,) = sqlx::query_as(
            "UPDATE automations
             SET name = $2, trigger_type = $3, conditions = $4, action_type = $5,
                 action_config = $6, updated_at = now()
             WHERE id = $1
             RETURNING updated_at",
        )
        .bind(id.0)
        .bind(&automation.name)
        .bind(automation.trigger.as_str())
        .bind(serde_json::to_value(&automation.conditions)?)
        .bind(action_type.as_str())
        .bind(action_config)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("automation {id}")))?;

        automation.updated_at = updated_at;
        Ok(automation)
    }

    pub async fn set_automation_active(&self, id: AutomationId, active: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE automations SET active = $2, updated_at = now() WHERE id = $1")
                .bind(id.0)
                .bind(active)
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("automation {id}")));
        }
        Ok(())
    }

    /// Delete an automation. Its delivery records go with it.
    pub async fn delete_automation(&self, id: AutomationId) -> Result<()> {
        let result = sqlx::query("DELETE FROM automations WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("automation {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for Db {
    async fn list_active_automations(&self, tenant_id: TenantId) -> Result<Vec<Automation>> {
        let rows: Vec<AutomationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM automations WHERE tenant_id = $1 AND active"
        ))
        .bind(tenant_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(parse_rows(rows))
    }

    async fn increment_trigger_counters(&self, id: AutomationId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE automations
             SET trigger_count = trigger_count + 1,
                 last_triggered_at = GREATEST(COALESCE(last_triggered_at, $2), $2)
             WHERE id = $1",
        )
        .bind(id.0)
        .bind(at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn tenants_with_active_trigger(&self, trigger: TriggerType) -> Result<Vec<TenantId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT tenant_id FROM automations
             WHERE active AND trigger_type = $1
             ORDER BY tenant_id",
        )
        .bind(trigger.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| TenantId(id)).collect())
    }
}

fn parse_rows(rows: Vec<AutomationRow>) -> Vec<Automation> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.try_into_automation() {
                Ok(automation) => Some(automation),
                Err(e) => {
                    warn!(automation_id = %id, error = %e, "skipping invalid automation");
                    metrics::invalid_automations()
                        .add(1, &[KeyValue::new("source", "postgres")]);
                    None
                }
            }
        })
        .collect()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AutomationRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    active: bool,
    trigger_type: String,
    conditions: serde_json::Value,
    action_type: String,
    action_config: serde_json::Value,
    last_triggered_at: Option<DateTime<Utc>>,
    trigger_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AutomationRow {
    fn try_into_automation(self) -> Result<Automation> {
        let trigger: TriggerType = self.trigger_type.parse()?;
        let conditions: Conditions = serde_json::from_value(self.conditions).map_err(|e| {
            crate::model::automation::ConditionError::Malformed(e.to_string())
        })?;
        check_conditions(trigger, &conditions)?;
        let action = ActionConfig::from_parts(&self.action_type, &self.action_config)?;

        Ok(Automation {
            id: AutomationId(self.id),
            tenant_id: TenantId(self.tenant_id),
            name: self.name,
            active: self.active,
            trigger,
            conditions,
            action,
            last_triggered_at: self.last_triggered_at,
            trigger_count: self.trigger_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
