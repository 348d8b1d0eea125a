//! Rule matching: which of the tenant's active automations does an event
//! satisfy?

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::evaluator;
use crate::error::Result;
use crate::model::{Automation, Event, TenantId};
use crate::repo::RuleRepository;
use crate::telemetry::metrics;

/// One (automation, event) pair that satisfied its conditions.
#[derive(Debug, Clone)]
pub struct Match {
    pub automation: Arc<Automation>,
    pub event: Arc<Event>,
}

/// Per-event list of matches. Ephemeral, never persisted.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    matches: Vec<Match>,
}

impl MatchSet {
    pub fn new(matches: Vec<Match>) -> Self {
        Self { matches }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }
}

impl IntoIterator for MatchSet {
    type Item = Match;
    type IntoIter = std::vec::IntoIter<Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.into_iter()
    }
}

type TenantRules = Arc<Vec<Arc<Automation>>>;

pub struct RuleMatcher {
    rules: Arc<dyn RuleRepository>,
    cache: TtlCache<TenantId, TenantRules>,
}

impl RuleMatcher {
    pub fn new(rules: Arc<dyn RuleRepository>, cache_ttl: Duration) -> Self {
        Self {
            rules,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Evaluate every compatible active automation of the event's tenant.
    ///
    /// Fails only when the tenant's automations cannot be loaded; a rule with
    /// malformed conditions is logged and treated as non-matching.
    pub async fn match_event(&self, event: Arc<Event>) -> Result<MatchSet> {
        let tenant_id = event.tenant_id();
        let automations = self.active_automations(tenant_id).await?;

        let mut matches = Vec::new();
        for automation in automations.iter() {
            if !automation.active || !automation.trigger.accepts(event.kind()) {
                continue;
            }
            match evaluator::evaluate(automation.trigger, &automation.conditions, &event) {
                Ok(true) => matches.push(Match {
                    automation: Arc::clone(automation),
                    event: Arc::clone(&event),
                }),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        automation_id = %automation.id,
                        trigger = %automation.trigger,
                        error = %e,
                        "condition evaluation failed, treating as no match"
                    );
                }
            }
        }

        debug!(
            tenant_id = %tenant_id,
            review_id = %event.review_id(),
            kind = %event.kind(),
            candidates = automations.len(),
            matched = matches.len(),
            "event matched"
        );
        metrics::automations_matched().add(
            matches.len() as u64,
            &[KeyValue::new("event_kind", event.kind().as_str())],
        );

        Ok(MatchSet::new(matches))
    }

    /// Drop a tenant's cached automations so the next event reloads them.
    pub async fn invalidate(&self, tenant_id: TenantId) {
        self.cache.invalidate(&tenant_id).await;
    }

    pub async fn purge_cache(&self) {
        self.cache.purge_expired().await;
    }

    async fn active_automations(&self, tenant_id: TenantId) -> Result<TenantRules> {
        let rules = Arc::clone(&self.rules);
        let (automations, hit) = self
            .cache
            .get_or_try_load(tenant_id, || async move {
                let loaded = rules.list_active_automations(tenant_id).await?;
                Ok::<_, crate::error::Error>(Arc::new(
                    loaded.into_iter().map(Arc::new).collect::<Vec<_>>(),
                ))
            })
            .await?;
        metrics::rule_cache_lookups().add(
            1,
            &[KeyValue::new("result", if hit { "hit" } else { "miss" })],
        );
        Ok(automations)
    }
}
