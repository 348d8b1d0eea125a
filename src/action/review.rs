//! Internal review mutations: tag and assign.

use tracing::debug;

use super::{ActionError, ActionOutcome, ActionResult};
use crate::error::Error;
use crate::model::Event;
use crate::model::automation::{AssignConfig, TagConfig};
use crate::repo::ReviewStore;

/// Append the configured tag. Already-present tags still count as delivered.
pub async fn tag(reviews: &dyn ReviewStore, config: &TagConfig, event: &Event) -> ActionResult {
    match reviews.append_tag(event.review_id(), config.tag.trim()).await {
        Ok(added) => {
            debug!(review_id = %event.review_id(), tag = %config.tag, added, "review tagged");
            Ok(ActionOutcome::Delivered)
        }
        Err(Error::NotFound(what)) => Ok(ActionOutcome::Skipped(format!("{what} not found"))),
        Err(e) => Err(ActionError::Transient(e.to_string())),
    }
}

/// Assign the review to the configured tenant member.
pub async fn assign(
    reviews: &dyn ReviewStore,
    config: &AssignConfig,
    event: &Event,
) -> ActionResult {
    match reviews
        .set_assignee(event.tenant_id(), event.review_id(), config.user_id)
        .await
    {
        Ok(()) => Ok(ActionOutcome::Delivered),
        Err(Error::NotFound(what)) => Ok(ActionOutcome::Skipped(format!("{what} not found"))),
        Err(e @ Error::NotTenantMember { .. }) => Err(ActionError::Permanent(e.to_string())),
        Err(e) => Err(ActionError::Transient(e.to_string())),
    }
}
