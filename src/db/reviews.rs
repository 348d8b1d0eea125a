//! Review store on the `reviews` and `tenant_members` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{ReviewId, ReviewSnapshot, TenantId};
use crate::repo::ReviewStore;

impl Db {
    /// Load the current snapshot of a review. Used by the CLI to publish
    /// events for reviews already in the database.
    pub async fn review_snapshot(&self, review_id: ReviewId) -> Result<(TenantId, ReviewSnapshot)> {
        let row: Option<ReviewRow> = sqlx::query_as(
            "SELECT id, tenant_id, platform, rating, sentiment, body, author_name, needs_action, replied_at, created_at
             FROM reviews WHERE id = $1",
        )
        .bind(review_id.0)
        .fetch_optional(self.pool())
        .await?;
        let row = row.ok_or_else(|| Error::NotFound(format!("review {review_id}")))?;
        let tenant_id = TenantId(row.tenant_id);
        Ok((tenant_id, row.into_parts().1))
    }
}

#[async_trait]
impl ReviewStore for Db {
    async fn append_tag(&self, review_id: ReviewId, tag: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE reviews SET tags = array_append(tags, $2)
             WHERE id = $1 AND NOT ($2 = ANY(tags))",
        )
        .bind(review_id.0)
        .bind(tag)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        // Nothing updated: either already tagged or the review is gone.
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM reviews WHERE id = $1)")
            .bind(review_id.0)
            .fetch_one(self.pool())
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(Error::NotFound(format!("review {review_id}")))
        }
    }

    async fn set_assignee(
        &self,
        tenant_id: TenantId,
        review_id: ReviewId,
        user_id: Uuid,
    ) -> Result<()> {
        let (member,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM tenant_members WHERE tenant_id = $1 AND user_id = $2)",
        )
        .bind(tenant_id.0)
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;
        if !member {
            return Err(Error::NotTenantMember { tenant_id, user_id });
        }

        let updated =
            sqlx::query("UPDATE reviews SET assignee_id = $3 WHERE id = $1 AND tenant_id = $2")
                .bind(review_id.0)
                .bind(tenant_id.0)
                .bind(user_id)
                .execute(self.pool())
                .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("review {review_id}")));
        }
        Ok(())
    }

    async fn unreplied_reviews(
        &self,
        tenant_id: TenantId,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<(ReviewId, ReviewSnapshot)>> {
        let rows: Vec<ReviewRow> = sqlx::query_as(
            "SELECT id, tenant_id, platform, rating, sentiment, body, author_name, needs_action, replied_at, created_at
             FROM reviews
             WHERE tenant_id = $1 AND needs_action AND replied_at IS NULL AND created_at < $2
             ORDER BY created_at",
        )
        .bind(tenant_id.0)
        .bind(created_before)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(ReviewRow::into_parts).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    tenant_id: Uuid,
    platform: String,
    rating: Option<i32>,
    sentiment: Option<String>,
    body: String,
    author_name: Option<String>,
    needs_action: bool,
    replied_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ReviewRow {
    fn into_parts(self) -> (ReviewId, ReviewSnapshot) {
        (
            ReviewId(self.id),
            ReviewSnapshot {
                rating: self.rating,
                sentiment: self.sentiment,
                body: self.body,
                platform: self.platform,
                author_name: self.author_name,
                needs_action: self.needs_action,
                replied_at: self.replied_at,
                created_at: self.created_at,
            },
        )
    }
}
