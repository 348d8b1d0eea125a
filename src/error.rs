//! Error types for review-automation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid conditions: {0}")]
    InvalidConditions(#[from] crate::model::automation::ConditionError),

    #[error("invalid action config: {0}")]
    InvalidAction(String),

    #[error("user {user_id} is not a member of tenant {tenant_id}")]
    NotTenantMember {
        tenant_id: crate::model::TenantId,
        user_id: uuid::Uuid,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
