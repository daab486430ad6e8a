//! Persistence boundary for the Scout catalog.
//!
//! [`CatalogStore`] is the only view the rest of the workspace has of the
//! remote store. Three backends implement it: [`MemoryStore`] for tests and
//! local demos, [`PgStore`] over sqlx, and [`RestStore`] for a hosted
//! PostgREST-style backend-as-a-service.

pub mod memory;
pub mod postgres;
pub mod rest;

use async_trait::async_trait;
use scout_core::{OpportunityInput, OpportunityPatch, OpportunityRow, Tag, TagLink};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::{RestConfig, RestStore};

pub const CRATE_NAME: &str = "scout-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unexpected response from store: {0}")]
    Decode(String),
    #[error("{entity} `{key}` already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Remote CRUD/query surface for opportunities, tags and their join table.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All opportunities, ordered by deadline ascending.
    async fn list_opportunities(&self) -> Result<Vec<OpportunityRow>, StoreError>;

    async fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>, StoreError>;

    async fn insert_opportunity(
        &self,
        input: &OpportunityInput,
    ) -> Result<OpportunityRow, StoreError>;

    /// Returns `None` when no row has this id.
    async fn update_opportunity(
        &self,
        id: &str,
        patch: &OpportunityPatch,
    ) -> Result<Option<OpportunityRow>, StoreError>;

    /// Removes the row and its tag links. `false` when nothing was deleted.
    async fn delete_opportunity(&self, id: &str) -> Result<bool, StoreError>;

    async fn list_tags_for_opportunity(&self, id: &str) -> Result<Vec<String>, StoreError>;

    /// Every tag name, sorted ascending.
    async fn list_tag_names(&self) -> Result<Vec<String>, StoreError>;

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the name is already taken.
    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError>;

    async fn delete_associations(&self, opportunity_id: &str) -> Result<(), StoreError>;

    async fn insert_associations(&self, links: &[TagLink]) -> Result<(), StoreError>;
}
