//! In-process [`CatalogStore`] with the same constraints the SQL schema enforces:
//! unique tag names, unique join rows and foreign keys on both join columns.

use async_trait::async_trait;
use scout_core::{OpportunityInput, OpportunityPatch, OpportunityRow, Tag, TagLink};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{CatalogStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    opportunities: Vec<OpportunityRow>,
    tags: Vec<Tag>,
    links: Vec<TagLink>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tag rows, including orphans.
    pub async fn tag_count(&self) -> usize {
        self.state.lock().await.tags.len()
    }

    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_opportunities(&self) -> Result<Vec<OpportunityRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state.opportunities.clone();
        rows.sort_by_key(|row| row.deadline);
        Ok(rows)
    }

    async fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.opportunities.iter().find(|row| row.id == id).cloned())
    }

    async fn insert_opportunity(
        &self,
        input: &OpportunityInput,
    ) -> Result<OpportunityRow, StoreError> {
        let row = input.clone().normalized().into_row(Uuid::new_v4().to_string());
        self.state.lock().await.opportunities.push(row.clone());
        Ok(row)
    }

    async fn update_opportunity(
        &self,
        id: &str,
        patch: &OpportunityPatch,
    ) -> Result<Option<OpportunityRow>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(row) = state.opportunities.iter_mut().find(|row| row.id == id) else {
            return Ok(None);
        };
        patch.apply_to(row);
        Ok(Some(row.clone()))
    }

    async fn delete_opportunity(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.opportunities.len();
        state.opportunities.retain(|row| row.id != id);
        let deleted = state.opportunities.len() != before;
        if deleted {
            state.links.retain(|link| link.opportunity_id != id);
        }
        Ok(deleted)
    }

    async fn list_tags_for_opportunity(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .iter()
            .filter(|link| link.opportunity_id == id)
            .filter_map(|link| state.tags.iter().find(|tag| tag.id == link.tag_id))
            .map(|tag| tag.name.clone())
            .collect())
    }

    async fn list_tag_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let mut names = state.tags.iter().map(|tag| tag.name.clone()).collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tags.iter().find(|tag| tag.name == name).cloned())
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let mut state = self.state.lock().await;
        if state.tags.iter().any(|tag| tag.name == name) {
            return Err(StoreError::Conflict {
                entity: "tag",
                key: name.to_string(),
            });
        }
        let tag = Tag {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    async fn delete_associations(&self, opportunity_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.links.retain(|link| link.opportunity_id != opportunity_id);
        Ok(())
    }

    async fn insert_associations(&self, links: &[TagLink]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // Validate the whole batch first so a bad row leaves nothing behind.
        for (idx, link) in links.iter().enumerate() {
            if !state.opportunities.iter().any(|row| row.id == link.opportunity_id) {
                return Err(StoreError::Backend(format!(
                    "opportunity `{}` does not exist",
                    link.opportunity_id
                )));
            }
            if !state.tags.iter().any(|tag| tag.id == link.tag_id) {
                return Err(StoreError::Backend(format!(
                    "tag `{}` does not exist",
                    link.tag_id
                )));
            }
            if state.links.contains(link) || links[..idx].contains(link) {
                return Err(StoreError::Conflict {
                    entity: "opportunity tag",
                    key: format!("{}/{}", link.opportunity_id, link.tag_id),
                });
            }
        }
        state.links.extend_from_slice(links);
        Ok(())
    }
}
