//! Tag reconciliation: makes an opportunity's tag links equal a desired name set.

use std::collections::BTreeSet;
use std::sync::Arc;

use scout_core::{Tag, TagLink};
use scout_storage::{CatalogStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("opportunity `{0}` does not exist")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Store failures leave the link set indeterminate; running again is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Store(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub opportunity_id: String,
    /// Names now linked, in the order they were resolved.
    pub linked: Vec<String>,
    /// Names that had no tag row before this run.
    pub created: Vec<String>,
}

#[derive(Clone)]
pub struct TagReconciler {
    store: Arc<dyn CatalogStore>,
}

impl TagReconciler {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Delete-then-rebuild. Steps run strictly in order and the first store
    /// failure aborts the run without rollback.
    pub async fn reconcile<I, S>(
        &self,
        opportunity_id: &str,
        desired: I,
    ) -> Result<ReconcileReport, ReconcileError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let desired = desired.into_iter().map(Into::into).collect::<BTreeSet<String>>();

        if self.store.get_opportunity(opportunity_id).await?.is_none() {
            return Err(ReconcileError::NotFound(opportunity_id.to_string()));
        }

        self.store.delete_associations(opportunity_id).await?;
        debug!(opportunity_id, "cleared tag links");

        let mut report = ReconcileReport {
            opportunity_id: opportunity_id.to_string(),
            linked: Vec::with_capacity(desired.len()),
            created: Vec::new(),
        };
        if desired.is_empty() {
            info!(opportunity_id, linked = 0, "tags reconciled");
            return Ok(report);
        }

        let mut links = Vec::with_capacity(desired.len());
        for name in desired {
            let (tag, created) = self.resolve_tag(&name).await?;
            if created {
                report.created.push(name.clone());
            }
            links.push(TagLink {
                opportunity_id: opportunity_id.to_string(),
                tag_id: tag.id,
            });
            report.linked.push(name);
        }

        self.store.insert_associations(&links).await?;
        info!(
            opportunity_id,
            linked = report.linked.len(),
            created = report.created.len(),
            "tags reconciled"
        );
        Ok(report)
    }

    /// Looks a tag up by name, creating it when absent. A uniqueness conflict
    /// on create means another writer got there first, so the row is re-read.
    async fn resolve_tag(&self, name: &str) -> Result<(Tag, bool), StoreError> {
        if let Some(tag) = self.store.find_tag_by_name(name).await? {
            return Ok((tag, false));
        }
        match self.store.create_tag(name).await {
            Ok(tag) => {
                debug!(tag = name, "created tag");
                Ok((tag, true))
            }
            Err(err) if err.is_conflict() => {
                warn!(tag = name, "tag created concurrently; re-reading");
                match self.store.find_tag_by_name(name).await? {
                    Some(tag) => Ok((tag, false)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}
