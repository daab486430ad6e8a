//! sqlx/Postgres backend. Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::NaiveDate;
use scout_core::{
    blank_to_none, OpportunityInput, OpportunityKind, OpportunityPatch, OpportunityRow, Tag,
    TagLink,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::{CatalogStore, StoreError};

const OPPORTUNITY_COLUMNS: &str = "id::text AS id, title, organization, type, description, \
     full_description, deadline, location, amount, url, image_url";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn opportunity_from_row(row: &PgRow) -> Result<OpportunityRow, StoreError> {
    let kind: String = row.try_get("type")?;
    let kind = kind
        .parse::<OpportunityKind>()
        .map_err(|err| StoreError::Decode(err.to_string()))?;
    let deadline: NaiveDate = row.try_get("deadline")?;
    Ok(OpportunityRow {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        organization: row.try_get("organization")?,
        kind,
        description: row.try_get("description")?,
        full_description: row.try_get("full_description")?,
        deadline,
        location: row.try_get("location")?,
        amount: row.try_get("amount")?,
        url: row.try_get("url")?,
        image_url: row.try_get("image_url")?,
    })
}

fn unique_violation(err: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict {
                entity,
                key: key.to_string(),
            };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_opportunities(&self) -> Result<Vec<OpportunityRow>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities ORDER BY deadline ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    async fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id::text = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn insert_opportunity(
        &self,
        input: &OpportunityInput,
    ) -> Result<OpportunityRow, StoreError> {
        let input = input.clone().normalized();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO opportunities
                (title, organization, type, description, full_description,
                 deadline, location, amount, url, image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {OPPORTUNITY_COLUMNS}
            "#
        ))
        .bind(&input.title)
        .bind(&input.organization)
        .bind(input.kind.as_str())
        .bind(&input.description)
        .bind(&input.full_description)
        .bind(input.deadline)
        .bind(&input.location)
        .bind(&input.amount)
        .bind(&input.url)
        .bind(&input.image_url)
        .fetch_one(&self.pool)
        .await?;
        opportunity_from_row(&row)
    }

    async fn update_opportunity(
        &self,
        id: &str,
        patch: &OpportunityPatch,
    ) -> Result<Option<OpportunityRow>, StoreError> {
        if !patch.touches_columns() {
            return self.get_opportunity(id).await;
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE opportunities SET updated_at = NOW()");
        if let Some(v) = &patch.title {
            qb.push(", title = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.organization {
            qb.push(", organization = ").push_bind(v.clone());
        }
        if let Some(v) = patch.kind {
            qb.push(", type = ").push_bind(v.as_str());
        }
        if let Some(v) = &patch.description {
            qb.push(", description = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.full_description {
            qb.push(", full_description = ").push_bind(v.clone());
        }
        if let Some(v) = patch.deadline {
            qb.push(", deadline = ").push_bind(v);
        }
        if let Some(v) = &patch.location {
            qb.push(", location = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.amount {
            qb.push(", amount = ").push_bind(blank_to_none(Some(v.clone())));
        }
        if let Some(v) = &patch.url {
            qb.push(", url = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.image_url {
            qb.push(", image_url = ").push_bind(blank_to_none(Some(v.clone())));
        }
        qb.push(" WHERE id::text = ")
            .push_bind(id.to_string())
            .push(" RETURNING ")
            .push(OPPORTUNITY_COLUMNS);

        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn delete_opportunity(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id::text = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tags_for_opportunity(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.name
              FROM opportunity_tags ot
              JOIN tags t ON t.id = ot.tag_id
             WHERE ot.opportunity_id::text = $1
             ORDER BY t.name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    async fn list_tag_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT name FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let row = sqlx::query("SELECT id::text AS id, name FROM tags WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Tag, StoreError> {
            Ok(Tag {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let row = sqlx::query("INSERT INTO tags (name) VALUES ($1) RETURNING id::text AS id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| unique_violation(err, "tag", name))?;
        debug!(tag = name, "created tag row");
        Ok(Tag {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn delete_associations(&self, opportunity_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM opportunity_tags WHERE opportunity_id::text = $1")
            .bind(opportunity_id)
            .execute(&self.pool)
            .await?;
        debug!(opportunity_id, removed = result.rows_affected(), "deleted tag links");
        Ok(())
    }

    async fn insert_associations(&self, links: &[TagLink]) -> Result<(), StoreError> {
        if links.is_empty() {
            return Ok(());
        }
        let mut qb =
            QueryBuilder::<Postgres>::new("INSERT INTO opportunity_tags (opportunity_id, tag_id) ");
        qb.push_values(links, |mut b, link| {
            b.push_bind(link.opportunity_id.clone())
                .push_unseparated("::uuid")
                .push_bind(link.tag_id.clone())
                .push_unseparated("::uuid");
        });
        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|err| unique_violation(err, "opportunity tag", &links[0].opportunity_id))?;
        Ok(())
    }
}
