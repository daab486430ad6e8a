//! Hosted backend-as-a-service client speaking the PostgREST dialect
//! (`?column=eq.value`, `Prefer: return=representation`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use scout_core::{blank_to_none, OpportunityInput, OpportunityPatch, OpportunityRow, Tag, TagLink};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{CatalogStore, StoreError};

#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base of the REST surface, e.g. `https://project.example.co/rest/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TagNameRow {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LinkedTagRow {
    tags: Option<TagNameRow>,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let apikey = HeaderValue::from_str(key)
                .map_err(|err| StoreError::Backend(format!("invalid api key header: {err}")))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|err| StoreError::Backend(format!("invalid api key header: {err}")))?;
            headers.insert("apikey", apikey);
            headers.insert(AUTHORIZATION, bearer);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        debug!(%method, table, "rest request");
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, StoreError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, StoreError> {
        let resp = Self::send(builder).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode(err.to_string()))
    }

    fn first<T>(rows: Vec<T>, what: &str) -> Result<T, StoreError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode(format!("{what} returned no representation")))
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn patch_body(patch: &OpportunityPatch) -> Map<String, Value> {
    let mut body = Map::new();
    let mut put = |key: &str, value: Value| {
        body.insert(key.to_string(), value);
    };
    if let Some(v) = &patch.title {
        put("title", json!(v));
    }
    if let Some(v) = &patch.organization {
        put("organization", json!(v));
    }
    if let Some(v) = patch.kind {
        put("type", json!(v.as_str()));
    }
    if let Some(v) = &patch.description {
        put("description", json!(v));
    }
    if let Some(v) = &patch.full_description {
        put("full_description", json!(v));
    }
    if let Some(v) = patch.deadline {
        put("deadline", json!(v));
    }
    if let Some(v) = &patch.location {
        put("location", json!(v));
    }
    if let Some(v) = &patch.amount {
        put("amount", json!(blank_to_none(Some(v.clone()))));
    }
    if let Some(v) = &patch.url {
        put("url", json!(v));
    }
    if let Some(v) = &patch.image_url {
        put("image_url", json!(blank_to_none(Some(v.clone()))));
    }
    body
}

#[async_trait]
impl CatalogStore for RestStore {
    async fn list_opportunities(&self) -> Result<Vec<OpportunityRow>, StoreError> {
        Self::fetch(
            self.request(Method::GET, "opportunities")
                .query(&[("select", "*"), ("order", "deadline.asc")]),
        )
        .await
    }

    async fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>, StoreError> {
        let rows: Vec<OpportunityRow> = Self::fetch(
            self.request(Method::GET, "opportunities")
                .query(&[("select", "*".to_string()), ("id", eq(id))]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_opportunity(
        &self,
        input: &OpportunityInput,
    ) -> Result<OpportunityRow, StoreError> {
        let input = input.clone().normalized();
        let body = json!({
            "title": input.title,
            "organization": input.organization,
            "type": input.kind.as_str(),
            "description": input.description,
            "full_description": input.full_description,
            "deadline": input.deadline,
            "location": input.location,
            "amount": input.amount,
            "url": input.url,
            "image_url": input.image_url,
        });
        let rows: Vec<OpportunityRow> = Self::fetch(
            self.request(Method::POST, "opportunities")
                .header("Prefer", "return=representation")
                .json(&body),
        )
        .await?;
        Self::first(rows, "opportunity insert")
    }

    async fn update_opportunity(
        &self,
        id: &str,
        patch: &OpportunityPatch,
    ) -> Result<Option<OpportunityRow>, StoreError> {
        if !patch.touches_columns() {
            return self.get_opportunity(id).await;
        }
        let rows: Vec<OpportunityRow> = Self::fetch(
            self.request(Method::PATCH, "opportunities")
                .query(&[("id", eq(id))])
                .header("Prefer", "return=representation")
                .json(&patch_body(patch)),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_opportunity(&self, id: &str) -> Result<bool, StoreError> {
        let rows: Vec<Value> = Self::fetch(
            self.request(Method::DELETE, "opportunities")
                .query(&[("id", eq(id))])
                .header("Prefer", "return=representation"),
        )
        .await?;
        Ok(!rows.is_empty())
    }

    async fn list_tags_for_opportunity(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<LinkedTagRow> = Self::fetch(
            self.request(Method::GET, "opportunity_tags").query(&[
                ("select", "tags(name)".to_string()),
                ("opportunity_id", eq(id)),
            ]),
        )
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.tags.map(|tag| tag.name))
            .collect())
    }

    async fn list_tag_names(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<TagNameRow> = Self::fetch(
            self.request(Method::GET, "tags")
                .query(&[("select", "name"), ("order", "name.asc")]),
        )
        .await?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let rows: Vec<Tag> = Self::fetch(
            self.request(Method::GET, "tags")
                .query(&[("select", "id,name".to_string()), ("name", eq(name))]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let result: Result<Vec<Tag>, StoreError> = Self::fetch(
            self.request(Method::POST, "tags")
                .header("Prefer", "return=representation")
                .json(&json!({ "name": name })),
        )
        .await;
        match result {
            Ok(rows) => Self::first(rows, "tag insert"),
            Err(StoreError::Status { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                Err(StoreError::Conflict {
                    entity: "tag",
                    key: name.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_associations(&self, opportunity_id: &str) -> Result<(), StoreError> {
        Self::send(
            self.request(Method::DELETE, "opportunity_tags")
                .query(&[("opportunity_id", eq(opportunity_id))]),
        )
        .await?;
        Ok(())
    }

    async fn insert_associations(&self, links: &[TagLink]) -> Result<(), StoreError> {
        if links.is_empty() {
            return Ok(());
        }
        Self::send(self.request(Method::POST, "opportunity_tags").json(links)).await?;
        Ok(())
    }
}
