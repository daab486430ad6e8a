//! Axum JSON API for the Scout opportunity catalog.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use scout_core::filter::{
    FilterCriteria, RawFilterQuery, DEADLINE_WINDOW_OPTIONS, LOCATION_OPTIONS,
};
use scout_core::{Opportunity, OpportunityInput, OpportunityKind, OpportunityPatch};
use scout_sync::{CatalogService, ServiceError};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub const CRATE_NAME: &str = "scout-web";

#[derive(Clone)]
pub struct AppState {
    pub service: CatalogService,
    today: Option<NaiveDate>,
}

impl AppState {
    pub fn new(service: CatalogService) -> Self {
        Self {
            service,
            today: None,
        }
    }

    /// Pins the date deadline windows are measured from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Folds browse query pairs into raw selections. Groups accept repeated keys
/// (`?category=summit&category=internship`), comma-separated values
/// (`?category=summit,internship`) or both. Unknown keys are ignored.
fn raw_filter_query(pairs: Vec<(String, String)>) -> RawFilterQuery {
    let mut raw = RawFilterQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "q" => raw.query = value,
            "category" => raw.categories.extend(split_multi(&value)),
            "location" => raw.locations.extend(split_multi(&value)),
            "deadline" => raw.deadlines.extend(split_multi(&value)),
            other => debug!(key = other, "ignoring query parameter"),
        }
    }
    raw
}

fn split_multi(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
}

/// Opportunity plus the display fields list and detail views need.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityView {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    pub image: String,
    pub category_label: &'static str,
    pub deadline_label: String,
}

impl From<Opportunity> for OpportunityView {
    fn from(opportunity: Opportunity) -> Self {
        Self {
            image: opportunity.image().to_string(),
            category_label: opportunity.kind.label(),
            deadline_label: opportunity.formatted_deadline(),
            opportunity,
        }
    }
}

#[derive(Debug, Serialize)]
struct ListResponse {
    count: usize,
    opportunities: Vec<OpportunityView>,
}

#[derive(Debug, Serialize)]
struct CategoryOption {
    value: &'static str,
    label: &'static str,
}

#[derive(Debug, Serialize)]
struct FilterOptions {
    categories: Vec<CategoryOption>,
    locations: Vec<&'static str>,
    deadline_windows: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/api/opportunities",
            get(list_handler).post(create_handler),
        )
        .route(
            "/api/opportunities/{id}",
            get(detail_handler)
                .put(update_handler)
                .delete(delete_handler),
        )
        .route("/api/tags", get(tags_handler))
        .route("/api/filters", get(filters_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "catalog api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let (criteria, rejected) = FilterCriteria::parse_lenient(&raw_filter_query(pairs));
    for err in &rejected {
        debug!(error = %err, "ignoring filter value");
    }
    match state.service.search(&criteria, state.today()).await {
        Ok(items) => Json(ListResponse {
            count: items.len(),
            opportunities: items.into_iter().map(OpportunityView::from).collect(),
        })
        .into_response(),
        Err(err) => service_error(err),
    }
}

async fn detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.service.get_opportunity(&id).await {
        Ok(Some(opportunity)) => Json(OpportunityView::from(opportunity)).into_response(),
        Ok(None) => service_error(ServiceError::NotFound(id)),
        Err(err) => service_error(err),
    }
}

async fn create_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<OpportunityInput>, JsonRejection>,
) -> Response {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return rejected_body(rejection),
    };
    match state.service.create_opportunity(input).await {
        Ok(opportunity) => {
            (StatusCode::CREATED, Json(OpportunityView::from(opportunity))).into_response()
        }
        Err(err) => service_error(err),
    }
}

async fn update_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    body: Result<Json<OpportunityPatch>, JsonRejection>,
) -> Response {
    let patch = match body {
        Ok(Json(patch)) => patch,
        Err(rejection) => return rejected_body(rejection),
    };
    match state.service.update_opportunity(&id, patch).await {
        Ok(opportunity) => Json(OpportunityView::from(opportunity)).into_response(),
        Err(err) => service_error(err),
    }
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.service.delete_opportunity(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => service_error(err),
    }
}

async fn tags_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.all_tags().await {
        Ok(tags) => Json(serde_json::json!({ "tags": tags })).into_response(),
        Err(err) => service_error(err),
    }
}

async fn filters_handler() -> Json<FilterOptions> {
    Json(FilterOptions {
        categories: OpportunityKind::ALL
            .iter()
            .map(|kind| CategoryOption {
                value: kind.as_str(),
                label: kind.label(),
            })
            .collect(),
        locations: LOCATION_OPTIONS.to_vec(),
        deadline_windows: DEADLINE_WINDOW_OPTIONS.to_vec(),
    })
}

/// Malformed or mistyped request bodies, e.g. an unknown `type`.
fn rejected_body(rejection: JsonRejection) -> Response {
    debug!(error = %rejection.body_text(), "rejected request body");
    error_body(rejection.status(), rejection.body_text(), false)
}

fn error_body(status: StatusCode, error: String, retryable: bool) -> Response {
    (status, Json(ErrorBody { error, retryable })).into_response()
}

fn service_error(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Store(_) | ServiceError::TagSync { .. } => StatusCode::BAD_GATEWAY,
    };
    if status == StatusCode::BAD_GATEWAY {
        error!(error = %err, "catalog request failed");
    }
    error_body(status, err.to_string(), err.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use scout_core::{OpportunityRow, Tag, TagLink};
    use scout_storage::{CatalogStore, MemoryStore, StoreError};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn input(
        title: &str,
        kind: OpportunityKind,
        location: &str,
        deadline: (i32, u32, u32),
        tags: &[&str],
    ) -> OpportunityInput {
        OpportunityInput {
            title: title.to_string(),
            organization: "Example Org".to_string(),
            kind,
            description: format!("{title} blurb"),
            full_description: String::new(),
            deadline: NaiveDate::from_ymd_opt(deadline.0, deadline.1, deadline.2).unwrap(),
            location: location.to_string(),
            amount: None,
            url: "https://example.org".to_string(),
            image_url: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    async fn seeded_app(store: Arc<dyn CatalogStore>) -> Router {
        let service = CatalogService::new(store);
        service
            .seed_if_empty(vec![
                input(
                    "Rhodes Scholarship",
                    OpportunityKind::Scholarship,
                    "United Kingdom",
                    (2026, 3, 20),
                    &["graduate", "oxford"],
                ),
                input(
                    "Climate Summit",
                    OpportunityKind::Summit,
                    "Global",
                    (2026, 4, 20),
                    &["climate"],
                ),
                input(
                    "Civic Internship",
                    OpportunityKind::Internship,
                    "United States",
                    (2026, 6, 30),
                    &[],
                ),
            ])
            .await
            .unwrap();
        app(AppState::new(service).with_today(today()))
    }

    async fn memory_app() -> Router {
        seeded_app(Arc::new(MemoryStore::new())).await
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn titles(body: &Value) -> Vec<String> {
        body["opportunities"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["title"].as_str().unwrap().to_string())
            .collect()
    }

    async fn first_id(app: &Router) -> String {
        let body = json_body(get(app, "/api/opportunities").await).await;
        body["opportunities"][0]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let app = memory_app().await;
        let resp = get(&app, "/healthz").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_without_filters_returns_everything_by_deadline() {
        let app = memory_app().await;
        let resp = get(&app, "/api/opportunities").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["count"], 3);
        assert_eq!(
            titles(&body),
            vec!["Rhodes Scholarship", "Climate Summit", "Civic Internship"]
        );
    }

    #[tokio::test]
    async fn list_applies_filter_groups() {
        let app = memory_app().await;

        let body = json_body(get(&app, "/api/opportunities?category=summit,internship").await).await;
        assert_eq!(titles(&body), vec!["Climate Summit", "Civic Internship"]);

        let body =
            json_body(get(&app, "/api/opportunities?location=International&deadline=30").await)
                .await;
        assert_eq!(titles(&body), vec!["Rhodes Scholarship"]);

        let body = json_body(get(&app, "/api/opportunities?q=OXFORD").await).await;
        assert_eq!(titles(&body), vec!["Rhodes Scholarship"]);
    }

    #[tokio::test]
    async fn malformed_filter_values_are_ignored() {
        let app = memory_app().await;

        let body = json_body(get(&app, "/api/opportunities?deadline=soon,60").await).await;
        assert_eq!(titles(&body), vec!["Rhodes Scholarship", "Climate Summit"]);

        let body = json_body(get(&app, "/api/opportunities?category=bogus").await).await;
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn repeated_filter_keys_accumulate() {
        let app = memory_app().await;

        let resp = get(&app, "/api/opportunities?category=summit&category=internship").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(titles(&body), vec!["Climate Summit", "Civic Internship"]);

        let resp = get(&app, "/api/opportunities?deadline=30&deadline=60").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(titles(&body), vec!["Rhodes Scholarship", "Climate Summit"]);

        let body = json_body(
            get(
                &app,
                "/api/opportunities?category=summit&category=scholarship,internship&page=2",
            )
            .await,
        )
        .await;
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn detail_includes_display_fields() {
        let app = memory_app().await;
        let id = first_id(&app).await;

        let resp = get(&app, &format!("/api/opportunities/{id}")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["type"], "scholarship");
        assert_eq!(body["image"], "/assets/scholarship.jpg");
        assert_eq!(body["category_label"], "Scholarship");
        assert_eq!(body["deadline_label"], "Friday, March 20, 2026");
        assert_eq!(body["tags"], json!(["graduate", "oxford"]));
    }

    #[tokio::test]
    async fn detail_of_unknown_id_is_404() {
        let app = memory_app().await;
        let resp = get(&app, "/api/opportunities/does-not-exist").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn create_then_update_replaces_tags() {
        let app = memory_app().await;
        let resp = send_json(
            &app,
            "POST",
            "/api/opportunities",
            json!({
                "title": "Founders Award",
                "organization": "Seed Fund",
                "type": "competition",
                "deadline": "2026-05-01",
                "location": "Remote",
                "url": "https://seed.example",
                "tags": ["startup", "remote", "startup"]
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = json_body(resp).await;
        assert_eq!(created["tags"], json!(["startup", "remote"]));
        let id = created["id"].as_str().unwrap().to_string();

        let resp = send_json(
            &app,
            "PUT",
            &format!("/api/opportunities/{id}"),
            json!({ "tags": ["seed"], "amount": "$5,000" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let updated = json_body(resp).await;
        assert_eq!(updated["tags"], json!(["seed"]));
        assert_eq!(updated["amount"], "$5,000");
        assert_eq!(updated["title"], "Founders Award");

        let tags = json_body(get(&app, "/api/tags").await).await;
        let names = tags["tags"].as_array().unwrap();
        assert!(names.contains(&json!("seed")));
        assert!(names.contains(&json!("startup")));
    }

    #[tokio::test]
    async fn create_with_blank_title_is_422() {
        let app = memory_app().await;
        let resp = send_json(
            &app,
            "POST",
            "/api/opportunities",
            json!({
                "title": " ",
                "organization": "Seed Fund",
                "type": "summit",
                "deadline": "2026-05-01",
                "url": "https://seed.example"
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(resp).await;
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn unknown_category_in_body_gets_json_error() {
        let app = memory_app().await;
        let resp = send_json(
            &app,
            "POST",
            "/api/opportunities",
            json!({
                "title": "Some Fellowship",
                "organization": "Org",
                "type": "fellowship",
                "deadline": "2026-05-01",
                "url": "https://fellowship.example"
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
        let body = json_body(resp).await;
        assert_eq!(body["retryable"], false);
        assert!(body["error"].as_str().unwrap().contains("fellowship"));

        let id = first_id(&app).await;
        let resp = send_json(
            &app,
            "PUT",
            &format!("/api/opportunities/{id}"),
            json!({ "type": "fellowship" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(resp).await;
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn delete_then_lookup_is_404() {
        let app = memory_app().await;
        let id = first_id(&app).await;
        let uri = format!("/api/opportunities/{id}");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(&uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(get(&app, &uri).await.status(), StatusCode::NOT_FOUND);

        let body = json_body(get(&app, "/api/opportunities").await).await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn filter_options_list_every_category() {
        let app = memory_app().await;
        let body = json_body(get(&app, "/api/filters").await).await;
        assert_eq!(
            body["categories"].as_array().unwrap().len(),
            OpportunityKind::ALL.len()
        );
        assert_eq!(body["deadline_windows"], json!([30, 60, 90]));
        assert!(body["locations"]
            .as_array()
            .unwrap()
            .contains(&json!("International")));
    }

    /// Memory store whose link inserts fail once `broken` is set.
    struct BrokenLinks {
        inner: MemoryStore,
        broken: std::sync::atomic::AtomicBool,
    }

    impl BrokenLinks {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                broken: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn break_links(&self) {
            self.broken
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CatalogStore for BrokenLinks {
        async fn list_opportunities(&self) -> Result<Vec<OpportunityRow>, StoreError> {
            self.inner.list_opportunities().await
        }

        async fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>, StoreError> {
            self.inner.get_opportunity(id).await
        }

        async fn insert_opportunity(
            &self,
            input: &OpportunityInput,
        ) -> Result<OpportunityRow, StoreError> {
            self.inner.insert_opportunity(input).await
        }

        async fn update_opportunity(
            &self,
            id: &str,
            patch: &OpportunityPatch,
        ) -> Result<Option<OpportunityRow>, StoreError> {
            self.inner.update_opportunity(id, patch).await
        }

        async fn delete_opportunity(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_opportunity(id).await
        }

        async fn list_tags_for_opportunity(&self, id: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_tags_for_opportunity(id).await
        }

        async fn list_tag_names(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_tag_names().await
        }

        async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, StoreError> {
            self.inner.find_tag_by_name(name).await
        }

        async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
            self.inner.create_tag(name).await
        }

        async fn delete_associations(&self, opportunity_id: &str) -> Result<(), StoreError> {
            self.inner.delete_associations(opportunity_id).await
        }

        async fn insert_associations(&self, links: &[TagLink]) -> Result<(), StoreError> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Backend("link table unavailable".to_string()));
            }
            self.inner.insert_associations(links).await
        }
    }

    #[tokio::test]
    async fn tag_sync_failure_is_reported_as_retryable() {
        let store = Arc::new(BrokenLinks::new());
        let app = seeded_app(store.clone()).await;
        store.break_links();

        let resp = send_json(
            &app,
            "POST",
            "/api/opportunities",
            json!({
                "title": "Late Entry",
                "organization": "Org",
                "type": "summit",
                "deadline": "2026-05-01",
                "url": "https://late.example",
                "tags": ["late"]
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert_eq!(body["retryable"], true);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("tags could not be synchronized"));

        // The row itself was saved before the tag step failed.
        let listed = json_body(get(&app, "/api/opportunities?q=late%20entry").await).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["opportunities"][0]["tags"], json!([]));
    }
}
