//! In-memory FHIR server used to exercise the client over real HTTP.
//!
//! Supports create, read, update, delete and search for any resource type.
//! Resources live in a map keyed by `(type, id)`; every write bumps the
//! version reported in `meta.versionId` and the `ETag` header. Failures are
//! answered with an OperationOutcome body.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{
        header::{CONTENT_TYPE, ETAG, HOST, LAST_MODIFIED, LOCATION},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use url::form_urlencoded;
use uuid::Uuid;

pub const FHIR_JSON: &str = "application/fhir+json";

/// Page size when a search has no `_count`.
pub const DEFAULT_COUNT: usize = 10;

#[derive(Clone, Debug)]
pub struct Stored {
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub resource: Value,
}

pub type Db = Arc<RwLock<BTreeMap<(String, String), Stored>>>;

pub fn app() -> Router {
    app_with(Db::default())
}

pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/fhir/{resource_type}", get(search_get).post(create))
        .route(
            "/fhir/{resource_type}/_search",
            get(search_get).post(search_post),
        )
        .route(
            "/fhir/{resource_type}/{id}",
            get(read).put(update).delete(delete),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// A failed interaction, rendered as an OperationOutcome.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    diagnostics: String,
}

impl ApiError {
    fn not_found(resource_type: &str, id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not-found",
            diagnostics: format!("{resource_type}/{id} is not known"),
        }
    }

    fn invalid(diagnostics: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid",
            diagnostics: diagnostics.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(
            status = %self.status,
            code = self.code,
            diagnostics = %self.diagnostics,
            "request rejected"
        );
        let body = operation_outcome("error", self.code, &self.diagnostics);
        (self.status, [(CONTENT_TYPE, FHIR_JSON)], body.to_string()).into_response()
    }
}

pub fn operation_outcome(severity: &str, code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{"severity": severity, "code": code, "diagnostics": diagnostics}]
    })
}

async fn create(
    State(db): State<Db>,
    Path(resource_type): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let resource = parse_resource(&resource_type, &body)?;
    let id = Uuid::new_v4().to_string();
    let stored = stamp(resource, &id, 1);
    db.write()
        .await
        .insert((resource_type.clone(), id.clone()), stored.clone());
    tracing::info!(%resource_type, %id, "created resource");

    let mut response = resource_response(StatusCode::CREATED, &stored);
    if let Ok(location) = HeaderValue::from_str(&format!("/fhir/{resource_type}/{id}/_history/1")) {
        response.headers_mut().insert(LOCATION, location);
    }
    Ok(response)
}

async fn read(
    State(db): State<Db>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = (resource_type, id);
    let db = db.read().await;
    match db.get(&key) {
        Some(stored) => Ok(resource_response(StatusCode::OK, stored)),
        None => Err(ApiError::not_found(&key.0, &key.1)),
    }
}

async fn update(
    State(db): State<Db>,
    Path((resource_type, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let resource = parse_resource(&resource_type, &body)?;
    if let Some(body_id) = resource.get("id").and_then(Value::as_str) {
        if body_id != id {
            return Err(ApiError::invalid(format!(
                "resource id '{body_id}' does not match URL id '{id}'"
            )));
        }
    }

    let mut db = db.write().await;
    let key = (resource_type.clone(), id.clone());
    let (status, version) = match db.get(&key) {
        Some(existing) => (StatusCode::OK, existing.version + 1),
        None => (StatusCode::CREATED, 1),
    };
    let stored = stamp(resource, &id, version);
    db.insert(key, stored.clone());
    tracing::info!(%resource_type, %id, version, "updated resource");
    Ok(resource_response(status, &stored))
}

async fn delete(
    State(db): State<Db>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let mut db = db.write().await;
    match db.remove(&(resource_type.clone(), id.clone())) {
        Some(_) => {
            tracing::info!(%resource_type, %id, "deleted resource");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found(&resource_type, &id)),
    }
}

async fn search_get(
    State(db): State<Db>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let params = parse_params(query.unwrap_or_default().as_bytes());
    search(&db, &resource_type, &headers, &params).await
}

/// POST search: parameters may come from the query string and the form body.
async fn search_post(
    State(db): State<Db>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut params = parse_params(query.unwrap_or_default().as_bytes());
    params.extend(parse_params(&body));
    search(&db, &resource_type, &headers, &params).await
}

async fn search(
    db: &Db,
    resource_type: &str,
    headers: &HeaderMap,
    params: &[(String, String)],
) -> Result<Response, ApiError> {
    check_type(resource_type)?;
    let mut count = DEFAULT_COUNT;
    let mut offset = 0;
    let mut filters: Vec<(&str, &str)> = Vec::new();
    for (key, value) in params {
        match key.as_str() {
            "_count" => count = parse_number(key, value)?,
            "_offset" => offset = parse_number(key, value)?,
            "_id" => filters.push(("id", value.as_str())),
            _ if key.starts_with('_') => {
                return Err(ApiError::invalid(format!(
                    "unsupported search parameter '{key}'"
                )))
            }
            _ => filters.push((key.as_str(), value.as_str())),
        }
    }

    let db = db.read().await;
    let matches: Vec<(&str, &Stored)> = db
        .iter()
        .filter(|((kind, _), _)| kind == resource_type)
        .filter(|(_, stored)| {
            filters
                .iter()
                .all(|(key, value)| matches_filter(&stored.resource, key, value))
        })
        .map(|((_, id), stored)| (id.as_str(), stored))
        .collect();
    let total = matches.len();

    let base = format!("http://{}/fhir", host(headers));
    let kept: Vec<(&str, &str)> = params
        .iter()
        .filter(|(key, _)| key != "_count" && key != "_offset")
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let page_url = |offset: usize| {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter().copied())
            .append_pair("_count", &count.to_string())
            .append_pair("_offset", &offset.to_string())
            .finish();
        format!("{base}/{resource_type}/_search?{query}")
    };

    let mut links = vec![json!({"relation": "self", "url": page_url(offset)})];
    if count > 0 && offset + count < total {
        links.push(json!({"relation": "next", "url": page_url(offset + count)}));
    }
    let entries: Vec<Value> = matches
        .iter()
        .skip(offset)
        .take(count)
        .map(|(id, stored)| {
            json!({
                "fullUrl": format!("{base}/{resource_type}/{id}"),
                "resource": stored.resource,
                "search": {"mode": "match"}
            })
        })
        .collect();
    tracing::debug!(%resource_type, total, offset, count, "search");

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "link": links,
        "entry": entries
    });
    Ok((StatusCode::OK, [(CONTENT_TYPE, FHIR_JSON)], bundle.to_string()).into_response())
}

fn resource_response(status: StatusCode, stored: &Stored) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{}\"", stored.version)) {
        headers.insert(ETAG, etag);
    }
    if let Ok(modified) = HeaderValue::from_str(&http_date(stored.last_modified)) {
        headers.insert(LAST_MODIFIED, modified);
    }
    (status, headers, stored.resource.to_string()).into_response()
}

/// Validate a request body as a resource of `resource_type`.
fn parse_resource(resource_type: &str, body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    check_type(resource_type)?;
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid(format!("invalid JSON body: {e}")))?;
    let Value::Object(resource) = value else {
        return Err(ApiError::invalid("resource must be a JSON object"));
    };
    match resource.get("resourceType").and_then(Value::as_str) {
        Some(kind) if kind == resource_type => Ok(resource),
        Some(kind) => Err(ApiError::invalid(format!(
            "resourceType '{kind}' does not match endpoint '{resource_type}'"
        ))),
        None => Err(ApiError::invalid("resourceType missing")),
    }
}

/// Resource type names are alphanumeric and start with an uppercase letter.
fn check_type(resource_type: &str) -> Result<(), ApiError> {
    let valid = resource_type.starts_with(|c: char| c.is_ascii_uppercase())
        && resource_type.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ApiError::invalid(format!(
            "unknown resource type '{resource_type}'"
        )))
    }
}

/// Set the server-managed fields of a resource about to be stored.
fn stamp(mut resource: Map<String, Value>, id: &str, version: u64) -> Stored {
    let now = Utc::now();
    resource.insert("id".to_string(), Value::String(id.to_string()));
    resource.insert(
        "meta".to_string(),
        json!({
            "versionId": version.to_string(),
            "lastUpdated": now.to_rfc3339_opts(SecondsFormat::Millis, true)
        }),
    );
    Stored {
        version,
        last_modified: now,
        resource: Value::Object(resource),
    }
}

fn matches_filter(resource: &Value, key: &str, expected: &str) -> bool {
    match resource.get(key) {
        Some(Value::String(actual)) => actual == expected,
        Some(Value::Bool(actual)) => actual.to_string() == expected,
        Some(Value::Number(actual)) => actual.to_string() == expected,
        _ => false,
    }
}

fn parse_params(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn parse_number(key: &str, value: &str) -> Result<usize, ApiError> {
    value
        .parse()
        .map_err(|_| {
            ApiError::invalid(format!(
                "{key} must be a non-negative integer, got '{value}'"
            ))
        })
}

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
}

/// IMF-fixdate, as used by `Last-Modified`.
pub fn http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
