use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::analytics::ip_extractor::{extract_country_hint, extract_proxy_ip};
use crate::analytics::models::{BeaconRequest, Dimension, StatRow, StatsQuery};
use crate::analytics::query::{default_window, QueryError};
use crate::analytics::{GeoIpService, IngestError, IngestPipeline, QueryService};
use crate::config::TrackingConfig;

use super::static_files;

const BEACON_CACHE_CONTROL: &str = "public, max-age=3600, s-maxage=3600, must-revalidate";
const SCRIPT_CACHE_CONTROL: &str = "public, max-age=86400";
const TRACK_URL_PLACEHOLDER: &str = "__TRACK_URL__";

pub struct AppState {
    pub pipeline: IngestPipeline,
    pub queries: QueryService,
    pub tracking: TrackingConfig,
    pub geoip: GeoIpService,
    /// Tracking script with the beacon URL filled in
    pub script: String,
}

impl AppState {
    pub fn new(
        pipeline: IngestPipeline,
        queries: QueryService,
        tracking: TrackingConfig,
        geoip: GeoIpService,
        track_url: &str,
    ) -> anyhow::Result<Self> {
        let template = static_files::embedded_text("tracking.js")
            .ok_or_else(|| anyhow::anyhow!("embedded tracking.js is missing"))?;

        Ok(Self {
            pipeline,
            queries,
            tracking,
            geoip,
            script: template.replace(TRACK_URL_PLACEHOLDER, track_url),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackParams {
    pub url: Option<String>,
    pub referrer: Option<String>,
}

impl TrackParams {
    /// Fill gaps from a form-encoded POST body
    fn or_form(mut self, body: &[u8]) -> Self {
        if body.is_empty() {
            return self;
        }
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                "url" if self.url.is_none() => self.url = Some(value.into_owned()),
                "referrer" if self.referrer.is_none() => {
                    self.referrer = Some(value.into_owned())
                }
                _ => {}
            }
        }
        self
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Beacon endpoint hit by the tracking script
pub async fn track(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<TrackParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let url_in_query = params.url.as_deref().is_some_and(|u| !u.is_empty());
    let params = params.or_form(&body);

    let proxy_ip_hint = extract_proxy_ip(&headers, &state.tracking);
    let visitor_ip = proxy_ip_hint.unwrap_or(addr.ip());
    let country_hint = extract_country_hint(&headers, &state.tracking)
        .or_else(|| state.geoip.country_code(visitor_ip));

    let request = BeaconRequest {
        url: params.url,
        user_agent: header_str(&headers, header::USER_AGENT).unwrap_or_default(),
        referrer: params
            .referrer
            .filter(|r| !r.is_empty())
            .or_else(|| header_str(&headers, header::REFERER)),
        client_ip: addr.ip(),
        proxy_ip_hint,
        country_hint,
    };

    match state.pipeline.ingest(request).await {
        Ok(_) => {
            let mut response = StatusCode::OK.into_response();
            if url_in_query {
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    header::HeaderValue::from_static(BEACON_CACHE_CONTROL),
                );
            }
            Ok(response)
        }
        Err(IngestError::MissingUrl) => {
            debug!(remote_addr = %addr, "beacon without url parameter");
            Err(api_error(
                StatusCode::BAD_REQUEST,
                "Missing 'url' parameter",
            ))
        }
        Err(err @ IngestError::MalformedUrl(_)) => {
            debug!(remote_addr = %addr, error = %err, "beacon with malformed url");
            Err(api_error(StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err @ IngestError::Storage(_)) => {
            error!(error = %err, "failed to track pageview");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to track pageview",
            ))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub domain: Option<String>,
    pub aggregate: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl StatsParams {
    fn into_query(self, table: Dimension) -> Result<StatsQuery, ApiError> {
        let domain = self
            .domain
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing domain parameter"))?;

        let (default_start, default_end) = default_window();
        let start_day = parse_day("start", self.start.as_deref())?.unwrap_or(default_start);
        let end_day = parse_day("end", self.end.as_deref())?.unwrap_or(default_end);

        let aggregate = self
            .aggregate
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Ok(StatsQuery {
            table,
            domain,
            start_day,
            end_day,
            aggregate,
        })
    }
}

fn parse_day(name: &str, value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid {name} date '{raw}', expected YYYY-MM-DD"),
                )
            }),
    }
}

/// Rows keyed by the table's column name: `{"path": "/", "day": .., "visitors": ..}`
fn render_rows(table: Dimension, rows: Vec<StatRow>) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            let mut object = Map::new();
            if let Some(value) = row.value {
                object.insert(table.column().to_string(), Value::String(value));
            }
            object.insert("day".to_string(), json!(row.day));
            object.insert("visitors".to_string(), json!(row.visitors));
            Value::Object(object)
        })
        .collect()
}

async fn run_stats(
    state: &AppState,
    table: Dimension,
    params: StatsParams,
) -> Result<Json<Vec<Value>>, ApiError> {
    let query = params.into_query(table)?;

    match state.queries.query(&query).await {
        Ok(rows) => Ok(Json(render_rows(table, rows))),
        Err(err @ QueryError::AggregateUnsupported(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err @ QueryError::Storage(_)) => {
            error!(table = %table, domain = %query.domain, error = %err, "failed to query stats");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch stats",
            ))
        }
    }
}

/// Page stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    run_stats(&state, Dimension::Pages, params).await
}

/// Stats for a named table: pages, countries or sources
pub async fn table_stats(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let table = table
        .parse::<Dimension>()
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e))?;
    run_stats(&state, table, params).await
}

pub async fn tracking_script(State(state): State<Arc<AppState>>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, SCRIPT_CACHE_CONTROL),
        ],
        state.script.clone(),
    )
        .into_response()
}

pub async fn index() -> Response {
    static_files::serve_embedded("index.html")
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}
