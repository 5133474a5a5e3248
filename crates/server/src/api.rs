//! JSON API over the routing engine.
//!
//! - `POST /api/v1/leads`                         submit a lead
//! - `GET  /api/v1/leads`, `/api/v1/leads/{id}`    list / detail with delivery history
//! - `POST /api/v1/leads/{id}/reroute`, `/entity`  matcher controls
//! - `GET  /api/v1/deliveries`, `/{id}`            list / detail with leads
//! - `POST /api/v1/deliveries/{id}/{prepare,send,resend,accept,reject,remove}`
//! - `GET  /api/v1/orders`, `PUT /api/v1/orders/{id}`
//! - `POST /api/v1/orders/{id}/toggle-active`, `/hold`, `GET /{id}/stats`
//! - `GET  /api/v1/events`
//!
//! Mutating routes need an `x-actor` header; identity is checked upstream.
//! Every error body is `{"error": ..., "correlation_id": ...}`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use leadflow_core::audit::{EntityType, EventAction, EventFilter};
use leadflow_core::domain::delivery::{Delivery, DeliveryFilter, DeliveryId, DeliveryStatus, RemovalReason};
use leadflow_core::domain::lead::{Lead, LeadFilter, LeadId, LeadStatus};
use leadflow_core::domain::order::{ClientId, EntityCode, Order, OrderId};
use leadflow_core::errors::{ApplicationError, InterfaceError};
use leadflow_core::intake::LeadSubmission;
use leadflow_engine::{
    DeliveryDetail, EngineError, LeadDetail, LeadEngine, LoggedEvent, OperationContext, OrderChange,
    OrderDraft, OrderStats, RejectionReport, RemovalReport, RoutingOutcome, SendReport, SubmitOutcome,
};

pub const ACTOR_HEADER: &str = "x-actor";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    engine: LeadEngine,
}

pub fn router(engine: LeadEngine) -> Router {
    Router::new()
        .route("/api/v1/leads", post(submit_lead).get(list_leads))
        .route("/api/v1/leads/{id}", get(get_lead))
        .route("/api/v1/leads/{id}/reroute", post(reroute_lead))
        .route("/api/v1/leads/{id}/entity", post(assign_entity))
        .route("/api/v1/deliveries", get(list_deliveries))
        .route("/api/v1/deliveries/{id}", get(get_delivery))
        .route("/api/v1/deliveries/{id}/prepare", post(prepare_delivery))
        .route("/api/v1/deliveries/{id}/send", post(send_delivery))
        .route("/api/v1/deliveries/{id}/resend", post(resend_delivery))
        .route("/api/v1/deliveries/{id}/accept", post(accept_delivery))
        .route("/api/v1/deliveries/{id}/reject", post(reject_delivery))
        .route("/api/v1/deliveries/{id}/remove", post(remove_lead))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/{id}", put(upsert_order))
        .route("/api/v1/orders/{id}/toggle-active", post(toggle_order_active))
        .route("/api/v1/orders/{id}/hold", post(set_order_hold))
        .route("/api/v1/orders/{id}/stats", get(order_stats))
        .route("/api/v1/events", get(list_events))
        .with_state(ApiState { engine })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody { error: message.into(), correlation_id: correlation_id.to_string() },
        }
    }

    fn from_engine(error: EngineError, correlation_id: &str) -> Self {
        let mapped = ApplicationError::from(error).into_interface(correlation_id);
        let status = match &mapped {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %mapped.correlation_id(),
                status = status.as_u16(),
                error = %mapped.message(),
                "request failed"
            );
        }
        Self {
            status,
            body: ErrorBody {
                error: mapped.message().to_string(),
                correlation_id: mapped.correlation_id().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Correlation id from the caller, or a fresh one.
fn correlation_id(headers: &HeaderMap) -> String {
    header(headers, CORRELATION_HEADER).unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn actor_context(headers: &HeaderMap) -> Result<OperationContext, ApiError> {
    let correlation_id = correlation_id(headers);
    match header(headers, ACTOR_HEADER) {
        Some(actor) => Ok(OperationContext::new(actor).with_correlation_id(correlation_id)),
        None => Err(ApiError::bad_request("missing x-actor header", &correlation_id)),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes, correlation_id: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|error| ApiError::bad_request(format!("invalid request body: {error}"), correlation_id))
}

fn parse_optional<T>(
    value: Option<&str>,
    field: &str,
    parse: impl Fn(&str) -> Option<T>,
    correlation_id: &str,
) -> Result<Option<T>, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(raw) => parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("invalid `{field}`: {raw}"), correlation_id)),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|timestamp| timestamp.with_timezone(&Utc))
}

async fn submit_lead(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<SubmitOutcome> {
    let correlation_id = correlation_id(&headers);
    let submission: LeadSubmission = parse_body(&body, &correlation_id)?;
    let actor = header(&headers, ACTOR_HEADER).unwrap_or_else(|| {
        format!("source:{}", submission.source.as_deref().map(str::trim).unwrap_or("unknown"))
    });
    let ctx = OperationContext::new(actor).with_correlation_id(correlation_id);

    state
        .engine
        .submit_lead(&ctx, &submission)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Default, Deserialize)]
struct LeadsQuery {
    status: Option<String>,
    entity: Option<String>,
    department: Option<String>,
    product: Option<String>,
    phone: Option<String>,
    order_id: Option<String>,
    submitted_after: Option<String>,
    submitted_before: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

async fn list_leads(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LeadsQuery>,
) -> ApiResult<Vec<Lead>> {
    let correlation_id = correlation_id(&headers);
    let filter = LeadFilter {
        status: parse_optional(query.status.as_deref(), "status", LeadStatus::parse, &correlation_id)?,
        entity: query.entity.map(EntityCode),
        department: query.department,
        product: query.product,
        phone: query.phone,
        order_id: query.order_id.map(OrderId),
        submitted_after: parse_optional(
            query.submitted_after.as_deref(),
            "submitted_after",
            parse_timestamp,
            &correlation_id,
        )?,
        submitted_before: parse_optional(
            query.submitted_before.as_deref(),
            "submitted_before",
            parse_timestamp,
            &correlation_id,
        )?,
        limit: parse_optional(query.limit.as_deref(), "limit", |raw| raw.parse().ok(), &correlation_id)?,
        offset: parse_optional(query.offset.as_deref(), "offset", |raw| raw.parse().ok(), &correlation_id)?,
    };

    state
        .engine
        .list_leads(&filter)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

async fn get_lead(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<LeadDetail> {
    let correlation_id = correlation_id(&headers);
    state
        .engine
        .get_lead(&LeadId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

async fn reroute_lead(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RoutingOutcome> {
    let ctx = actor_context(&headers)?;
    state
        .engine
        .reroute_lead(&ctx, &LeadId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Deserialize)]
struct AssignEntityRequest {
    entity: String,
}

async fn assign_entity(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<RoutingOutcome> {
    let ctx = actor_context(&headers)?;
    let request: AssignEntityRequest = parse_body(&body, &ctx.correlation_id)?;
    state
        .engine
        .assign_entity(&ctx, &LeadId(id), EntityCode(request.entity))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Default, Deserialize)]
struct DeliveriesQuery {
    status: Option<String>,
    order_id: Option<String>,
    client_id: Option<String>,
    entity: Option<String>,
    billable: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

async fn list_deliveries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<DeliveriesQuery>,
) -> ApiResult<Vec<Delivery>> {
    let correlation_id = correlation_id(&headers);
    let filter = DeliveryFilter {
        status: parse_optional(query.status.as_deref(), "status", DeliveryStatus::parse, &correlation_id)?,
        order_id: query.order_id.map(OrderId),
        client_id: query.client_id.map(ClientId),
        entity: query.entity.map(EntityCode),
        billable: parse_optional(query.billable.as_deref(), "billable", |raw| raw.parse().ok(), &correlation_id)?,
        limit: parse_optional(query.limit.as_deref(), "limit", |raw| raw.parse().ok(), &correlation_id)?,
        offset: parse_optional(query.offset.as_deref(), "offset", |raw| raw.parse().ok(), &correlation_id)?,
    };

    state
        .engine
        .list_deliveries(&filter)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

async fn get_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<DeliveryDetail> {
    let correlation_id = correlation_id(&headers);
    state
        .engine
        .get_delivery(&DeliveryId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

async fn prepare_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Delivery> {
    let ctx = actor_context(&headers)?;
    state
        .engine
        .prepare_delivery(&ctx, &DeliveryId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    #[serde(default)]
    force: bool,
}

async fn send_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<SendReport> {
    let ctx = actor_context(&headers)?;
    let request: SendRequest =
        if body.is_empty() { SendRequest::default() } else { parse_body(&body, &ctx.correlation_id)? };
    state
        .engine
        .send_delivery(&ctx, &DeliveryId(id), request.force)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

async fn resend_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<SendReport> {
    let ctx = actor_context(&headers)?;
    state
        .engine
        .resend(&ctx, &DeliveryId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

async fn accept_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Delivery> {
    let ctx = actor_context(&headers)?;
    state
        .engine
        .accept_delivery(&ctx, &DeliveryId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn reject_delivery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<RejectionReport> {
    let ctx = actor_context(&headers)?;
    let request: RejectRequest = parse_body(&body, &ctx.correlation_id)?;
    state
        .engine
        .reject_delivery(&ctx, &DeliveryId(id), &request.reason)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Deserialize)]
struct RemoveRequest {
    lead_id: String,
    reason: String,
    detail: Option<String>,
}

async fn remove_lead(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<RemovalReport> {
    let ctx = actor_context(&headers)?;
    let request: RemoveRequest = parse_body(&body, &ctx.correlation_id)?;
    let reason = RemovalReason::parse(&request.reason).ok_or_else(|| {
        ApiError::bad_request(
            format!(
                "unknown removal reason `{}` (expected duplicate|out_of_zone|wrong_number|unreachable|test_lead|other)",
                request.reason
            ),
            &ctx.correlation_id,
        )
    })?;
    state
        .engine
        .remove_lead(&ctx, &DeliveryId(id), &LeadId(request.lead_id), reason, request.detail.as_deref())
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Default, Deserialize)]
struct OrdersQuery {
    entity: Option<String>,
}

async fn list_orders(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<OrdersQuery>,
) -> ApiResult<Vec<Order>> {
    let correlation_id = correlation_id(&headers);
    let entity = query.entity.filter(|entity| !entity.trim().is_empty()).map(EntityCode);
    state
        .engine
        .list_orders(entity.as_ref())
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

async fn upsert_order(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<OrderChange> {
    let ctx = actor_context(&headers)?;
    let draft: OrderDraft = parse_body(&body, &ctx.correlation_id)?;
    state
        .engine
        .upsert_order(&ctx, OrderId(id), draft)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

async fn toggle_order_active(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<OrderChange> {
    let ctx = actor_context(&headers)?;
    state
        .engine
        .toggle_order_active(&ctx, &OrderId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

#[derive(Debug, Deserialize)]
struct HoldRequest {
    on_hold: bool,
}

async fn set_order_hold(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<OrderChange> {
    let ctx = actor_context(&headers)?;
    let request: HoldRequest = parse_body(&body, &ctx.correlation_id)?;
    state
        .engine
        .set_order_hold(&ctx, &OrderId(id), request.on_hold)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &ctx.correlation_id))
}

async fn order_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<OrderStats> {
    let correlation_id = correlation_id(&headers);
    state
        .engine
        .get_order_stats(&OrderId(id), Utc::now())
        .await
        .map(Json)
        .map_err(|error| ApiError::from_engine(error, &correlation_id))
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    action: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    references: Option<String>,
    actor: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<String>,
}

async fn list_events(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Vec<LoggedEvent>> {
    let correlation_id = correlation_id(&headers);
    let filter = EventFilter {
        action: parse_optional(query.action.as_deref(), "action", EventAction::parse, &correlation_id)?,
        entity_type: parse_optional(query.entity_type.as_deref(), "entity_type", EntityType::parse, &correlation_id)?,
        entity_id: query.entity_id,
        references: query.references,
        actor: query.actor,
        since: parse_optional(query.since.as_deref(), "since", parse_timestamp, &correlation_id)?,
        until: parse_optional(query.until.as_deref(), "until", parse_timestamp, &correlation_id)?,
        limit: parse_optional(query.limit.as_deref(), "limit", |raw| raw.parse().ok(), &correlation_id)?,
    };

    match state.engine.list_events(&filter).await {
        Ok(events) => Ok(Json(events)),
        Err(error) => {
            warn!(
                event_name = "api.events.failed",
                correlation_id = %correlation_id,
                error = %error,
                "event query failed"
            );
            Err(ApiError::from_engine(error, &correlation_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use leadflow_core::config::AppConfig;
    use leadflow_core::transport::NoopTransport;
    use leadflow_db::{connect_with_settings, migrations};
    use leadflow_engine::LeadEngine;

    use super::router;

    async fn app() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrate");
        router(LeadEngine::new(pool, &AppConfig::default(), Arc::new(NoopTransport)))
    }

    async fn call(app: &Router, method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri).header("x-correlation-id", "corr-api");
        if let Some(actor) = actor {
            request = request.header("x-actor", actor);
        }
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).expect("request")).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, value)
    }

    fn order_body() -> Value {
        json!({
            "entity": "north",
            "client_id": "C-1",
            "client_name": "Isolation Nord",
            "product": "pac",
            "departments": ["75"],
            "quota_semaine": 1,
            "prix_lead": "35.00",
            "channels": ["https://client.example/leads"]
        })
    }

    fn lead_body(phone: &str) -> Value {
        json!({
            "phone": phone,
            "name": "Camille Martin",
            "department": "75",
            "product": "pac",
            "entity": "north",
            "source": "landing-a"
        })
    }

    #[tokio::test]
    async fn lead_flows_from_submission_to_rejection() {
        let app = app().await;

        let (status, order) = call(&app, "PUT", "/api/v1/orders/O-1", Some("ops"), Some(order_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["order"]["quota_semaine"], 1);

        let (status, submitted) = call(&app, "POST", "/api/v1/leads", None, Some(lead_body("0611111111"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["outcome"], "routed");
        let delivery_id = submitted["delivery_id"].as_str().expect("delivery").to_string();
        let lead_id = submitted["lead_id"].as_str().expect("lead").to_string();

        let (status, sent) =
            call(&app, "POST", &format!("/api/v1/deliveries/{delivery_id}/send"), Some("ops"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["delivery"]["billable"], true);

        let (status, rejected) = call(
            &app,
            "POST",
            &format!("/api/v1/deliveries/{delivery_id}/reject"),
            Some("ops"),
            Some(json!({ "reason": "client refused" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rejected["released"][0]["quota_released"], true);

        let (status, replay) = call(
            &app,
            "POST",
            &format!("/api/v1/deliveries/{delivery_id}/reject"),
            Some("ops"),
            Some(json!({ "reason": "client refused" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(replay["correlation_id"], "corr-api");

        let (status, lead) = call(&app, "GET", &format!("/api/v1/leads/{lead_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lead["lead"]["status"], "new");

        let (status, events) = call(&app, "GET", "/api/v1/events?action=lead.submitted", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(events["error"].as_str().expect("error").contains("action"));

        let (status, events) = call(&app, "GET", &format!("/api/v1/events?references={lead_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(events.as_array().expect("events").len() >= 3);
    }

    #[tokio::test]
    async fn mutating_routes_require_an_actor() {
        let app = app().await;
        let (status, body) = call(&app, "PUT", "/api/v1/orders/O-1", None, Some(order_body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing x-actor header");
        assert_eq!(body["correlation_id"], "corr-api");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app().await;

        let (status, _) = call(&app, "GET", "/api/v1/deliveries/dlv-missing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/deliveries/dlv-missing/remove",
            Some("ops"),
            Some(json!({ "lead_id": "lead-1", "reason": "bored" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("bored"));

        let (status, _) = call(&app, "POST", "/api/v1/leads", None, Some(json!("not an object"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "GET", "/api/v1/leads?status=lost", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
