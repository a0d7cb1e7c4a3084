//! HTTP control API.
//!
//! Routes:
//!
//! | Method | Path            | Effect                                        |
//! |--------|-----------------|-----------------------------------------------|
//! | GET    | `/config/all`   | directive store snapshot                      |
//! | GET    | `/config/:key`  | directive value (live `CONFIG GET` + cache)   |
//! | PUT    | `/config/:key`  | live `CONFIG SET`, then store                 |
//! | PUT    | `/option/:key`  | store only, optional restart                  |
//! | GET    | `/start`        | start the server                              |
//! | GET    | `/stop`         | stop the server                               |
//! | GET    | `/restart`      | stop, then start                              |
//! | GET    | `/status`       | supervisor state and server info              |
//!
//! Every directive and lifecycle route answers with an [`Envelope`].
//! A body that is not valid JSON is answered with HTTP 422 and the plain
//! text `JSON Parse failure`.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use gordo_core::directive::MAXMEMORY;
use gordo_core::metrics as m;
use gordo_core::{ControlError, SetOutcome};
use gordo_supervisor::{ControlClient, ServerInfo, Supervisor, SupervisorState};

/// Body text for requests whose JSON cannot be decoded.
pub const PARSE_FAILURE: &str = "JSON Parse failure";

/// Shared handler state.
pub struct AppState<C> {
    pub supervisor: Supervisor<C>,
    pub started: Instant,
}

impl<C> AppState<C> {
    pub fn new(supervisor: Supervisor<C>) -> Self {
        Self {
            supervisor,
            started: Instant::now(),
        }
    }
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            supervisor: self.supervisor.clone(),
            started: self.started,
        }
    }
}

/// Outcome reported in [`Envelope::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "prohibited")]
    Prohibited,
    #[serde(rename = "connection error")]
    ConnectionError,
    #[serde(rename = "error")]
    Error,
}

impl ApiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Prohibited => "prohibited",
            Self::ConnectionError => "connection error",
            Self::Error => "error",
        }
    }
}

/// Response envelope shared by all directive and lifecycle routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub message: String,
    pub status: ApiStatus,
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: ApiStatus::Success,
            data: None,
        }
    }

    fn with_data(mut self, data: impl Into<serde_json::Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    fn prohibited(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: ApiStatus::Prohibited,
            data: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: ApiStatus::Error,
            data: None,
        }
    }

    fn from_control(err: &ControlError) -> Self {
        Self {
            message: err.to_string(),
            status: if err.is_connection() {
                ApiStatus::ConnectionError
            } else {
                ApiStatus::Error
            },
            data: None,
        }
    }
}

/// `PUT /config/:key` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DirectiveRequest {
    #[serde(rename = "Directive", alias = "directive")]
    pub directive: String,
    #[serde(rename = "Value", alias = "value")]
    pub value: String,
}

/// `PUT /option/:key` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OptionRequest {
    #[serde(rename = "Option", alias = "option")]
    pub option: String,
    #[serde(rename = "Value", alias = "value")]
    pub value: String,
    #[serde(rename = "Restart", alias = "restart")]
    pub restart: bool,
}

/// `GET /status` body.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: SupervisorState,
    pub server: ServerInfo,
    pub protection_active: bool,
    pub directives: usize,
    pub uptime_secs: u64,
}

/// Build the control API router.
pub fn router<C: ControlClient>(state: AppState<C>) -> Router {
    Router::new()
        .route("/config/all", get(config_all::<C>))
        .route(
            "/config/:key",
            get(get_directive::<C>).put(set_directive::<C>),
        )
        .route("/option/:key", put(set_option::<C>))
        .route("/start", get(start_server::<C>))
        .route("/stop", get(stop_server::<C>))
        .route("/restart", get(restart_server::<C>))
        .route("/status", get(status::<C>))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

async fn trace_request(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "api",
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    );
    async move {
        let response = next.run(request).await;
        tracing::debug!(status = response.status().as_u16(), "request complete");
        response
    }
    .instrument(span)
    .await
}

fn reply(route: &'static str, envelope: Envelope) -> Response {
    metrics::counter!(
        m::API_REQUESTS_TOTAL,
        m::LABEL_ROUTE => route,
        m::LABEL_STATUS => envelope.status.as_str()
    )
    .increment(1);
    Json(envelope).into_response()
}

fn parse_body<T: DeserializeOwned>(route: &'static str, body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "request body rejected");
        metrics::counter!(
            m::API_REQUESTS_TOTAL,
            m::LABEL_ROUTE => route,
            m::LABEL_STATUS => "parse failure"
        )
        .increment(1);
        (StatusCode::UNPROCESSABLE_ENTITY, PARSE_FAILURE).into_response()
    })
}

fn count_write(result: &'static str) {
    metrics::counter!(m::DIRECTIVE_WRITES_TOTAL, m::LABEL_RESULT => result).increment(1);
}

fn pick_key(from_body: String, from_path: String) -> String {
    if from_body.is_empty() { from_path } else { from_body }
}

async fn config_all<C: ControlClient>(
    State(state): State<AppState<C>>,
) -> Json<BTreeMap<String, String>> {
    Json(state.supervisor.store().snapshot().into_iter().collect())
}

async fn get_directive<C: ControlClient>(
    State(state): State<AppState<C>>,
    Path(key): Path<String>,
) -> Response {
    const ROUTE: &str = "get_directive";
    let store = state.supervisor.store();

    if key == MAXMEMORY {
        let envelope = match store.get(MAXMEMORY) {
            Ok(value) => Envelope::success("").with_data(value),
            Err(e) => Envelope::error(e.to_string()),
        };
        return reply(ROUTE, envelope);
    }

    let envelope = match state.supervisor.get_live_config(&key).await {
        Ok(value) => {
            if let Err(e) = store.set(key.as_str(), value.as_str()) {
                tracing::debug!(key = %key, error = %e, "live value not cached");
            }
            Envelope::success("").with_data(value)
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "live config read failed");
            Envelope::from_control(&e)
        }
    };
    reply(ROUTE, envelope)
}

async fn set_directive<C: ControlClient>(
    State(state): State<AppState<C>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    const ROUTE: &str = "set_directive";
    let request: DirectiveRequest = match parse_body(ROUTE, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let key = pick_key(request.directive, key);
    let value = request.value;
    let store = state.supervisor.store();

    if value.is_empty() {
        count_write("invalid");
        return reply(ROUTE, Envelope::error(format!("no value given for '{key}'")));
    }

    if store.is_protected(&key) {
        tracing::info!(key = %key, value = %value, "protected directive change refused");
        count_write("prohibited");
        let message = if key == MAXMEMORY {
            "Altering maxmemory not allowed".to_owned()
        } else {
            format!("Altering {key} not allowed")
        };
        return reply(ROUTE, Envelope::prohibited(message));
    }

    if let Err(e) = state.supervisor.set_live_config(&key, &value).await {
        tracing::warn!(key = %key, value = %value, error = %e, "live config change failed");
        count_write("failed");
        return reply(ROUTE, Envelope::from_control(&e));
    }

    let envelope = match store.set(key.as_str(), value.as_str()) {
        Ok(SetOutcome::Applied) => {
            tracing::info!(key = %key, value = %value, "directive changed");
            count_write("applied");
            Envelope::success("")
        }
        Ok(SetOutcome::Prohibited) => {
            count_write("prohibited");
            Envelope::prohibited(format!("Altering {key} not allowed"))
        }
        Err(e) => {
            count_write("invalid");
            Envelope::error(e.to_string())
        }
    };
    reply(ROUTE, envelope)
}

async fn set_option<C: ControlClient>(
    State(state): State<AppState<C>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    const ROUTE: &str = "set_option";
    let request: OptionRequest = match parse_body(ROUTE, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let key = pick_key(request.option, key);

    let mut envelope = match state.supervisor.store().set(key.as_str(), request.value.as_str()) {
        Ok(SetOutcome::Applied) => {
            tracing::info!(key = %key, value = %request.value, "option changed");
            count_write("applied");
            Envelope::success("changed")
        }
        Ok(SetOutcome::Prohibited) => {
            count_write("prohibited");
            let message = if key == MAXMEMORY {
                "Altering Redis' Maximum memory not allowed".to_owned()
            } else {
                format!("Altering {key} not allowed")
            };
            Envelope::prohibited(message)
        }
        Err(e) => {
            count_write("invalid");
            Envelope::error(e.to_string())
        }
    };

    if request.restart {
        if let Err(e) = state.supervisor.restart().await {
            tracing::error!(error = %e, "restart after option change failed");
            envelope = Envelope::error(e.to_string());
        }
    }
    reply(ROUTE, envelope)
}

async fn start_server<C: ControlClient>(State(state): State<AppState<C>>) -> Response {
    let envelope = match state.supervisor.start().await {
        Ok(()) => Envelope::success("started"),
        Err(e) => {
            tracing::error!(error = %e, "start via API failed");
            Envelope::error(e.to_string())
        }
    };
    reply("start", envelope)
}

async fn stop_server<C: ControlClient>(State(state): State<AppState<C>>) -> Response {
    let envelope = match state.supervisor.stop().await {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, "server stopped via API");
            Envelope::success("shutdown complete")
        }
        Err(e) => {
            tracing::error!(error = %e, "stop via API failed");
            Envelope::error(e.to_string())
        }
    };
    reply("stop", envelope)
}

async fn restart_server<C: ControlClient>(State(state): State<AppState<C>>) -> Response {
    let envelope = match state.supervisor.restart().await {
        Ok(_) => Envelope::success("restarted"),
        Err(e) => {
            tracing::error!(error = %e, "restart via API failed");
            Envelope::error(e.to_string())
        }
    };
    reply("restart", envelope)
}

async fn status<C: ControlClient>(State(state): State<AppState<C>>) -> Json<StatusReport> {
    let store = state.supervisor.store();
    Json(StatusReport {
        state: state.supervisor.state(),
        server: state.supervisor.info(),
        protection_active: store.protection_active(),
        directives: store.len(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}
