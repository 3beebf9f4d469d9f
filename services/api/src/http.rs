//! HTTP endpoint handlers

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_engine::{HealthRegistry, RelayStats};
use replay_store::ReplayStore;
use transfer_manager::{TransferError, TransferManager};
use types::TransferRequest;

/// Shared state behind every HTTP handler
#[derive(Clone)]
pub struct BridgeApi {
    manager: Arc<TransferManager>,
    replay: Arc<ReplayStore>,
    stats: Arc<RelayStats>,
    health: Arc<HealthRegistry>,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    code: &'a str,
    message: String,
}

impl BridgeApi {
    pub fn new(
        manager: Arc<TransferManager>,
        replay: Arc<ReplayStore>,
        stats: Arc<RelayStats>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            manager,
            replay,
            stats,
            health,
        }
    }

    /// Bind and spawn the server; returns the bound address and the task
    pub fn spawn(self, addr: SocketAddr) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        let api = self.clone();
        let make_svc = make_service_fn(move |_conn| {
            let api = api.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let api = api.clone();
                    async move { Ok::<_, Infallible>(api.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        let bound = server.local_addr();
        info!("bridge api listening on http://{bound}");

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                warn!("bridge api server error: {e}");
            }
        });
        Ok((bound, task))
    }

    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{method} {path}");

        match path.as_str() {
            "/api/validate-transfer" if method == Method::POST => self.validate_transfer(req).await,
            "/api/initiate-transfer" if method == Method::POST => self.initiate_transfer(req).await,
            "/api/supported-pairs" if method == Method::GET => json_ok(&self.manager.pairs()),
            "/api/stats" if method == Method::GET => {
                json_ok(&self.stats.snapshot(self.manager.total_transactions() as u64))
            }
            "/api/health" if method == Method::GET => self.health_report(),
            p if p.starts_with("/api/transfer-status/") && method == Method::GET => {
                let id = p.trim_start_matches("/api/transfer-status/");
                self.transfer_status(id)
            }
            _ => error_response(StatusCode::NOT_FOUND, "not_found", "no such endpoint"),
        }
    }

    async fn validate_transfer(&self, req: Request<Body>) -> Response<Body> {
        let request: TransferRequest = match read_json(req).await {
            Ok(request) => request,
            Err(response) => return response,
        };
        json_ok(&self.manager.validate(&request))
    }

    async fn initiate_transfer(&self, req: Request<Body>) -> Response<Body> {
        let request: TransferRequest = match read_json(req).await {
            Ok(request) => request,
            Err(response) => return response,
        };

        match self.manager.accept(request).await {
            Ok(response) => json_ok(&json!({
                "request_id": response.request_id,
                "state": response.state,
                "estimated_time": response.estimated_duration_secs,
                "required_confirmations": response.required_confirmations,
            })),
            Err(TransferError::ValidationFailed { summary, result, .. }) => {
                let mut response = error_body(
                    "validation_failed",
                    format!("request failed validation: {summary}"),
                );
                response["errors"] = serde_json::to_value(&result.errors).unwrap_or_default();
                json_with_status(StatusCode::BAD_REQUEST, &response)
            }
            Err(TransferError::NotRunning) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "not_running",
                "bridge is not accepting transfers",
            ),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
        }
    }

    fn transfer_status(&self, id: &str) -> Response<Body> {
        match self.manager.status_of(id) {
            Ok(response) => json_ok(&response),
            Err(TransferError::UnknownRequest(id)) => error_response(
                StatusCode::NOT_FOUND,
                "unknown_request",
                format!("no transfer with id {id}"),
            ),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
        }
    }

    fn health_report(&self) -> Response<Body> {
        let store_stats = self.replay.stats();
        let sources = self.health.source_workers();
        let destinations = self.health.destination_workers();
        let healthy = self.health.all_healthy();

        let body = json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "replay_store": {
                "healthy": true,
                "fingerprints": store_stats.count,
                "oldest_observed_at_ms": store_stats.oldest_observed_at_ms,
            },
            "source_workers": sources,
            "destination_workers": destinations,
        });
        let status = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        json_with_status(status, &body)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Body>,
) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body()).await.map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "bad_body", format!("body read: {e}"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "bad_json",
            format!("body decode: {e}"),
        )
    })
}

fn json_ok<T: Serialize>(value: &T) -> Response<Body> {
    json_with_status(StatusCode::OK, value)
}

fn json_with_status<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("static response parts")
}

fn error_body(code: &str, message: String) -> serde_json::Value {
    serde_json::to_value(ApiErrorBody { code, message }).expect("error body serializes")
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response<Body> {
    json_with_status(status, &error_body(code, message.into()))
}
