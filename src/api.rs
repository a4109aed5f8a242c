//! HTTP API for endorsement distribution
//!
//! Thin transport over [`Resolver::resolve`]: content negotiation, path
//! extraction and RFC 7807 problem details.
//!
//! ## Endpoint Map
//!
//! | Path                                               | Description                 |
//! |----------------------------------------------------|-----------------------------|
//! | `/health`                                          | Load balancer health probe  |
//! | `/.well-known/veraison/endorsement-distribution`   | Service information         |
//! | `/endorsement-distribution/v1/coserv/:query`       | Resolve a CoSERV query      |

use crate::coserv::COSERV_MEDIA_TYPE;
use crate::error::{ErrorClass, ResolveError};
use crate::resolver::Resolver;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Base path of the endorsement distribution API
pub const API_BASE_PATH: &str = "/endorsement-distribution/v1";

/// Well-known service information path
pub const WELL_KNOWN_PATH: &str = "/.well-known/veraison/endorsement-distribution";

const PROBLEM_MEDIA_TYPE: &str = "application/problem+json";

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub tenant_id: Arc<str>,
}

impl AppState {
    pub fn new(resolver: Resolver, tenant_id: &str) -> Self {
        Self {
            resolver: Arc::new(resolver),
            tenant_id: Arc::from(tenant_id),
        }
    }
}

/// Build the HTTP application
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(WELL_KNOWN_PATH, get(service_info))
        .route(
            &format!("{}/coserv/:query", API_BASE_PATH),
            get(coserv_request),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceInfo {
    version: String,
    service_state: String,
    api_endpoints: BTreeMap<String, String>,
    supported_media_types: Vec<String>,
}

async fn service_info() -> impl IntoResponse {
    let mut api_endpoints = BTreeMap::new();
    api_endpoints.insert(
        "coservRequest".to_string(),
        format!("{}/coserv/{{query}}", API_BASE_PATH),
    );

    Json(ServiceInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        service_state: "READY".to_string(),
        api_endpoints,
        supported_media_types: vec![COSERV_MEDIA_TYPE.to_string()],
    })
}

/// GET /endorsement-distribution/v1/coserv/:query
async fn coserv_request(
    State(state): State<AppState>,
    Path(query): Path<String>,
    headers: HeaderMap,
) -> Response {
    // Absent Accept admits anything; an unreadable one admits nothing
    let accept = match headers.get(header::ACCEPT) {
        None => Some("*/*"),
        Some(value) => value.to_str().ok(),
    };

    let Some(negotiated) = accept.and_then(negotiate) else {
        return problem(
            StatusCode::NOT_ACCEPTABLE,
            format!("the only supported output format is {}", COSERV_MEDIA_TYPE),
        );
    };

    tracing::debug!(
        query = %query,
        content_type = %negotiated.content_type(),
        "Processing CoSERV request"
    );

    match state.resolver.resolve(&state.tenant_id, &query).await {
        Ok(body) => {
            let content_type = HeaderValue::from_str(&negotiated.content_type())
                .unwrap_or_else(|_| HeaderValue::from_static(COSERV_MEDIA_TYPE));
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => problem(status_for(&e), e.to_string()),
    }
}

// =============================================================================
// Content negotiation
// =============================================================================

/// Outcome of a successful Accept negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
struct Negotiated {
    profile: Option<String>,
}

impl Negotiated {
    fn content_type(&self) -> String {
        match &self.profile {
            Some(profile) => format!("{}; profile=\"{}\"", COSERV_MEDIA_TYPE, profile),
            None => COSERV_MEDIA_TYPE.to_string(),
        }
    }
}

/// Decide whether `accept` admits CoSERV
///
/// Ranges with `q=0` are refused. The `profile` parameter of an admitting
/// `application/coserv+cbor` range is carried through so the response can
/// echo it, even when a wildcard range appears first.
fn negotiate(accept: &str) -> Option<Negotiated> {
    let mut admitted = false;

    for range in split_unquoted(accept, ',') {
        let mut parts = split_unquoted(range, ';').into_iter().map(str::trim);
        let media = parts.next().unwrap_or_default().to_ascii_lowercase();

        let mut profile = None;
        let mut refused = false;
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "profile" => profile = Some(unquote(value).to_string()),
                "q" => refused = value.parse::<f32>().map(|q| q <= 0.0).unwrap_or(false),
                _ => {}
            }
        }

        if refused {
            continue;
        }
        match media.as_str() {
            COSERV_MEDIA_TYPE => return Some(Negotiated { profile }),
            "application/*" | "*/*" => admitted = true,
            _ => {}
        }
    }

    admitted.then_some(Negotiated { profile: None })
}

/// Split `s` on `sep`, leaving separators inside quoted strings alone
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                pieces.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&s[start..]);
    pieces
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
struct Problem {
    status: u16,
    title: String,
    detail: String,
}

fn status_for(err: &ResolveError) -> StatusCode {
    match err.class() {
        ErrorClass::Client => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Server => match err {
            ResolveError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn problem(status: StatusCode, detail: String) -> Response {
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), detail = %detail, "API error");
    } else {
        tracing::warn!(status = status.as_u16(), detail = %detail, "API error");
    }

    let body = Problem {
        status: status.as_u16(),
        title: status.canonical_reason().unwrap_or_default().to_string(),
        detail,
    };
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_MEDIA_TYPE))],
        Json(body),
    )
        .into_response()
}

// =============================================================================
// Shutdown
// =============================================================================

/// Resolve once the process is asked to stop: Ctrl+C, or SIGTERM on unix
///
/// The SIGTERM handler is installed before this returns, so a signal that
/// arrives while the server is still binding is not lost.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("Shutting down...");
    })
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coserv::{
        Artifact, ArtifactType, ClassSelector, EnvironmentSelector, Query, ResultSet,
    };
    use crate::keys::reference_value_key;
    use crate::store::{EndorsementStore, MemoryStore};
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tower::ServiceExt;

    const PROFILE: &str = "tag:arm.com,2023:cca_platform#1.0.0";
    const IMPL_ID: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

    async fn make_app() -> Router {
        let store = Arc::new(MemoryStore::new());
        store
            .replace(
                &reference_value_key("0", &STANDARD.encode(IMPL_ID)),
                vec![Artifact::new(vec![1]), Artifact::new(vec![2])],
            )
            .await
            .unwrap();
        build_app(AppState::new(Resolver::new(store), "0"), &[])
    }

    fn query_path(artifact_type: ArtifactType, impl_id: &[u8]) -> String {
        let query = Query::new(
            PROFILE,
            artifact_type,
            EnvironmentSelector {
                classes: vec![ClassSelector::from_impl_id(impl_id.to_vec())],
                instances: vec![],
            },
        );
        format!("{}/coserv/{}", API_BASE_PATH, query.to_base64url().unwrap())
    }

    async fn send_get(app: Router, uri: &str, accept: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate(COSERV_MEDIA_TYPE), Some(Negotiated { profile: None }));
        assert_eq!(negotiate("*/*"), Some(Negotiated { profile: None }));
        assert_eq!(
            negotiate("text/html, application/coserv+cbor; profile=\"tag:x,2024:p\""),
            Some(Negotiated {
                profile: Some("tag:x,2024:p".to_string())
            })
        );
        assert_eq!(negotiate("application/json"), None);
        assert_eq!(negotiate("application/coserv+cbor; q=0"), None);
        assert_eq!(negotiate("application/coserv+json"), None);
    }

    #[test]
    fn test_negotiate_keeps_commas_inside_quoted_profile() {
        let accept = format!("application/coserv+cbor; profile=\"{}\"", PROFILE);
        assert_eq!(
            negotiate(&accept),
            Some(Negotiated {
                profile: Some(PROFILE.to_string())
            })
        );
        assert_eq!(negotiate(&accept).unwrap().content_type(), accept);
    }

    #[test]
    fn test_negotiate_prefers_coserv_range_profile_over_wildcard() {
        let accept = format!(
            "*/*; q=0.1, application/coserv+cbor; profile=\"{}\"; q=0.9",
            PROFILE
        );
        assert_eq!(
            negotiate(&accept),
            Some(Negotiated {
                profile: Some(PROFILE.to_string())
            })
        );
        assert_eq!(negotiate("text/html, */*"), Some(Negotiated { profile: None }));
    }

    #[test]
    fn test_split_unquoted() {
        assert_eq!(split_unquoted("a, b", ','), vec!["a", " b"]);
        assert_eq!(
            split_unquoted(r#"x; p="a;b,c"; q=1"#, ';'),
            vec!["x", r#" p="a;b,c""#, " q=1"]
        );
        assert_eq!(split_unquoted(r#"p="a\",b", c"#, ','), vec![r#"p="a\",b""#, " c"]);
    }

    #[test]
    fn test_content_type_echoes_profile() {
        let negotiated = Negotiated {
            profile: Some(PROFILE.to_string()),
        };
        assert_eq!(
            negotiated.content_type(),
            format!("application/coserv+cbor; profile=\"{}\"", PROFILE)
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let resp = health_check().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_service_info() {
        let resp = send_get(make_app().await, WELL_KNOWN_PATH, None).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["serviceState"], "READY");
        assert_eq!(json["supportedMediaTypes"][0], COSERV_MEDIA_TYPE);
        assert_eq!(
            json["apiEndpoints"]["coservRequest"],
            "/endorsement-distribution/v1/coserv/{query}"
        );
    }

    #[tokio::test]
    async fn test_coserv_request_ok() {
        let uri = query_path(ArtifactType::ReferenceValues, &IMPL_ID);
        let resp = send_get(make_app().await, &uri, Some(COSERV_MEDIA_TYPE)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], COSERV_MEDIA_TYPE);

        let result = ResultSet::from_cbor(&body_bytes(resp).await).unwrap();
        assert_eq!(result.profile, PROFILE);
        assert_eq!(result.artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_coserv_request_echoes_accept_profile() {
        let uri = query_path(ArtifactType::ReferenceValues, &IMPL_ID);
        let accept = format!("application/coserv+cbor; profile=\"{}\"", PROFILE);
        let resp = send_get(make_app().await, &uri, Some(&accept)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], accept.as_str());
    }

    #[tokio::test]
    async fn test_coserv_request_without_accept_header() {
        let uri = query_path(ArtifactType::ReferenceValues, &IMPL_ID);
        let resp = send_get(make_app().await, &uri, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_coserv_request_not_acceptable() {
        let uri = query_path(ArtifactType::ReferenceValues, &IMPL_ID);
        let resp = send_get(make_app().await, &uri, Some("application/json")).await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_MEDIA_TYPE);

        let json = body_json(resp).await;
        assert_eq!(json["status"], 406);
        assert_eq!(json["title"], "Not Acceptable");
    }

    #[tokio::test]
    async fn test_coserv_request_unreadable_accept_is_not_acceptable() {
        let request = Request::builder()
            .uri(query_path(ArtifactType::ReferenceValues, &IMPL_ID))
            .header(
                header::ACCEPT,
                HeaderValue::from_bytes(b"application/coserv+cbor; profile=\"\xff\"").unwrap(),
            )
            .body(Body::empty())
            .unwrap();
        let resp = make_app().await.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_coserv_request_not_acceptable_precedes_decoding() {
        let uri = format!("{}/coserv/%21%21", API_BASE_PATH);
        let resp = send_get(make_app().await, &uri, Some("text/plain")).await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_coserv_request_malformed_query() {
        let uri = format!("{}/coserv/%21%21", API_BASE_PATH);
        let resp = send_get(make_app().await, &uri, Some(COSERV_MEDIA_TYPE)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let json = body_json(resp).await;
        assert_eq!(json["status"], 400);
        assert!(json["detail"].as_str().unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_coserv_request_unsupported_type() {
        let uri = query_path(ArtifactType::EndorsedValues, &IMPL_ID);
        let resp = send_get(make_app().await, &uri, Some(COSERV_MEDIA_TYPE)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_coserv_request_not_found() {
        let uri = query_path(ArtifactType::ReferenceValues, &[0x00, 0x01]);
        let resp = send_get(make_app().await, &uri, Some(COSERV_MEDIA_TYPE)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let json = body_json(resp).await;
        assert_eq!(json["detail"], "no artifacts found");
    }

    #[test]
    fn test_status_mapping() {
        use crate::error::StoreError;

        assert_eq!(
            status_for(&ResolveError::Store(StoreError::TransactionFailure("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ResolveError::Timeout(5)),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let origin = "https://verifier.example.com";
        let app = build_app(
            AppState::new(Resolver::new(Arc::new(MemoryStore::new())), "0"),
            &[origin.to_string()],
        );

        let preflight = |from: &str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri(query_path(ArtifactType::ReferenceValues, &IMPL_ID))
                .header(header::ORIGIN, from)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap()
        };

        let resp = app.clone().oneshot(preflight(origin)).await.unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], origin);

        let resp = app.oneshot(preflight("https://evil.example.com")).await.unwrap();
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_signal_resolves_on_sigterm() {
        let shutdown = shutdown_signal().unwrap();

        assert_eq!(unsafe { libc::kill(libc::getpid(), libc::SIGTERM) }, 0);

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown)
            .await
            .expect("SIGTERM should trigger shutdown");
    }
}
