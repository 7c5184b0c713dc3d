use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::collaborators::{ContentGenerator, ModuleGenerator, ModuleSender, OutboundSender};
use crate::config::ServiceConfig;
use crate::dispatch::BatchDispatcher;
use crate::error::{BoxError, ServiceError};
use crate::inbound::{outcome_status, InboundFields, InboundOutcome, InboundPipeline};
use crate::schedule::spawn_newsletter_schedule;
use crate::store::{PersonalizationStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<PersonalizationStore>,
    pub pipeline: Arc<InboundPipeline>,
    pub dispatcher: Arc<BatchDispatcher>,
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);
    let store = Arc::new(PersonalizationStore::new(&config.db_path)?);
    // The collaborator clients are blocking; build them off the runtime.
    let generator: Arc<dyn ContentGenerator> = Arc::new(
        task::spawn_blocking(ModuleGenerator::from_env)
            .await
            .map_err(|err| -> BoxError { err.into() })?,
    );
    let sender: Arc<dyn OutboundSender> = Arc::new(
        task::spawn_blocking(ModuleSender::from_env)
            .await
            .map_err(|err| -> BoxError { err.into() })?,
    );

    let pipeline = Arc::new(InboundPipeline::new(
        store.clone(),
        generator.clone(),
        sender.clone(),
        config.route_config.clone(),
    ));
    let dispatcher = Arc::new(BatchDispatcher::new(
        store.clone(),
        generator,
        sender,
        config.route_config.clone(),
        config.batch_max_concurrency,
    ));

    let mut schedule_control = match config.newsletter_cron.as_deref() {
        Some(expression) => Some(spawn_newsletter_schedule(expression, dispatcher.clone())?),
        None => None,
    };

    let state = AppState {
        config: config.clone(),
        store,
        pipeline,
        dispatcher,
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhooks/email", post(ingest_email))
        .route("/signup", post(signup))
        .route("/batch/run", post(run_batch))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.inbound_body_max_bytes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("assistant service listening on {}", addr);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(control) = schedule_control.as_mut() {
        control.stop_and_join();
    }
    serve_result?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// POST /webhooks/email: multipart form with `from`, `to`, `subject`,
/// `text`, `headers`.
async fn ingest_email(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<serde_json::Value>) {
    let fields = match read_inbound_fields(&mut multipart).await {
        Ok(fields) => fields,
        Err(err) => {
            warn!("invalid multipart payload: {}", err);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "invalid multipart payload"})),
            );
        }
    };

    let pipeline = state.pipeline.clone();
    let result = task::spawn_blocking(move || pipeline.process(&fields)).await;
    let result = match result {
        Ok(result) => result,
        Err(err) => {
            error!("inbound worker panicked: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "internal error"})),
            );
        }
    };

    match result {
        Ok(outcome) => (outcome_status(&outcome), Json(outcome_body(&outcome))),
        Err(err) => {
            warn!("inbound processing failed: {}", err);
            (
                error_status(&err),
                Json(json!({"success": false, "error": err.to_string()})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignupRequest {
    email: String,
    #[serde(default)]
    prompt: String,
}

/// POST /signup: JSON `{email, prompt}`.
async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let store = state.store.clone();
    let result =
        task::spawn_blocking(move || store.create_user(&request.email, &request.prompt)).await;
    let result = match result {
        Ok(result) => result,
        Err(err) => {
            error!("signup worker panicked: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "internal error"})),
            );
        }
    };

    match result {
        Ok(user) => {
            info!("signup accepted for user {}", user.id);
            (
                StatusCode::OK,
                Json(json!({"success": true, "userId": user.id})),
            )
        }
        Err(err) => {
            let status = match &err {
                StoreError::InvalidEmail(_) => StatusCode::BAD_REQUEST,
                StoreError::DuplicateEmail(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(json!({"success": false, "error": err.to_string()})),
            )
        }
    }
}

/// POST /batch/run: bearer-authenticated newsletter run trigger.
async fn run_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(reason) = verify_batch_token(&headers, state.config.batch_auth_token.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": reason})),
        );
    }

    let dispatcher = state.dispatcher.clone();
    let result = task::spawn_blocking(move || dispatcher.run()).await;
    match result {
        Ok(Ok(stats)) => (
            StatusCode::OK,
            Json(json!({"success": true, "stats": stats})),
        ),
        Ok(Err(err)) => {
            error!("batch run failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": err.to_string()})),
            )
        }
        Err(err) => {
            error!("batch worker panicked: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "internal error"})),
            )
        }
    }
}

async fn read_inbound_fields(
    multipart: &mut Multipart,
) -> Result<InboundFields, axum::extract::multipart::MultipartError> {
    let mut fields = InboundFields::default();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field.text().await?;
        match name.as_str() {
            "from" => fields.from = Some(value),
            "to" => fields.to = Some(value),
            "subject" => fields.subject = Some(value),
            "text" => fields.text = Some(value),
            "headers" => fields.headers = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

fn outcome_body(outcome: &InboundOutcome) -> serde_json::Value {
    match outcome {
        InboundOutcome::ReplySent { to, body } => {
            json!({"success": true, "outcome": "reply_sent", "to": to, "body": body})
        }
        InboundOutcome::FeedbackRecorded { user_id } => {
            json!({"success": true, "outcome": "feedback_recorded", "userId": user_id})
        }
        InboundOutcome::NothingToDo { reason } => {
            json!({"success": true, "outcome": "no_op", "detail": reason})
        }
        InboundOutcome::Unrecognized { to } => {
            json!({"success": true, "outcome": "ignored", "detail": format!("no route for {to}")})
        }
        InboundOutcome::UnknownRecipient { token } => {
            json!({"success": false, "error": format!("recipient not found for token '{token}'")})
        }
    }
}

fn error_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::MalformedInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
        ServiceError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Store(StoreError::DuplicateEmail(_)) => StatusCode::CONFLICT,
        ServiceError::Store(StoreError::InvalidEmail(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn verify_batch_token(headers: &HeaderMap, expected: Option<&str>) -> Result<(), &'static str> {
    let Some(expected) = expected.filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_authorization")?;
    let token = header.strip_prefix("Bearer ").ok_or("invalid_authorization")?;
    if token != expected {
        return Err("invalid_token");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;

    #[test]
    fn verify_batch_token_skips_when_unconfigured() {
        let headers = HeaderMap::new();
        assert!(verify_batch_token(&headers, None).is_ok());
        assert!(verify_batch_token(&headers, Some("  ")).is_ok());
    }

    #[test]
    fn verify_batch_token_checks_bearer_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            verify_batch_token(&headers, Some("secret")),
            Err("missing_authorization")
        );

        headers.insert("authorization", "Token secret".parse().unwrap());
        assert_eq!(
            verify_batch_token(&headers, Some("secret")),
            Err("invalid_authorization")
        );

        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert_eq!(
            verify_batch_token(&headers, Some("secret")),
            Err("invalid_token")
        );

        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(verify_batch_token(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn error_statuses_follow_the_retry_policy() {
        assert_eq!(
            error_status(&ServiceError::MalformedInput("missing".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&ServiceError::Upstream(UpstreamError("down".to_string()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&ServiceError::Store(StoreError::DuplicateEmail(
                "a@x".to_string()
            ))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&ServiceError::Store(StoreError::NotFound("u".to_string()))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn reply_sent_body_carries_generated_content() {
        let body = outcome_body(&InboundOutcome::ReplySent {
            to: "a@x.com".to_string(),
            body: "generated answer".to_string(),
        });
        assert_eq!(body["success"], true);
        assert_eq!(body["to"], "a@x.com");
        assert_eq!(body["body"], "generated answer");
    }
}
