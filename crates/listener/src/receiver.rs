//! The delivery handler and its router.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use webhooks::{
    DeliveryEvent, DeliveryId, EventType, HookSecretConfig, SecretSource, SignatureVerifier,
    SubscriberRegistry, TargetName, Verification,
};

use crate::errors::ReceiveError;

/// Path of the global endpoint; `{WEBHOOK_PATH}{target}` selects a target secret.
pub const WEBHOOK_PATH: &str = "/github-webhook/";

/// Event type header set by GitHub.
pub const EVENT_HEADER: &str = "x-github-event";

/// Delivery id header set by GitHub.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Diagnostic header that short-circuits to an identity response.
pub const SELF_TEST_HEADER: &str = "x-hooksync-hook-check";

/// Response header carrying the instance identity.
pub const INSTANCE_IDENTITY_HEADER: &str = "x-instance-identity";

/// Largest accepted delivery body. GitHub caps payloads at 25 MB.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// State of the delivery endpoint.
///
/// Built once at start-up and shared behind an `Arc` by [`router`].
pub struct WebhookReceiver {
    registry: Arc<SubscriberRegistry>,
    secrets: Arc<dyn SecretSource>,
    global_secret: Option<HookSecretConfig>,
    target_secrets: HashMap<TargetName, Option<HookSecretConfig>>,
    instance_id: Uuid,
}

impl WebhookReceiver {
    /// A receiver dispatching to `registry`, resolving secrets through `secrets`.
    pub fn new(registry: Arc<SubscriberRegistry>, secrets: Arc<dyn SecretSource>) -> Self {
        Self {
            registry,
            secrets,
            global_secret: None,
            target_secrets: HashMap::new(),
            instance_id: Uuid::new_v4(),
        }
    }

    /// Sets the secret used when a request names no target.
    pub fn with_global_secret(mut self, secret: Option<HookSecretConfig>) -> Self {
        self.global_secret = secret;
        self
    }

    /// Makes `/github-webhook/{name}` available, verified with `secret` or
    /// the global secret when `None`.
    pub fn with_target(mut self, name: TargetName, secret: Option<HookSecretConfig>) -> Self {
        self.target_secrets.insert(name, secret);
        self
    }

    /// Overrides the generated instance identity.
    pub fn with_instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = id;
        self
    }

    /// Identity returned to self-test requests.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Builds the verifier for a request on `target` (or the global endpoint).
    fn verifier(&self, target: Option<&str>) -> Result<SignatureVerifier, ReceiveError> {
        let target_secret = match target {
            None => None,
            Some(name) => {
                let known = TargetName::new(name)
                    .and_then(|name| self.target_secrets.get(&name))
                    .ok_or_else(|| ReceiveError::UnknownTarget {
                        name: name.to_string(),
                    })?;
                known.as_ref()
            }
        };
        let Some(config) = webhooks::select_secret(target_secret, self.global_secret.as_ref())
        else {
            return Ok(SignatureVerifier::permissive());
        };
        let secret = self.secrets.secret(&config.credential);
        if secret.is_none() {
            warn!(credential = %config.credential, "Configured webhook secret is not set; accepting unsigned delivery");
        }
        Ok(SignatureVerifier::new(secret, config.algorithm))
    }

    /// Handles one delivery.
    #[instrument(skip(self, headers, body), fields(target = target.unwrap_or("-"), bytes = body.len()))]
    pub async fn receive(
        &self,
        target: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ReceiveError> {
        if headers.contains_key(SELF_TEST_HEADER) {
            debug!("Answering self-test request");
            return Ok(self.identity_response());
        }

        let event_type = header(headers, EVENT_HEADER)
            .map(EventType::from_wire)
            .ok_or(ReceiveError::MissingEventHeader)?;
        let delivery_id = header(headers, DELIVERY_HEADER).and_then(DeliveryId::new);

        let verifier = self.verifier(target)?;
        let signature = header(headers, verifier.algorithm().header_name());
        if verifier.verify(&body, signature)? == Verification::Skipped {
            debug!("No secret configured; delivery not verified");
        }

        let payload = extract_payload(headers, &body)?;
        let event = DeliveryEvent::new(event_type, payload)
            .with_delivery_id(delivery_id)
            .with_origin(origin(headers))
            .with_signature(signature.map(str::to_string));

        let report = self.registry.dispatch(&event).await;
        info!(
            event = %event.event_type,
            delivery = event.delivery_id.as_ref().map(|d| d.as_str()).unwrap_or("-"),
            origin = %event.origin,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Received delivery"
        );
        Ok(StatusCode::OK.into_response())
    }

    fn identity_response(&self) -> Response {
        let mut response = StatusCode::OK.into_response();
        if let Ok(value) = HeaderValue::from_str(&self.instance_id.to_string()) {
            response.headers_mut().insert(INSTANCE_IDENTITY_HEADER, value);
        }
        response
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The JSON payload of a delivery: the body itself, or its form `payload` field.
fn extract_payload(headers: &HeaderMap, body: &[u8]) -> Result<String, ReceiveError> {
    let is_form = header(headers, CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

    let payload = if is_form {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| ReceiveError::MalformedPayload {
                message: "form body has no 'payload' field".to_string(),
            })?
    } else {
        String::from_utf8(body.to_vec()).map_err(|err| ReceiveError::MalformedPayload {
            message: err.to_string(),
        })?
    };

    serde_json::from_str::<serde_json::Value>(&payload).map_err(|err| {
        ReceiveError::MalformedPayload {
            message: err.to_string(),
        }
    })?;
    Ok(payload)
}

/// Where a delivery came from: the first `X-Forwarded-For` hop, else `Host`.
fn origin(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header(headers, HOST.as_str()))
        .unwrap_or("unknown")
        .to_string()
}

async fn receive_global(
    State(receiver): State<Arc<WebhookReceiver>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ReceiveError> {
    receiver.receive(None, &headers, body).await
}

async fn receive_for_target(
    State(receiver): State<Arc<WebhookReceiver>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ReceiveError> {
    receiver.receive(Some(&target), &headers, body).await
}

/// Routes for the delivery endpoint. Other methods get 405 from axum.
pub fn router(receiver: Arc<WebhookReceiver>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_global))
        .route(&format!("{WEBHOOK_PATH}{{target}}"), post(receive_for_target))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(receiver)
}

/// Serves the endpoint on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the server's I/O error.
pub async fn serve(
    listener: TcpListener,
    receiver: Arc<WebhookReceiver>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = WEBHOOK_PATH, "Listening for deliveries");
    }
    axum::serve(listener, router(receiver))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
