use axum::{
    extract::{ Request, State },
    http::{ HeaderMap, StatusCode },
    middleware::Next,
    response::{ IntoResponse, Response },
    Json,
};
use chrono::Utc;
use hmac::{ Hmac, Mac };
use log::{ debug, warn };
use sha2::Sha256;
use std::collections::HashMap;
use url::form_urlencoded;

use super::api::AppState;
use crate::models::api::ErrorResponse;

type HmacSha256 = Hmac<Sha256>;

const MAX_SKEW_SECS: i64 = 300;

/// Paths reachable without credentials.
const PUBLIC_PATHS: [&str; 2] = ["/", "/health"];

#[derive(Debug, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Stale,
    BadKey,
    BadSignature,
}

impl AuthFailure {
    fn message(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "missing API key or ts/sig",
            AuthFailure::Stale => "timestamp out of range",
            AuthFailure::BadKey => "bad API key",
            AuthFailure::BadSignature => "bad signature",
        }
    }
}

/// Hex HMAC-SHA256 of `ts` keyed with the server API key.
pub fn sign(secret: &str, ts: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(ts.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Accepts `X-API-Key`, or a `ts`/`sig` pair (query string or
/// `X-Api-Ts`/`X-Api-Sign` headers) signed within the skew window.
pub fn authorize(
    secret: &str,
    headers: &HeaderMap,
    query: Option<&str>,
    now: i64
) -> Result<(), AuthFailure> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    if let Some(key) = header("X-API-Key") {
        return if key_matches(secret, &key) { Ok(()) } else { Err(AuthFailure::BadKey) };
    }

    let params: HashMap<String, String> = form_urlencoded
        ::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let ts = params.get("ts").cloned().or_else(|| header("X-Api-Ts"));
    let sig = params.get("sig").cloned().or_else(|| header("X-Api-Sign"));

    let (Some(ts), Some(sig)) = (ts, sig) else {
        return Err(AuthFailure::Missing);
    };
    let ts_i: i64 = ts.parse().map_err(|_| AuthFailure::Stale)?;
    if (now - ts_i).abs() > MAX_SKEW_SECS {
        return Err(AuthFailure::Stale);
    }

    let signature = hex::decode(sig.trim()).map_err(|_| AuthFailure::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(
        |_| AuthFailure::BadSignature
    )?;
    mac.update(ts.as_bytes());
    mac.verify_slice(&signature).map_err(|_| AuthFailure::BadSignature)
}

/// Constant-time key comparison: both sides go through the same keyed MAC
/// and are checked with `verify_slice`.
fn key_matches(secret: &str, presented: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    let mut expected = mac.clone();
    expected.update(secret.as_bytes());
    let expected = expected.finalize().into_bytes();
    mac.update(presented.as_bytes());
    mac.verify_slice(expected.as_slice()).is_ok()
}

/// Global rate limit on every route but `/health`, then credentials on every
/// non-public route when an API key is configured.
pub async fn guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    if path != "/health" && state.limiter.check().is_err() {
        warn!("Global rate limit exceeded on {}", path);
        return reject(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
    }

    if let Some(secret) = state.api_key.as_deref() {
        if !PUBLIC_PATHS.contains(&path.as_str()) {
            let now = Utc::now().timestamp();
            if let Err(failure) = authorize(secret, req.headers(), req.uri().query(), now) {
                warn!("Unauthorized request to {}: {}", path, failure.message());
                return reject(StatusCode::UNAUTHORIZED, failure.message());
            }
            debug!("Authorized request to {}", path);
        }
    }

    next.run(req).await
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string(), details: None })).into_response()
}
