//! HTTP routes serving a generator to other processes.
//!
//! - `POST /idgen/add` answers 200 with a JSON string, base64 of the
//!   protobuf-encoded private key.
//! - `POST /idgen/remove` takes the same JSON string and answers 204.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::warn;

use crate::delegate::{decode_key, encode_key};
use crate::BalancedGenerator;

/// Build the idgen router.
pub fn router(generator: Arc<BalancedGenerator>) -> Router {
    Router::new()
        .route("/idgen/add", post(add))
        .route("/idgen/remove", post(remove))
        .with_state(generator)
}

async fn add(State(generator): State<Arc<BalancedGenerator>>) -> Result<Json<String>, StatusCode> {
    match generator.add_balanced() {
        Ok(key) => Ok(Json(encode_key(&key))),
        Err(e) => {
            warn!(error = %e, "idgen add failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn remove(
    State(generator): State<Arc<BalancedGenerator>>,
    Json(encoded): Json<String>,
) -> StatusCode {
    match decode_key(&encoded) {
        Ok(key) => {
            generator.remove(&key);
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            warn!(error = %e, "idgen remove with undecodable key");
            StatusCode::BAD_REQUEST
        }
    }
}
