//! `GET /health` endpoint.
//!
//! Load balancers and the client apps poll this to verify the relay is up
//! and whether an agent is currently bound.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (agent, clients) = state.registry.counts().await;
    Json(json!({
        "status": "ok",
        "agent": agent,
        "clients": clients,
    }))
}
