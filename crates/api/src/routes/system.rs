//! Operational endpoints.

use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde_json::json;

use crate::app::AppServices;

pub async fn healthz(
    Extension(services): Extension<Arc<AppServices>>,
) -> Json<serde_json::Value> {
    let sequence = services
        .ledger
        .store
        .current_sequence()
        .await
        .unwrap_or(0);
    Json(json!({ "status": "ok", "sequence": sequence }))
}
