//! Admin HTTP surface: `/stats` and `/health`.
//!
//! `/stats` renders one `name: value` line per counter;
//! `/stats?format=json` returns `{"stats": [{"name": …, "value": …}]}`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::stats::{NamedStat, StatsRegistry};

/// Query string accepted by `/stats`
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    /// `json` for a JSON body, anything else for text
    pub format: Option<String>,
}

/// JSON body of `/stats?format=json`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsBody {
    /// Every published counter
    pub stats: Vec<NamedStat>,
}

/// Build the admin router
pub fn create_admin_router(stats: Arc<StatsRegistry>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(stats)
}

async fn stats_handler(
    State(stats): State<Arc<StatsRegistry>>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let named = stats.named();
    if query.format.as_deref() == Some("json") {
        Json(StatsBody { stats: named }).into_response()
    } else {
        render_text(&named).into_response()
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn render_text(stats: &[NamedStat]) -> String {
    stats
        .iter()
        .map(|stat| format!("{}: {}\n", stat.name, stat.value))
        .collect()
}
