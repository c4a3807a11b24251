//! HTTP request handlers for the live query API.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use devinfo_core::export::{ChartLayout, figure};
use devinfo_core::{CollectorState, Sample, Snapshot};

use crate::state::AppState;

// ============================================================
// Health
// ============================================================

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Columns
// ============================================================

#[derive(Serialize)]
pub(crate) struct ColumnsResponse {
    collector: &'static str,
    state: String,
    columns: Vec<&'static str>,
}

pub(crate) async fn handle_columns(State(state): AppState) -> Json<ColumnsResponse> {
    Json(ColumnsResponse {
        collector: state.name,
        state: state.collector_state().to_string(),
        columns: state.series.columns(),
    })
}

// ============================================================
// Info
// ============================================================

#[derive(Deserialize)]
pub(crate) struct InfoQuery {
    /// Number of most recent samples. 0 returns the whole series.
    window: Option<usize>,
    /// Include a ready-to-plot figure.
    #[serde(default)]
    figure: bool,
}

#[derive(Serialize)]
pub(crate) struct InfoResponse<'a> {
    collector: &'static str,
    state: String,
    /// Samples collected since start, regardless of the window.
    total: usize,
    columns: Vec<&'static str>,
    /// `[first, last]` timestamps of the window.
    x_range: Option<[String; 2]>,
    samples: Vec<&'a Sample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    figure: Option<serde_json::Value>,
}

/// Windowed view of a snapshot, as served by `/api/v1/info`.
pub(crate) fn info_body<'a>(
    collector: &'static str,
    state: CollectorState,
    snapshot: &Snapshot,
    window: &'a Snapshot,
    layout: Option<&ChartLayout>,
) -> InfoResponse<'a> {
    let x_range = match (window.first(), window.last()) {
        (Some(first), Some(last)) => Some([first.timestamp_string(), last.timestamp_string()]),
        _ => None,
    };
    InfoResponse {
        collector,
        state: state.to_string(),
        total: snapshot.len(),
        columns: window.columns(),
        x_range,
        samples: window.iter().collect(),
        figure: layout.map(|layout| figure(layout, window)),
    }
}

/// Tail of `snapshot` for a request. No `window` falls back to `default`;
/// 0 selects the whole series.
pub(crate) fn select_window(snapshot: &Snapshot, requested: Option<usize>, default: usize) -> Snapshot {
    match requested.unwrap_or(default) {
        0 => snapshot.clone(),
        n => snapshot.window(n),
    }
}

pub(crate) async fn handle_info(
    State(state): AppState,
    Query(query): Query<InfoQuery>,
) -> Json<serde_json::Value> {
    let snapshot = state.snapshot();
    let window = select_window(&snapshot, query.window, state.default_window);
    let body = info_body(
        state.name,
        state.collector_state(),
        &snapshot,
        &window,
        query.figure.then_some(&state.layout),
    );
    // Serialized here because the body borrows the window.
    Json(serde_json::to_value(&body).unwrap_or_default())
}
