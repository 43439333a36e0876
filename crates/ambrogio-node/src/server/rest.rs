//! REST API endpoints and the status page

use ambrogio_bridge::StatusReport;
use axum::{extract::State, response::Html, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub restarts: u64,
    /// Absent while the bridge is being rebuilt
    pub bridge: Option<StatusReport>,
}

async fn current_report(state: &AppState) -> Option<StatusReport> {
    let handle = state.bridge.read().clone()?;
    match handle.status().await {
        Ok(report) => Some(report),
        Err(e) => {
            debug!("Bridge status unavailable: {}", e);
            None
        }
    }
}

/// Bridge status as JSON
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        restarts: state.restarts.load(std::sync::atomic::Ordering::Relaxed),
        bridge: current_report(&state).await,
    })
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Plain HTML status page
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_page(current_report(&state).await.as_ref()))
}

/// Render the status page for a report
pub fn render_page(report: Option<&StatusReport>) -> String {
    let body = match report {
        Some(report) => format!(
            "<p>MQTT Server: {}</p>\n\
             <p>MQTT Topic: {}</p>\n\
             <p>Broker: {} &middot; Link: {}</p>\n\
             <h2>Bluetooth scan</h2>\n\
             <pre>{}</pre>\n",
            escape(&report.broker_address),
            escape(&report.topic_base),
            report.broker_state,
            report.link_state,
            escape(&report.discovery_log),
        ),
        None => "<p>Bridge restarting...</p>\n".to_string(),
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Ambrogio Bridge</title></head>\n\
         <body>\n<h1>Ambrogio BT-Serial Bridge</h1>\n{}</body>\n</html>\n",
        body
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
