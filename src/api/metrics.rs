//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory ring-buffer window. Because the
//! buffer has a fixed capacity, values represent a **sliding window** of recent
//! requests rather than lifetime counters. Use `TYPE gauge` throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Metric families:
//! - `routing_gateway_window_size`        — entries currently in the ring buffer
//! - `routing_gateway_requests`           — per-tier/provider/outcome request counts
//! - `routing_gateway_latency_ms_sum`     — sum of latencies per tier/provider (for avg)
//! - `routing_gateway_latency_ms_count`   — denominator matching the sum above
//! - `routing_gateway_fallbacks_total`    — requests served by a fallback candidate
//! - `routing_gateway_errors_total`       — requests that returned an error
//! - `routing_gateway_cost_usd_total`     — total estimated spend in the window

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::engine::RouterState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let entries = state.traffic.recent(usize::MAX).await;

    let window_size = entries.len();
    let mut fallbacks: u64 = 0;
    let mut errors: u64 = 0;
    let mut total_cost_usd: f64 = 0.0;

    // (tier, provider, success) → count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // (tier, provider) → (latency_sum_ms, count)
    let mut latency: HashMap<(String, String), (u64, u64)> = HashMap::new();

    for e in &entries {
        if e.fallback_used {
            fallbacks += 1;
        }
        if !e.success {
            errors += 1;
        }
        total_cost_usd += e.estimated_cost_usd;

        *request_counts.entry((e.target_tier.to_string(), e.provider.clone(), e.success)).or_default() += 1;

        let lat = latency.entry((e.target_tier.to_string(), e.provider.clone())).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP routing_gateway_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE routing_gateway_window_size gauge\n");
    out.push_str(&format!("routing_gateway_window_size {window_size}\n\n"));

    out.push_str("# HELP routing_gateway_requests Request count in the current window, labelled by tier, provider, and outcome.\n");
    out.push_str("# TYPE routing_gateway_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((tier, provider, success), count) in req_rows {
        let success_str = if *success { "true" } else { "false" };
        out.push_str(&format!(
            "routing_gateway_requests{{tier=\"{tier}\",provider=\"{provider}\",success=\"{success_str}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP routing_gateway_latency_ms_sum Sum of request latency (ms) in the current window, grouped by tier and provider.\n");
    out.push_str("# TYPE routing_gateway_latency_ms_sum gauge\n");
    out.push_str("# HELP routing_gateway_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE routing_gateway_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((tier, provider), (sum, count)) in lat_rows {
        out.push_str(&format!("routing_gateway_latency_ms_sum{{tier=\"{tier}\",provider=\"{provider}\"}} {sum}\n"));
        out.push_str(&format!("routing_gateway_latency_ms_count{{tier=\"{tier}\",provider=\"{provider}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP routing_gateway_fallbacks_total Requests in the current window served by a fallback candidate.\n");
    out.push_str("# TYPE routing_gateway_fallbacks_total gauge\n");
    out.push_str(&format!("routing_gateway_fallbacks_total {fallbacks}\n\n"));

    out.push_str("# HELP routing_gateway_errors_total Requests that returned an error in the current window.\n");
    out.push_str("# TYPE routing_gateway_errors_total gauge\n");
    out.push_str(&format!("routing_gateway_errors_total {errors}\n\n"));

    out.push_str("# HELP routing_gateway_cost_usd_total Total estimated spend (USD) in the current window.\n");
    out.push_str("# TYPE routing_gateway_cost_usd_total gauge\n");
    out.push_str(&format!("routing_gateway_cost_usd_total {total_cost_usd}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}
