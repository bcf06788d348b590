//! `GET /status` — human-readable overview of every registration.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;

use crate::error::RegistryError;
use crate::registry::ServiceStatus;
use crate::server::AppState;

pub async fn status_page(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, RegistryError> {
    let services = state.registry.list_ports().await?;
    let summary = state.registry.summary().await?;
    Ok(Html(render(&services, summary.next_available)))
}

/// Render the status table. Services are listed in port order.
pub fn render(services: &BTreeMap<String, ServiceStatus>, next_available: Option<u16>) -> String {
    let mut rows: Vec<(&String, &ServiceStatus)> = services.iter().collect();
    rows.sort_by_key(|(_, status)| status.port);

    let live = rows.iter().filter(|(_, status)| status.in_use).count();

    let mut html = String::with_capacity(1024 + rows.len() * 256);
    html.push_str(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Port Registry</title>\
         <style>\
         body{font-family:system-ui,sans-serif;margin:2rem;color:#222}\
         table{border-collapse:collapse}\
         th,td{padding:.35rem .9rem;border-bottom:1px solid #ddd;text-align:left}\
         .live{color:#1a7f37}.idle{color:#888}\
         </style></head><body>\n<h1>Port Registry</h1>\n",
    );

    let _ = writeln!(
        html,
        "<p>{} registered, {} live, next available: {}</p>",
        rows.len(),
        live,
        next_available
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    if rows.is_empty() {
        html.push_str("<p>No services registered.</p>\n");
    } else {
        html.push_str(
            "<table>\n<tr><th>Port</th><th>Service</th><th>Project</th>\
             <th>Description</th><th>State</th></tr>\n",
        );
        for (name, status) in rows {
            let state = if status.in_use { "live" } else { "idle" };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
                status.port,
                escape(name),
                escape(&status.project),
                escape(&status.description),
                state,
                state
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body></html>\n");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
