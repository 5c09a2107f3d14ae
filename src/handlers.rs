use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::actions::{self, ActionKind, ActionPayload, ResolvedTarget};
use crate::config::Config;
use crate::error::ApiError;
use crate::navigate;
use crate::registry::{Bridge, RefCache};
use crate::snapshot::{self, SnapshotFormat};
use crate::state::now_file_stamp;
use crate::stealth;

/// Shared state for all handlers.
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub config: Arc<Config>,
    shutting_down: AtomicBool,
}

impl AppState {
    #[must_use]
    pub fn new(bridge: Arc<Bridge>, config: Arc<Config>) -> Self {
        Self {
            bridge,
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Flip the state to shutting-down; later requests get 503.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}

/// Run a multi-command operation under the given deadline.
async fn with_deadline<T>(
    deadline: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::action_timeout(what)),
    }
}

fn parse_flag(value: Option<&String>) -> bool {
    value.is_some_and(|v| v == "true")
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

// ── GET /health ────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cdp = state.bridge.client().url().to_owned();
    match state.bridge.list_targets().await {
        Ok(targets) => Json(json!({"status": "ok", "tabs": targets.len(), "cdp": cdp})),
        Err(e) => Json(json!({"status": "disconnected", "error": e.message, "cdp": cdp})),
    }
}

// ── GET /tabs ──────────────────────────────────────────────

pub async fn tabs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let targets = state.bridge.list_targets().await?;
    Ok(Json(json!({"tabs": targets})))
}

// ── GET /snapshot ──────────────────────────────────────────

/// Query options for `/snapshot`. All values arrive as strings and are
/// parsed leniently — unparseable numbers are ignored, like unknown keys.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    tab_id: Option<String>,
    filter: Option<String>,
    depth: Option<String>,
    selector: Option<String>,
    diff: Option<String>,
    format: Option<String>,
    max_tokens: Option<String>,
    no_animations: Option<String>,
    output: Option<String>,
    path: Option<String>,
}

pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Response, ApiError> {
    let (entry, tab_id) = state.bridge.resolve_tab(query.tab_id.as_deref()).await?;
    let session = &entry.session;

    let interactive = query.filter.as_deref() == Some("interactive");
    let max_depth: Option<usize> = parse_number(query.depth.as_ref());
    let max_tokens: Option<usize> = parse_number(query.max_tokens.as_ref()).filter(|&t| t > 0);
    let format = SnapshotFormat::parse(query.format.as_deref().unwrap_or_default());
    let want_diff = parse_flag(query.diff.as_ref());

    let timeout = state.config.action_timeout;
    let (mut nodes, refs, url, title) = with_deadline(timeout, "snapshot", async {
        if parse_flag(query.no_animations.as_ref()) && !state.config.no_animations {
            stealth::disable_animations_once(session).await;
        }

        let tree = session
            .send_command("Accessibility.getFullAXTree", None)
            .await?;
        let raw_nodes = tree["nodes"].as_array().cloned().unwrap_or_default();
        let mut raw = snapshot::parse_ax_nodes(&raw_nodes);

        if let Some(selector) = query.selector.as_deref().filter(|s| !s.is_empty()) {
            let scope_id = actions::backend_id_for_selector(session, selector).await?;
            raw = snapshot::scope_to_subtree(raw, scope_id);
        }

        let result = snapshot::flatten(&raw, interactive, max_depth);
        let url = navigate::current_url(session).await;
        let title = page_title(session).await;
        Ok((result.nodes, result.refs, url, title))
    })
    .await?;

    let mut truncated = false;
    if let Some(max_tokens) = max_tokens {
        (nodes, truncated) = snapshot::truncate_to_tokens(nodes, max_tokens, format);
    }

    // Diff against the previous cache; the swap is atomic so readers see
    // either the old snapshot or this one, never a mix.
    let prev_nodes = state
        .bridge
        .replace_ref_cache(
            &tab_id,
            RefCache {
                refs,
                nodes: nodes.clone(),
            },
        )
        .await;
    // No previous snapshot means an empty diff, not an all-added one.
    let diff = if want_diff {
        Some(match prev_nodes {
            Some(prev) => snapshot::diff(&prev, &nodes),
            None => snapshot::SnapshotDiff::default(),
        })
    } else {
        None
    };

    if query.output.as_deref() == Some("file") {
        return write_snapshot_file(&state.config, query.path.as_deref(), format, &nodes, diff.as_ref(), &url, &title);
    }

    if let Some(diff) = diff {
        let body = json!({
            "url": url,
            "title": title,
            "diff": true,
            "added": diff.added,
            "changed": diff.changed,
            "removed": diff.removed,
            "counts": {
                "added": diff.added.len(),
                "changed": diff.changed.len(),
                "removed": diff.removed.len(),
                "total": nodes.len(),
            },
        });
        return Ok(Json(body).into_response());
    }

    let response = match format {
        SnapshotFormat::Compact => {
            let mut header_line = format!("# {title} | {url} | {} nodes", nodes.len());
            if truncated {
                header_line.push_str(&format!(
                    " (truncated to ~{} tokens)",
                    max_tokens.unwrap_or_default()
                ));
            }
            let body = format!("{header_line}\n{}", snapshot::format_compact(&nodes));
            plain_response("text/plain; charset=utf-8", body)
        }
        SnapshotFormat::Text => {
            let body = format!(
                "# {title}\n# {url}\n# {} nodes\n\n{}",
                nodes.len(),
                snapshot::format_text(&nodes)
            );
            plain_response("text/plain; charset=utf-8", body)
        }
        SnapshotFormat::Yaml => {
            let data = json!({"url": url, "title": title, "nodes": nodes, "count": nodes.len()});
            let body = serde_yaml::to_string(&data)
                .map_err(|e| ApiError::bad_request(format!("marshal yaml: {e}")))?;
            plain_response("text/yaml; charset=utf-8", body)
        }
        SnapshotFormat::Json => {
            let mut body = json!({
                "url": url,
                "title": title,
                "nodes": nodes,
                "count": nodes.len(),
            });
            if truncated {
                body["truncated"] = json!(true);
                body["maxTokens"] = json!(max_tokens);
            }
            Json(body).into_response()
        }
    };
    Ok(response)
}

fn write_snapshot_file(
    config: &Config,
    custom_path: Option<&str>,
    format: SnapshotFormat,
    nodes: &[snapshot::A11yNode],
    diff: Option<&snapshot::SnapshotDiff>,
    url: &str,
    title: &str,
) -> Result<Response, ApiError> {
    let stamp = now_file_stamp();
    let timestamp = crate::state::now_rfc3339();

    let content = match format {
        SnapshotFormat::Text | SnapshotFormat::Compact => format!(
            "# {title}\n# {url}\n# {} nodes\n# {timestamp}\n\n{}",
            nodes.len(),
            if format == SnapshotFormat::Compact {
                snapshot::format_compact(nodes)
            } else {
                snapshot::format_text(nodes)
            }
        ),
        SnapshotFormat::Yaml | SnapshotFormat::Json => {
            let mut data = json!({
                "url": url,
                "title": title,
                "timestamp": timestamp,
                "nodes": nodes,
                "count": nodes.len(),
            });
            if let Some(diff) = diff {
                data["diff"] = json!(true);
                data["added"] = json!(diff.added);
                data["changed"] = json!(diff.changed);
                data["removed"] = json!(diff.removed);
            }
            if format == SnapshotFormat::Yaml {
                serde_yaml::to_string(&data)
                    .map_err(|e| ApiError::bad_request(format!("marshal yaml: {e}")))?
            } else {
                serde_json::to_string_pretty(&data)
                    .map_err(|e| ApiError::bad_request(format!("marshal snapshot: {e}")))?
            }
        }
    };

    let file_path = match custom_path {
        Some(p) if !p.is_empty() => std::path::PathBuf::from(p),
        _ => config
            .state_dir
            .join("snapshots")
            .join(format!("snapshot-{stamp}.{}", format.extension())),
    };
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::bad_request(format!("create snapshot dir: {e}")))?;
    }
    std::fs::write(&file_path, &content)
        .map_err(|e| ApiError::bad_request(format!("write snapshot: {e}")))?;

    Ok(Json(json!({
        "path": file_path.display().to_string(),
        "size": content.len(),
        "format": query_format_name(format),
        "timestamp": stamp,
    }))
    .into_response())
}

fn query_format_name(format: SnapshotFormat) -> &'static str {
    match format {
        SnapshotFormat::Json => "json",
        SnapshotFormat::Yaml => "yaml",
        SnapshotFormat::Text => "text",
        SnapshotFormat::Compact => "compact",
    }
}

fn plain_response(content_type: &'static str, body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn page_title(session: &crate::cdp::CdpSession) -> String {
    session
        .send_command(
            "Runtime.evaluate",
            Some(json!({"expression": "document.title", "returnByValue": true})),
        )
        .await
        .ok()
        .and_then(|r| r["result"]["value"].as_str().map(String::from))
        .unwrap_or_default()
}

// ── GET /screenshot ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotQuery {
    tab_id: Option<String>,
    quality: Option<String>,
    raw: Option<String>,
}

pub async fn screenshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScreenshotQuery>,
) -> Result<Response, ApiError> {
    let (entry, _) = state.bridge.resolve_tab(query.tab_id.as_deref()).await?;
    let quality: u32 = parse_number(query.quality.as_ref()).unwrap_or(80);

    let result = with_deadline(state.config.action_timeout, "screenshot", async {
        entry
            .session
            .send_command(
                "Page.captureScreenshot",
                Some(json!({"format": "jpeg", "quality": quality})),
            )
            .await
            .map_err(ApiError::from)
    })
    .await?;

    let data = result["data"].as_str().unwrap_or_default();

    if parse_flag(query.raw.as_ref()) {
        let bytes = BASE64
            .decode(data)
            .map_err(|e| ApiError::bad_request(format!("decode screenshot: {e}")))?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        return Ok(response);
    }

    Ok(Json(json!({"format": "jpeg", "base64": data})).into_response())
}

// ── GET /text ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextQuery {
    tab_id: Option<String>,
}

pub async fn text(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
) -> Result<Json<Value>, ApiError> {
    let (entry, _) = state.bridge.resolve_tab(query.tab_id.as_deref()).await?;
    let session = &entry.session;

    let (text, url, title) = with_deadline(state.config.action_timeout, "text extract", async {
        let result = session
            .send_command(
                "Runtime.evaluate",
                Some(json!({
                    "expression": "document.body.innerText",
                    "returnByValue": true,
                })),
            )
            .await?;
        let text = result["result"]["value"].as_str().unwrap_or_default().to_owned();
        let url = navigate::current_url(session).await;
        let title = page_title(session).await;
        Ok((text, url, title))
    })
    .await?;

    Ok(Json(json!({"url": url, "title": title, "text": text})))
}

// ── POST /navigate ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateRequest {
    tab_id: Option<String>,
    #[serde(default)]
    url: String,
}

pub async fn navigate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NavigateRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.url.is_empty() {
        return Err(ApiError::bad_request("url required"));
    }

    let (entry, tab_id) = state.bridge.resolve_tab(request.tab_id.as_deref()).await?;
    let session = &entry.session;

    navigate::navigate(session, &request.url, state.config.navigate_timeout).await?;

    // Navigation invalidates every ref minted for this tab.
    state.bridge.evict_ref_cache(&tab_id).await;

    let url = navigate::current_url(session).await;
    let title = navigate::poll_title(session).await;
    Ok(Json(json!({"url": url, "title": title})))
}

// ── POST /action ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    tab_id: Option<String>,
    #[serde(default)]
    kind: String,
    #[serde(rename = "ref")]
    ref_id: Option<String>,
    selector: Option<String>,
    node_id: Option<i64>,
    text: Option<String>,
    key: Option<String>,
    value: Option<String>,
}

pub async fn action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(kind) = ActionKind::parse(&request.kind) else {
        return Err(ApiError::bad_request(format!(
            "unknown action: {}",
            request.kind
        )));
    };

    actions::validate_target(
        kind,
        request.ref_id.is_some(),
        request.selector.as_deref(),
        request.node_id,
    )?;

    let (entry, tab_id) = state.bridge.resolve_tab(request.tab_id.as_deref()).await?;

    // Refs resolve through the cached snapshot only — never by taking a
    // fresh snapshot behind the caller's back.
    let target = if let Some(ref_id) = &request.ref_id {
        let node_id = state
            .bridge
            .resolve_ref(&tab_id, ref_id)
            .await
            .ok_or_else(|| ApiError::ref_stale(ref_id))?;
        Some(ResolvedTarget::NodeId(node_id))
    } else if let Some(selector) = request.selector.clone() {
        Some(ResolvedTarget::Selector(selector))
    } else {
        request.node_id.map(ResolvedTarget::NodeId)
    };

    let payload = ActionPayload {
        text: request.text,
        key: request.key,
        value: request.value,
    };

    let result = with_deadline(
        state.config.action_timeout,
        kind.name(),
        actions::dispatch(&entry.session, kind, target, &payload),
    )
    .await?;

    Ok(Json(result))
}

// ── POST /evaluate ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    tab_id: Option<String>,
    #[serde(default)]
    expression: String,
}

pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.expression.is_empty() {
        return Err(ApiError::bad_request("expression required"));
    }

    let (entry, _) = state.bridge.resolve_tab(request.tab_id.as_deref()).await?;

    let result = with_deadline(state.config.action_timeout, "evaluate", async {
        entry
            .session
            .send_command(
                "Runtime.evaluate",
                Some(json!({
                    "expression": request.expression,
                    "returnByValue": true,
                })),
            )
            .await
            .map_err(ApiError::from)
    })
    .await?;

    if let Some(details) = result["exceptionDetails"]["exception"]["description"].as_str() {
        return Err(ApiError::bad_request(format!("evaluate: {details}")));
    }

    Ok(Json(json!({"result": result["result"]["value"]})))
}

// ── POST /tab ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRequest {
    #[serde(default)]
    action: String,
    tab_id: Option<String>,
    url: Option<String>,
}

pub async fn tab(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TabRequest>,
) -> Result<Json<Value>, ApiError> {
    match request.action.as_str() {
        "new" => {
            let (tab_id, url, title) = state.bridge.new_tab(request.url.as_deref()).await?;

            // New documents in this tab get the same instrumentation as
            // the initial one.
            if let Ok((entry, _)) = state.bridge.resolve_tab(Some(&tab_id)).await {
                let _ = stealth::inject_stealth(&entry.session).await;
                if state.config.no_animations {
                    stealth::inject_no_animations(&entry.session).await;
                }
            }

            Ok(Json(json!({"tabId": tab_id, "url": url, "title": title})))
        }
        "close" => {
            let Some(tab_id) = request.tab_id.filter(|id| !id.is_empty()) else {
                return Err(ApiError::bad_request("tabId required"));
            };
            state.bridge.close_tab(&tab_id).await;
            Ok(Json(json!({"closed": true})))
        }
        _ => Err(ApiError::bad_request("action must be 'new' or 'close'")),
    }
}
