//! Discovery: the method catalog as hyperlinked documents.
//!
//! Served as GET on the canonical path and its descendants.  Documents
//! carry `$id` (self URL) and `$type` (`RPCSchema`, `RPCNamespace` or
//! `RPCMethod`); links carry `rel`, `href` and an optional `method`.

use crate::handler::RequestContext;
use crate::registry::{MethodOptions, ParamKind};
use crate::router::{dispatch_with_timeout, with_cors};
use crate::state::ServerState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response as HttpResponse},
    Json,
};
use relay_protocol::{method_name, Request, RpcError};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

const STANDARD_OPERATIONS: [&str; 5] = ["list", "get", "create", "update", "delete"];
const MAX_SUGGESTIONS: usize = 5;
const SUGGESTION_THRESHOLD: f64 = 0.5;

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

/// GET `/{root}` without an upgrade: the catalog document.
pub(crate) async fn catalog_response(
    state: &ServerState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> HttpResponse {
    let doc = catalog_document(state, headers).await;
    doc_response(doc, StatusCode::OK, wants_html(headers, query))
}

/// GET `/{root}/{name}`: namespace document, method document, the
/// aggregated collections document, or 404 with suggestions.
pub(crate) async fn handle_doc_get(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HttpResponse {
    if name.contains("..") {
        return with_cors(
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": RpcError::invalid_request("path traversal") })),
            )
                .into_response(),
        );
    }
    let html = wants_html(&headers, &query);
    let root = state.config.root_path.as_str();

    if name == format!("{root}.collections.list") {
        let doc = collections_document(&state).await;
        return doc_response(doc, StatusCode::OK, html);
    }

    if state.registry.get(&name).await.is_some() {
        let doc = method_document(&state, &name).await;
        return doc_response(doc, StatusCode::OK, html);
    }

    // `{root}.{namespace}` with registered methods is a namespace document.
    if let Some(ns) = name.strip_prefix(&format!("{root}.")) {
        if !ns.contains('.') && !state.registry.list(Some(ns)).await.is_empty() {
            let doc = namespace_document(&state, ns).await;
            return doc_response(doc, StatusCode::OK, html);
        }
    }

    let known = state.registry.list(None).await;
    let suggestions = suggest(&name, &known);
    let doc = json!({
        "id": null,
        "error": RpcError::method_not_found(&name),
        "suggestions": suggestions,
    });
    doc_response(doc, StatusCode::NOT_FOUND, html)
}

/// POST `/{root}/{name}`: alternate invocation form.  The body is the
/// params value; the bare result comes back, or the error with status 500.
pub(crate) async fn handle_doc_post(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    body: Bytes,
) -> HttpResponse {
    if name.contains("..") {
        return with_cors(
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": RpcError::invalid_request("path traversal") })),
            )
                .into_response(),
        );
    }
    let params = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Some(value),
            Err(_) => {
                return with_cors(
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": RpcError::parse_error("invalid JSON") })),
                    )
                        .into_response(),
                );
            }
        }
    };
    let mut request = Request::new(format!("doc-{}", Uuid::new_v4()), name);
    request.params = params;
    let response = dispatch_with_timeout(&state, request, RequestContext::detached()).await;
    match response.error {
        Some(error) => {
            with_cors((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": error }))).into_response())
        }
        None => with_cors(
            (StatusCode::OK, Json(response.result.unwrap_or(Value::Null))).into_response(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn link(rel: &str, href: String) -> Value {
    json!({ "rel": rel, "href": href })
}

fn link_with_method(rel: &str, href: String, method: &str) -> Value {
    json!({ "rel": rel, "href": href, "method": method })
}

async fn catalog_document(state: &ServerState, headers: &HeaderMap) -> Value {
    let root = state.config.root_path.as_str();
    let grouped = state.registry.list_by_namespace().await;
    let method_count = state.registry.len().await;

    let namespaces: Vec<Value> = grouped
        .iter()
        .map(|(ns, names)| {
            json!({
                "name": ns,
                "href": format!("/{root}/{root}.{ns}"),
                "methodCount": names.len(),
            })
        })
        .collect();

    json!({
        "$id": format!("/{root}"),
        "$type": "RPCSchema",
        "methodCount": method_count,
        "namespaces": namespaces,
        "links": [
            link("self", format!("/{root}")),
            link("identity", format!("/{root}/{root}.identity")),
            link("collections", format!("/{root}/{root}.collections.list")),
            link("websocket", websocket_url(state, headers)),
        ],
    })
}

/// The WebSocket endpoint, derived from the request host by protocol swap.
fn websocket_url(state: &ServerState, headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some("https") => "wss",
        _ => "ws",
    };
    format!("{scheme}://{host}/{}", state.config.root_path)
}

async fn namespace_document(state: &ServerState, ns: &str) -> Value {
    let root = state.config.root_path.as_str();
    let names = state.registry.list(Some(ns)).await;
    let mut methods = Vec::with_capacity(names.len());
    for name in &names {
        let description = state
            .registry
            .get(name)
            .await
            .and_then(|entry| entry.options.description);
        let short = method_name::action_of(name).unwrap_or_else(|| name.clone());
        let mut entry = Map::new();
        entry.insert("name".to_owned(), json!(short));
        entry.insert("fullName".to_owned(), json!(name));
        entry.insert("href".to_owned(), json!(format!("/{root}/{name}")));
        if let Some(description) = description {
            entry.insert("description".to_owned(), json!(description));
        }
        methods.push(Value::Object(entry));
    }
    json!({
        "$id": format!("/{root}/{root}.{ns}"),
        "$type": "RPCNamespace",
        "namespace": ns,
        "description": format!("Methods in the {ns} namespace"),
        "methods": methods,
        "links": [
            link("self", format!("/{root}/{root}.{ns}")),
            link("parent", format!("/{root}")),
        ],
    })
}

async fn method_document(state: &ServerState, name: &str) -> Value {
    let root = state.config.root_path.as_str();
    let options = state
        .registry
        .get(name)
        .await
        .map(|entry| entry.options)
        .unwrap_or_default();

    let mut params_doc = Map::new();
    for spec in &options.params {
        let mut doc = Map::new();
        doc.insert("type".to_owned(), json!(spec.kind.as_str()));
        doc.insert("required".to_owned(), json!(spec.required));
        if let Some(default) = &spec.default {
            doc.insert("default".to_owned(), default.clone());
        }
        if let Some(description) = &spec.description {
            doc.insert("description".to_owned(), json!(description));
        }
        params_doc.insert(spec.name.clone(), Value::Object(doc));
    }

    let mut links = vec![
        link("self", format!("/{root}/{name}")),
        link_with_method("invoke", format!("/{root}/{name}"), "POST"),
    ];
    if let Some(ns) = method_name::namespace_of(name) {
        links.push(link("parent", format!("/{root}/{root}.{ns}")));
        for sibling in state.registry.list(Some(ns)).await {
            if sibling != name {
                let mut related = link("related", format!("/{root}/{sibling}"));
                if let Some(obj) = related.as_object_mut() {
                    obj.insert("title".to_owned(), json!(sibling));
                }
                links.push(related);
            }
        }
    }

    let mut doc = Map::new();
    doc.insert("$id".to_owned(), json!(format!("/{root}/{name}")));
    doc.insert("$type".to_owned(), json!("RPCMethod"));
    doc.insert("name".to_owned(), json!(name));
    if let Some(description) = &options.description {
        doc.insert("description".to_owned(), json!(description));
    }
    doc.insert("params".to_owned(), Value::Object(params_doc));
    if let Some(returns) = &options.returns {
        doc.insert("returns".to_owned(), json!(returns));
    }
    if !options.permissions.is_empty() {
        doc.insert("permissions".to_owned(), json!(options.permissions));
    }
    if let Some(limit) = &options.rate_limit {
        doc.insert(
            "rateLimit".to_owned(),
            json!({ "max": limit.max, "windowMs": limit.window_ms }),
        );
    }
    doc.insert("example".to_owned(), example_exchange(name, &options));
    doc.insert("links".to_owned(), json!(links));
    Value::Object(doc)
}

/// A worked request/response pair built from the parameter specs.
fn example_exchange(name: &str, options: &MethodOptions) -> Value {
    let mut params = Map::new();
    for spec in &options.params {
        let value = spec.default.clone().unwrap_or_else(|| match spec.kind {
            ParamKind::String => json!("example"),
            ParamKind::Number => json!(0),
            ParamKind::Boolean => json!(false),
            ParamKind::Object => json!({}),
            ParamKind::Array => json!([]),
        });
        params.insert(spec.name.clone(), value);
    }
    let request = if params.is_empty() {
        json!({ "id": "example-1", "method": name })
    } else {
        json!({ "id": "example-1", "method": name, "params": params })
    };
    json!({
        "request": request,
        "response": {
            "id": "example-1",
            "result": options.returns.clone().map_or(Value::Null, |r| json!(r)),
        },
    })
}

async fn collections_document(state: &ServerState) -> Value {
    let root = state.config.root_path.as_str();
    let grouped = state.registry.list_by_namespace().await;
    let mut collections = Vec::new();
    for (ns, _) in &grouped {
        let mut operations = Map::new();
        for op in STANDARD_OPERATIONS {
            let method = format!("{root}.{ns}.{op}");
            if state.registry.contains(&method).await {
                operations.insert(
                    op.to_owned(),
                    link_with_method("invoke", format!("/{root}/{method}"), "POST"),
                );
            }
        }
        if !operations.is_empty() {
            collections.push(json!({
                "name": ns,
                "href": format!("/{root}/{root}.{ns}"),
                "operations": operations,
            }));
        }
    }
    json!({
        "$id": format!("/{root}/{root}.collections.list"),
        "$type": "RPCSchema",
        "collections": collections,
        "links": [
            link("self", format!("/{root}/{root}.collections.list")),
            link("parent", format!("/{root}")),
        ],
    })
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// Position-wise character similarity: matching characters at the same
/// index divided by the longer length.
fn similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let longer = a_chars.len().max(b_chars.len());
    if longer == 0 {
        return 1.0;
    }
    let matching = a_chars
        .iter()
        .zip(b_chars.iter())
        .filter(|(x, y)| x == y)
        .count();
    matching as f64 / longer as f64
}

/// Near-miss candidates for an unknown name: shared-namespace methods
/// first, then similar names above the threshold, at most five total.
pub(crate) fn suggest(target: &str, known: &[String]) -> Vec<String> {
    let target_ns = method_name::namespace_of(target);
    let mut same_ns: Vec<(f64, &String)> = Vec::new();
    let mut similar: Vec<(f64, &String)> = Vec::new();
    for name in known {
        let score = similarity(target, name);
        if target_ns.is_some() && method_name::namespace_of(name) == target_ns {
            same_ns.push((score, name));
        } else if score >= SUGGESTION_THRESHOLD {
            similar.push((score, name));
        }
    }
    let by_score_desc = |a: &(f64, &String), b: &(f64, &String)| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    };
    same_ns.sort_by(by_score_desc);
    similar.sort_by(by_score_desc);
    same_ns
        .into_iter()
        .chain(similar)
        .map(|(_, name)| name.clone())
        .take(MAX_SUGGESTIONS)
        .collect()
}

// ---------------------------------------------------------------------------
// Content negotiation
// ---------------------------------------------------------------------------

fn wants_html(headers: &HeaderMap, query: &HashMap<String, String>) -> bool {
    match query.get("format").map(String::as_str) {
        Some("html") => true,
        Some(_) => false,
        None => headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html")),
    }
}

fn doc_response(doc: Value, status: StatusCode, html: bool) -> HttpResponse {
    if html {
        with_cors((status, Html(render_html(&doc))).into_response())
    } else {
        with_cors((status, Json(doc)).into_response())
    }
}

/// Render a document as HTML: pretty-printed JSON with every URL-shaped
/// string turned into a clickable link.
fn render_html(doc: &Value) -> String {
    let pretty = serde_json::to_string_pretty(doc).unwrap_or_default();
    let escaped = pretty
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let linked = linkify(&escaped);
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>RPC discovery</title></head>\
         <body><pre>{linked}</pre></body></html>"
    )
}

fn linkify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('"') {
        let (before, quoted_on) = rest.split_at(start);
        out.push_str(before);
        let inner = &quoted_on[1..];
        let Some(end) = inner.find('"') else {
            out.push_str(quoted_on);
            break;
        };
        let content = &inner[..end];
        if content.starts_with('/') || content.starts_with("ws://") || content.starts_with("wss://")
        {
            out.push('"');
            out.push_str(&format!("<a href=\"{content}\">{content}</a>"));
            out.push('"');
        } else {
            out.push('"');
            out.push_str(content);
            out.push('"');
        }
        rest = &inner[end + 1..];
    }
    out.push_str(rest);
    out
}
