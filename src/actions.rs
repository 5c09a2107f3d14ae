use rand::Rng;
use serde_json::{Value, json};
use tokio::time::Duration;

use crate::cdp::CdpSession;
use crate::error::ApiError;

/// The closed set of action kinds accepted by `/action`.
///
/// New kinds are added by extending this sum and its match arms, never by
/// stringly-typed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Type,
    Fill,
    Press,
    Focus,
    Hover,
    Select,
    Scroll,
    HumanClick,
    HumanType,
}

impl ActionKind {
    /// Parse the wire name of an action kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "click" => Self::Click,
            "type" => Self::Type,
            "fill" => Self::Fill,
            "press" => Self::Press,
            "focus" => Self::Focus,
            "hover" => Self::Hover,
            "select" => Self::Select,
            "scroll" => Self::Scroll,
            "humanClick" => Self::HumanClick,
            "humanType" => Self::HumanType,
            _ => return None,
        })
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Type => "type",
            Self::Fill => "fill",
            Self::Press => "press",
            Self::Focus => "focus",
            Self::Hover => "hover",
            Self::Select => "select",
            Self::Scroll => "scroll",
            Self::HumanClick => "humanClick",
            Self::HumanType => "humanType",
        }
    }

    /// Whether this kind acts on a DOM node. Only `press` is targetless.
    #[must_use]
    pub fn needs_target(self) -> bool {
        !matches!(self, Self::Press)
    }
}

/// A validated action target, after ref resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTarget {
    /// A backend DOM node id (from a ref or supplied directly).
    NodeId(i64),
    /// A CSS selector, resolved to a node id at dispatch time.
    Selector(String),
}

/// Optional payload fields accompanying an action.
#[derive(Debug, Default)]
pub struct ActionPayload {
    pub text: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
}

/// Check that exactly one target mode was supplied (none for `press`).
///
/// The supplied ref is NOT resolved here — the caller resolves it against
/// the tab's ref cache first and passes a node id.
///
/// # Errors
///
/// `target-ambiguous` when more than one of ref/selector/nodeId is given;
/// `target-required` when a targeted kind has none.
pub fn validate_target(
    kind: ActionKind,
    has_ref: bool,
    selector: Option<&str>,
    node_id: Option<i64>,
) -> Result<(), ApiError> {
    let supplied =
        usize::from(has_ref) + usize::from(selector.is_some()) + usize::from(node_id.is_some());
    if supplied > 1 {
        return Err(ApiError::target_ambiguous());
    }
    if supplied == 0 && kind.needs_target() {
        return Err(ApiError::target_required(kind.name()));
    }
    Ok(())
}

/// Execute one action on a tab session.
///
/// All node interactions go through `DOM.resolveNode` +
/// `Runtime.callFunctionOn` on the backend node id, which works on React
/// and shadow-DOM pages where CSS selectors fail. Selector targets are
/// resolved to a backend node id first, through the same path.
///
/// # Errors
///
/// CDP failures surface as `cdp-error`; unmatched selectors as
/// `selector-not-found`; missing payload fields as `bad-request`.
pub async fn dispatch(
    session: &CdpSession,
    kind: ActionKind,
    target: Option<ResolvedTarget>,
    payload: &ActionPayload,
) -> Result<Value, ApiError> {
    match kind {
        ActionKind::Click => {
            let node = require_node(session, kind, target).await?;
            click_node(session, node).await?;
            Ok(json!({"clicked": true}))
        }
        ActionKind::HumanClick => {
            // Same outcome as click, human-ish timing.
            jitter_sleep().await;
            let node = require_node(session, kind, target).await?;
            click_node(session, node).await?;
            Ok(json!({"clicked": true}))
        }
        ActionKind::Type | ActionKind::HumanType => {
            let text = payload
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ApiError::bad_request("text required for type"))?;
            let node = require_node(session, kind, target).await?;
            let per_char_delay = matches!(kind, ActionKind::HumanType);
            type_into_node(session, node, text, per_char_delay).await?;
            Ok(json!({"typed": text}))
        }
        ActionKind::Fill => {
            let text = payload
                .text
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("text required for fill"))?;
            let Some(ResolvedTarget::Selector(selector)) = target else {
                return Err(ApiError::target_required("fill (selector only)"));
            };
            fill_by_selector(session, &selector, text).await?;
            Ok(json!({"filled": text}))
        }
        ActionKind::Press => {
            let key = payload
                .key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ApiError::bad_request("key required for press"))?;
            press_key(session, key).await?;
            Ok(json!({"pressed": key}))
        }
        ActionKind::Focus => {
            let node = require_node(session, kind, target).await?;
            session
                .send_command("DOM.focus", Some(json!({"backendNodeId": node})))
                .await?;
            Ok(json!({"focused": true}))
        }
        ActionKind::Hover => {
            let node = require_node(session, kind, target).await?;
            call_on_node(
                session,
                node,
                "function() { this.scrollIntoViewIfNeeded(); \
                 this.dispatchEvent(new MouseEvent('mouseover', {bubbles: true})); \
                 this.dispatchEvent(new MouseEvent('mouseenter', {bubbles: false})); }",
                vec![],
                false,
            )
            .await?;
            Ok(json!({"hovered": true}))
        }
        ActionKind::Select => {
            let value = payload
                .value
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("value required for select"))?;
            let node = require_node(session, kind, target).await?;
            let matched = call_on_node(
                session,
                node,
                "function(value) { this.scrollIntoViewIfNeeded(); \
                 const options = Array.from(this.options || []); \
                 const match = options.find(o => o.value === value) \
                     || options.find(o => o.text.trim() === value); \
                 if (!match) return false; \
                 this.value = match.value; \
                 this.dispatchEvent(new Event('change', {bubbles: true})); \
                 return true; }",
                vec![json!({"value": value})],
                true,
            )
            .await?;
            if matched["result"]["value"].as_bool() != Some(true) {
                return Err(ApiError::bad_request(format!(
                    "no option matching {value:?}"
                )));
            }
            Ok(json!({"selected": value}))
        }
        ActionKind::Scroll => {
            let node = require_node(session, kind, target).await?;
            call_on_node(
                session,
                node,
                "function() { this.scrollIntoViewIfNeeded(); }",
                vec![],
                false,
            )
            .await?;
            Ok(json!({"scrolled": true}))
        }
    }
}

/// Resolve the target to a backend node id, querying selectors on demand.
async fn require_node(
    session: &CdpSession,
    kind: ActionKind,
    target: Option<ResolvedTarget>,
) -> Result<i64, ApiError> {
    match target {
        Some(ResolvedTarget::NodeId(id)) => Ok(id),
        Some(ResolvedTarget::Selector(selector)) => {
            backend_id_for_selector(session, &selector).await
        }
        None => Err(ApiError::target_required(kind.name())),
    }
}

/// Resolve a CSS selector to a backend node id:
/// `DOM.getDocument` → `DOM.querySelector` → `DOM.describeNode`.
pub async fn backend_id_for_selector(
    session: &CdpSession,
    selector: &str,
) -> Result<i64, ApiError> {
    let doc = session
        .send_command("DOM.getDocument", Some(json!({"depth": 0})))
        .await?;
    let root_id = doc["root"]["nodeId"]
        .as_i64()
        .ok_or_else(|| ApiError::bad_request("DOM.getDocument returned no root"))?;

    let found = session
        .send_command(
            "DOM.querySelector",
            Some(json!({"nodeId": root_id, "selector": selector})),
        )
        .await?;
    let node_id = found["nodeId"].as_i64().unwrap_or(0);
    if node_id == 0 {
        return Err(ApiError::selector_not_found(selector));
    }

    let described = session
        .send_command("DOM.describeNode", Some(json!({"nodeId": node_id})))
        .await?;
    described["node"]["backendNodeId"]
        .as_i64()
        .ok_or_else(|| ApiError::bad_request("DOM.describeNode returned no backendNodeId"))
}

/// Resolve a backend node id to a Runtime object id via `DOM.resolveNode`.
async fn resolve_object_id(session: &CdpSession, backend_node_id: i64) -> Result<String, ApiError> {
    let resolved = session
        .send_command(
            "DOM.resolveNode",
            Some(json!({"backendNodeId": backend_node_id})),
        )
        .await?;
    resolved["object"]["objectId"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| {
            ApiError::bad_request(format!("no objectId for node {backend_node_id}"))
        })
}

/// Call a function on a node resolved from its backend id.
async fn call_on_node(
    session: &CdpSession,
    backend_node_id: i64,
    declaration: &str,
    arguments: Vec<Value>,
    return_by_value: bool,
) -> Result<Value, ApiError> {
    let object_id = resolve_object_id(session, backend_node_id).await?;
    let result = session
        .send_command(
            "Runtime.callFunctionOn",
            Some(json!({
                "objectId": object_id,
                "functionDeclaration": declaration,
                "arguments": arguments,
                "returnByValue": return_by_value,
            })),
        )
        .await?;
    Ok(result)
}

async fn click_node(session: &CdpSession, backend_node_id: i64) -> Result<(), ApiError> {
    call_on_node(
        session,
        backend_node_id,
        "function() { this.scrollIntoViewIfNeeded(); this.click(); }",
        vec![],
        false,
    )
    .await?;
    Ok(())
}

/// Scroll a node into view, focus it, then send key events carrying the
/// text. Key events (not value assignment) so framework listeners fire.
async fn type_into_node(
    session: &CdpSession,
    backend_node_id: i64,
    text: &str,
    per_char_delay: bool,
) -> Result<(), ApiError> {
    call_on_node(
        session,
        backend_node_id,
        "function() { this.scrollIntoViewIfNeeded(); }",
        vec![],
        false,
    )
    .await?;

    session
        .send_command("DOM.focus", Some(json!({"backendNodeId": backend_node_id})))
        .await?;

    for ch in text.chars() {
        if per_char_delay {
            jitter_sleep().await;
        }
        session
            .send_command(
                "Input.dispatchKeyEvent",
                Some(json!({"type": "char", "text": ch.to_string()})),
            )
            .await?;
    }
    Ok(())
}

/// Set a field's value in one evaluate call, firing input and change.
async fn fill_by_selector(
    session: &CdpSession,
    selector: &str,
    text: &str,
) -> Result<(), ApiError> {
    let selector_js = serde_json::to_string(selector).unwrap_or_default();
    let text_js = serde_json::to_string(text).unwrap_or_default();
    let expression = format!(
        "(() => {{ const el = document.querySelector({selector_js}); \
         if (!el) return false; \
         el.value = {text_js}; \
         el.dispatchEvent(new Event('input', {{bubbles: true}})); \
         el.dispatchEvent(new Event('change', {{bubbles: true}})); \
         return true; }})()"
    );
    let result = session
        .send_command(
            "Runtime.evaluate",
            Some(json!({"expression": expression, "returnByValue": true})),
        )
        .await?;
    if result["result"]["value"].as_bool() != Some(true) {
        return Err(ApiError::selector_not_found(selector));
    }
    Ok(())
}

/// Named keys understood by `press`: (name, code, windowsVirtualKeyCode,
/// char payload for keys that produce text).
const NAMED_KEYS: &[(&str, &str, i64, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Tab", "Tab", 9, None),
    ("Escape", "Escape", 27, None),
    ("Backspace", "Backspace", 8, None),
    ("Delete", "Delete", 46, None),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowRight", "ArrowRight", 39, None),
    ("Home", "Home", 36, None),
    ("End", "End", 35, None),
    ("PageUp", "PageUp", 33, None),
    ("PageDown", "PageDown", 34, None),
];

/// Send a key press (keyDown + keyUp) to the focused element.
async fn press_key(session: &CdpSession, key: &str) -> Result<(), ApiError> {
    let named = NAMED_KEYS.iter().find(|(name, ..)| *name == key);

    if named.is_none() && key.chars().count() == 1 {
        // Single printable character: a char event types it directly.
        session
            .send_command(
                "Input.dispatchKeyEvent",
                Some(json!({"type": "char", "text": key})),
            )
            .await?;
        return Ok(());
    }

    let (key_name, code, vk, text) = named
        .copied()
        .unwrap_or((key, key, 0, None));

    let mut down = json!({
        "type": "keyDown",
        "key": key_name,
        "code": code,
        "windowsVirtualKeyCode": vk,
        "nativeVirtualKeyCode": vk,
    });
    if let Some(text) = text {
        down["text"] = json!(text);
        down["unmodifiedText"] = json!(text);
    }
    session
        .send_command("Input.dispatchKeyEvent", Some(down))
        .await?;

    session
        .send_command(
            "Input.dispatchKeyEvent",
            Some(json!({
                "type": "keyUp",
                "key": key_name,
                "code": code,
                "windowsVirtualKeyCode": vk,
                "nativeVirtualKeyCode": vk,
            })),
        )
        .await?;
    Ok(())
}

/// Human-ish pause in the 40–120 ms band.
async fn jitter_sleep() {
    let millis = rand::rng().random_range(40..=120);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_kinds() {
        assert_eq!(ActionKind::parse("click"), Some(ActionKind::Click));
        assert_eq!(ActionKind::parse("type"), Some(ActionKind::Type));
        assert_eq!(ActionKind::parse("fill"), Some(ActionKind::Fill));
        assert_eq!(ActionKind::parse("press"), Some(ActionKind::Press));
        assert_eq!(ActionKind::parse("focus"), Some(ActionKind::Focus));
        assert_eq!(ActionKind::parse("hover"), Some(ActionKind::Hover));
        assert_eq!(ActionKind::parse("select"), Some(ActionKind::Select));
        assert_eq!(ActionKind::parse("scroll"), Some(ActionKind::Scroll));
        assert_eq!(ActionKind::parse("humanClick"), Some(ActionKind::HumanClick));
        assert_eq!(ActionKind::parse("humanType"), Some(ActionKind::HumanType));
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert_eq!(ActionKind::parse("drag"), None);
        assert_eq!(ActionKind::parse("Click"), None);
        assert_eq!(ActionKind::parse(""), None);
    }

    #[test]
    fn name_round_trips() {
        for kind in [
            ActionKind::Click,
            ActionKind::Type,
            ActionKind::Fill,
            ActionKind::Press,
            ActionKind::Focus,
            ActionKind::Hover,
            ActionKind::Select,
            ActionKind::Scroll,
            ActionKind::HumanClick,
            ActionKind::HumanType,
        ] {
            assert_eq!(ActionKind::parse(kind.name()), Some(kind));
        }
    }

    #[test]
    fn only_press_is_targetless() {
        assert!(!ActionKind::Press.needs_target());
        assert!(ActionKind::Click.needs_target());
        assert!(ActionKind::Focus.needs_target());
        assert!(ActionKind::Scroll.needs_target());
    }

    #[test]
    fn validate_rejects_multiple_targets() {
        let err = validate_target(ActionKind::Click, true, Some("#go"), None).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TargetAmbiguous);

        let err = validate_target(ActionKind::Click, false, Some("#go"), Some(4)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TargetAmbiguous);
    }

    #[test]
    fn validate_rejects_missing_target() {
        let err = validate_target(ActionKind::Focus, false, None, None).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TargetRequired);
        assert!(err.message.contains("focus"));
    }

    #[test]
    fn validate_allows_targetless_press() {
        assert!(validate_target(ActionKind::Press, false, None, None).is_ok());
    }

    #[test]
    fn validate_accepts_single_target() {
        assert!(validate_target(ActionKind::Click, true, None, None).is_ok());
        assert!(validate_target(ActionKind::Click, false, Some("#go"), None).is_ok());
        assert!(validate_target(ActionKind::Click, false, None, Some(9)).is_ok());
    }

    #[test]
    fn named_keys_cover_enter_with_text() {
        let enter = NAMED_KEYS.iter().find(|(n, ..)| *n == "Enter").unwrap();
        assert_eq!(enter.2, 13);
        assert_eq!(enter.3, Some("\r"));
    }
}
