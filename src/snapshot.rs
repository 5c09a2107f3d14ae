use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ARIA roles considered interactive for the `?filter=interactive`
/// snapshot parameter.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "option",
    "checkbox",
    "radio",
    "switch",
    "slider",
    "spinbutton",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "tab",
    "treeitem",
];

/// A flattened accessibility tree node returned by `/snapshot`.
///
/// Refs (`e0`, `e1`, …) are assigned in emission order, are unique within
/// a snapshot, and are cached per tab for use by `/action`. They carry no
/// meaning across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A11yNode {
    #[serde(rename = "ref")]
    pub ref_id: String,
    pub role: String,
    pub name: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub disabled: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub focused: bool,
    #[serde(rename = "nodeId", skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<i64>,
    /// Diff identity. Content-derived so it survives ref renumbering
    /// between snapshots.
    #[serde(skip)]
    pub identity: NodeIdentity,
}

/// Node identity for diffing: role, name, depth, and ancestor-role
/// chain, compared field by field (a `|` inside a name must never
/// collide with one inside a role).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub role: String,
    pub name: String,
    pub depth: usize,
    pub ancestors: Vec<String>,
}

/// Raw AX tree node parsed leniently from the CDP response.
///
/// Parsed untyped with string coercion: typed decoders choke on property
/// name values (notably `"uninteresting"`) that newer Chrome emits.
#[derive(Debug)]
pub struct RawAxNode {
    pub node_id: String,
    pub ignored: bool,
    pub role: String,
    pub name: String,
    pub value: String,
    pub properties: Vec<(String, String)>,
    pub child_ids: Vec<String>,
    pub backend_node_id: Option<i64>,
}

/// Coerce an AX value wrapper (`{"type": …, "value": …}`) to a string.
fn ax_string(v: &Value) -> String {
    let inner = if v.get("value").is_some() {
        &v["value"]
    } else {
        v
    };
    match inner {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse the node list of an `Accessibility.getFullAXTree` response.
#[must_use]
pub fn parse_ax_nodes(nodes: &[Value]) -> Vec<RawAxNode> {
    nodes
        .iter()
        .map(|n| {
            let child_ids = n["childIds"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            let properties = n["properties"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|p| {
                            let name = p["name"].as_str()?.to_string();
                            Some((name, ax_string(&p["value"])))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let backend_node_id = n["backendDOMNodeId"].as_i64().filter(|&id| id != 0);

            RawAxNode {
                node_id: ax_string(&n["nodeId"]),
                ignored: n["ignored"].as_bool().unwrap_or(false),
                role: ax_string(&n["role"]),
                name: ax_string(&n["name"]),
                value: ax_string(&n["value"]),
                properties,
                child_ids,
                backend_node_id,
            }
        })
        .collect()
}

/// Prune a node list to the subtree rooted at the element with the given
/// backend node id. A node is kept iff it is transitively reachable from
/// the scoped root through `childIds`. Order is preserved.
#[must_use]
pub fn scope_to_subtree(nodes: Vec<RawAxNode>, root_backend_id: i64) -> Vec<RawAxNode> {
    let children_of: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.child_ids.as_slice()))
        .collect();

    let mut keep: HashSet<String> = HashSet::new();
    let mut queue: Vec<&str> = nodes
        .iter()
        .filter(|n| n.backend_node_id == Some(root_backend_id))
        .map(|n| n.node_id.as_str())
        .collect();

    while let Some(id) = queue.pop() {
        if !keep.insert(id.to_string()) {
            continue;
        }
        if let Some(children) = children_of.get(id) {
            for child in *children {
                queue.push(child);
            }
        }
    }

    nodes
        .into_iter()
        .filter(|n| keep.contains(&n.node_id))
        .collect()
}

/// Result of flattening an AX tree.
pub struct FlattenResult {
    pub nodes: Vec<A11yNode>,
    /// `"e<i>"` → backendNodeId for every emitted node that has one.
    pub refs: HashMap<String, i64>,
}

/// Flatten raw AX nodes into the snapshot node list.
///
/// The CDP response lists nodes in DFS pre-order; that order is kept.
/// Filter order (earliest cut wins): ignored, structural roles
/// (none/generic/InlineTextBox), nameless static text, depth overflow,
/// interactive-only filter. Refs are assigned in emission order.
#[must_use]
pub fn flatten(nodes: &[RawAxNode], interactive_only: bool, max_depth: Option<usize>) -> FlattenResult {
    // Parent links come from childIds; the AX tree is a DAG keyed on
    // nodeId, so upward references are kept in a side map only.
    let mut parent_of: HashMap<&str, &str> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        for child_id in &node.child_ids {
            parent_of.entry(child_id.as_str()).or_insert(&node.node_id);
        }
    }

    let role_of: HashMap<&str, &str> = nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.role.as_str()))
        .collect();

    let depth_of = |node_id: &str| {
        let mut depth = 0;
        let mut cursor = node_id;
        while let Some(parent) = parent_of.get(cursor) {
            depth += 1;
            cursor = parent;
        }
        depth
    };

    let ancestor_roles = |node_id: &str| {
        let mut chain: Vec<String> = Vec::new();
        let mut cursor = node_id;
        while let Some(parent) = parent_of.get(cursor) {
            chain.push(role_of.get(parent).copied().unwrap_or_default().to_owned());
            cursor = parent;
        }
        chain.reverse();
        chain
    };

    let mut flat = Vec::new();
    let mut refs = HashMap::new();
    let mut ref_counter = 0;

    for node in nodes {
        if node.ignored {
            continue;
        }
        if matches!(node.role.as_str(), "none" | "generic" | "InlineTextBox") {
            continue;
        }
        if node.name.is_empty() && node.role == "StaticText" {
            continue;
        }

        let depth = depth_of(&node.node_id);
        if max_depth.is_some_and(|max| depth > max) {
            continue;
        }
        if interactive_only && !INTERACTIVE_ROLES.contains(&node.role.as_str()) {
            continue;
        }

        let ref_id = format!("e{ref_counter}");
        ref_counter += 1;

        let mut disabled = false;
        let mut focused = false;
        for (name, value) in &node.properties {
            match name.as_str() {
                "disabled" if value == "true" => disabled = true,
                "focused" if value == "true" => focused = true,
                _ => {}
            }
        }

        if let Some(backend_id) = node.backend_node_id {
            refs.insert(ref_id.clone(), backend_id);
        }

        let identity = NodeIdentity {
            role: node.role.clone(),
            name: node.name.clone(),
            depth,
            ancestors: ancestor_roles(&node.node_id),
        };

        flat.push(A11yNode {
            ref_id,
            role: node.role.clone(),
            name: node.name.clone(),
            depth,
            value: (!node.value.is_empty()).then(|| node.value.clone()),
            disabled,
            focused,
            backend_node_id: node.backend_node_id,
            identity,
        });
    }

    FlattenResult { nodes: flat, refs }
}

// =============================================================================
// Diff
// =============================================================================

/// Snapshot-to-snapshot difference.
#[derive(Debug, Default, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<A11yNode>,
    pub changed: Vec<A11yNode>,
    pub removed: Vec<A11yNode>,
}

impl SnapshotDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

fn state_of(node: &A11yNode) -> (&Option<String>, bool, bool) {
    (&node.value, node.disabled, node.focused)
}

/// Diff two flattened snapshots.
///
/// Node identity is content-derived (role, name, depth, ancestor-role
/// chain) — never refs, which are renumbered every snapshot. `added` and
/// `removed` are the multiset difference of identities; `changed` holds
/// identity matches whose value/disabled/focused state differs.
#[must_use]
pub fn diff(prev: &[A11yNode], next: &[A11yNode]) -> SnapshotDiff {
    let mut prev_by_identity: HashMap<&NodeIdentity, Vec<&A11yNode>> = HashMap::new();
    for node in prev {
        prev_by_identity.entry(&node.identity).or_default().push(node);
    }
    let mut next_by_identity: HashMap<&NodeIdentity, Vec<&A11yNode>> = HashMap::new();
    for node in next {
        next_by_identity.entry(&node.identity).or_default().push(node);
    }

    let mut result = SnapshotDiff::default();

    // Walk the new snapshot in emission order so diff output is stable.
    let mut seen: HashSet<&NodeIdentity> = HashSet::new();
    for node in next {
        if !seen.insert(&node.identity) {
            continue;
        }
        let new_group = &next_by_identity[&node.identity];
        match prev_by_identity.get(&node.identity) {
            None => result.added.extend(new_group.iter().map(|n| (*n).clone())),
            Some(old_group) => {
                for (old, new) in old_group.iter().zip(new_group.iter()) {
                    if state_of(old) != state_of(new) {
                        result.changed.push((*new).clone());
                    }
                }
                if new_group.len() > old_group.len() {
                    result
                        .added
                        .extend(new_group[old_group.len()..].iter().map(|n| (*n).clone()));
                }
            }
        }
    }

    let mut seen_old: HashSet<&NodeIdentity> = HashSet::new();
    for node in prev {
        if !seen_old.insert(&node.identity) {
            continue;
        }
        let old_group = &prev_by_identity[&node.identity];
        let new_len = next_by_identity.get(&node.identity).map_or(0, Vec::len);
        if old_group.len() > new_len {
            result
                .removed
                .extend(old_group[new_len..].iter().map(|n| (*n).clone()));
        }
    }

    result
}

// =============================================================================
// Formatting & truncation
// =============================================================================

/// Snapshot output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFormat {
    #[default]
    Json,
    Yaml,
    Text,
    Compact,
}

impl SnapshotFormat {
    /// Parse the `format` query parameter; unknown values fall back to JSON.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "yaml" => Self::Yaml,
            "text" => Self::Text,
            "compact" => Self::Compact,
            _ => Self::Json,
        }
    }

    /// File extension used by `output=file`.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Text | Self::Compact => "txt",
        }
    }
}

/// One node rendered in the given format, used for both output assembly
/// and truncation accounting.
fn render_node(node: &A11yNode, format: SnapshotFormat) -> String {
    match format {
        SnapshotFormat::Text => {
            let mut line = String::new();
            let indent = "  ".repeat(node.depth);
            let _ = write!(line, "{indent}- {} \"{}\" [{}]", node.role, node.name, node.ref_id);
            append_state_suffix(&mut line, node);
            line.push('\n');
            line
        }
        SnapshotFormat::Compact => {
            let mut line = String::new();
            let _ = write!(line, "{} {} \"{}\"", node.ref_id, node.role, node.name);
            append_state_suffix(&mut line, node);
            line.push('\n');
            line
        }
        SnapshotFormat::Json => {
            let mut s = serde_json::to_string(node).unwrap_or_default();
            s.push('\n');
            s
        }
        SnapshotFormat::Yaml => serde_yaml::to_string(&[node]).unwrap_or_default(),
    }
}

fn append_state_suffix(line: &mut String, node: &A11yNode) {
    if let Some(value) = &node.value {
        let _ = write!(line, " value={value:?}");
    }
    if node.disabled {
        line.push_str(" disabled");
    }
    if node.focused {
        line.push_str(" focused");
    }
}

/// Format the node list as hierarchical text.
#[must_use]
pub fn format_text(nodes: &[A11yNode]) -> String {
    nodes
        .iter()
        .map(|n| render_node(n, SnapshotFormat::Text))
        .collect()
}

/// Format the node list one line per node, minimal tokens.
#[must_use]
pub fn format_compact(nodes: &[A11yNode]) -> String {
    nodes
        .iter()
        .map(|n| render_node(n, SnapshotFormat::Compact))
        .collect()
}

/// Truncate a node list to roughly `max_tokens` tokens of output in the
/// chosen format (1 token ≈ 4 bytes). Always cuts on a node boundary.
///
/// Returns the retained nodes and whether anything was dropped.
#[must_use]
pub fn truncate_to_tokens(
    nodes: Vec<A11yNode>,
    max_tokens: usize,
    format: SnapshotFormat,
) -> (Vec<A11yNode>, bool) {
    let budget = max_tokens.saturating_mul(4);
    let mut used = 0;
    let mut kept = Vec::with_capacity(nodes.len());
    let total = nodes.len();

    for node in nodes {
        let cost = render_node(&node, format).len();
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(node);
    }

    let truncated = kept.len() < total;
    (kept, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> Vec<Value> {
        vec![
            json!({
                "nodeId": "1",
                "ignored": false,
                "role": {"type": "role", "value": "RootWebArea"},
                "name": {"type": "computedString", "value": "Example Domain"},
                "properties": [],
                "childIds": ["2", "3", "4"],
                "backendDOMNodeId": 1
            }),
            json!({
                "nodeId": "2",
                "ignored": false,
                "role": {"type": "role", "value": "heading"},
                "name": {"type": "computedString", "value": "Example Domain"},
                "properties": [{"name": "level", "value": {"type": "integer", "value": 1}}],
                "childIds": [],
                "backendDOMNodeId": 10
            }),
            json!({
                "nodeId": "3",
                "ignored": true,
                "role": {"type": "role", "value": "generic"},
                "name": {"type": "computedString", "value": ""},
                "properties": [],
                "childIds": ["5"],
                "backendDOMNodeId": 20
            }),
            json!({
                "nodeId": "4",
                "ignored": false,
                "role": {"type": "role", "value": "link"},
                "name": {"type": "computedString", "value": "More information..."},
                "properties": [],
                "childIds": [],
                "backendDOMNodeId": 30
            }),
            json!({
                "nodeId": "5",
                "ignored": false,
                "role": {"type": "role", "value": "button"},
                "name": {"type": "computedString", "value": "Go"},
                "properties": [
                    {"name": "disabled", "value": {"type": "boolean", "value": true}},
                    {"name": "uninteresting", "value": {"type": "booleanOrUndefined", "value": false}}
                ],
                "childIds": [],
                "backendDOMNodeId": 40
            }),
        ]
    }

    fn flatten_values(values: &[Value], interactive: bool, depth: Option<usize>) -> FlattenResult {
        let raw = parse_ax_nodes(values);
        flatten(&raw, interactive, depth)
    }

    #[test]
    fn parse_coerces_wrapped_values() {
        let raw = parse_ax_nodes(&sample_tree());
        assert_eq!(raw[0].role, "RootWebArea");
        assert_eq!(raw[0].name, "Example Domain");
        assert_eq!(raw[1].properties[0], ("level".to_string(), "1".to_string()));
        assert_eq!(raw[4].properties[0], ("disabled".to_string(), "true".to_string()));
    }

    #[test]
    fn parse_survives_unknown_property_names() {
        // The typed upstream client cannot decode "uninteresting"; the
        // lenient parser must simply carry it through.
        let raw = parse_ax_nodes(&sample_tree());
        assert!(raw[4].properties.iter().any(|(n, _)| n == "uninteresting"));
    }

    #[test]
    fn flatten_drops_ignored_and_structural_nodes() {
        let result = flatten_values(&sample_tree(), false, None);
        let roles: Vec<&str> = result.nodes.iter().map(|n| n.role.as_str()).collect();
        // node 3 is ignored (and generic); everything else survives
        assert_eq!(roles, ["RootWebArea", "heading", "link", "button"]);
    }

    #[test]
    fn refs_are_dense_and_unique() {
        let result = flatten_values(&sample_tree(), false, None);
        for (i, node) in result.nodes.iter().enumerate() {
            assert_eq!(node.ref_id, format!("e{i}"));
        }
    }

    #[test]
    fn refs_map_to_backend_ids() {
        let result = flatten_values(&sample_tree(), false, None);
        assert_eq!(result.refs.get("e0"), Some(&1));
        assert_eq!(result.refs.get("e1"), Some(&10));
        assert_eq!(result.refs.get("e2"), Some(&30));
        assert_eq!(result.refs.get("e3"), Some(&40));
    }

    #[test]
    fn depth_is_computed_through_ignored_parents() {
        let result = flatten_values(&sample_tree(), false, None);
        let button = result.nodes.iter().find(|n| n.role == "button").unwrap();
        // root(0) → ignored generic(1) → button(2)
        assert_eq!(button.depth, 2);
    }

    #[test]
    fn interactive_filter_keeps_only_interactive_roles() {
        let result = flatten_values(&sample_tree(), true, None);
        let roles: Vec<&str> = result.nodes.iter().map(|n| n.role.as_str()).collect();
        assert_eq!(roles, ["link", "button"]);
        // Refs are renumbered densely under the filter
        assert_eq!(result.nodes[0].ref_id, "e0");
        assert_eq!(result.nodes[1].ref_id, "e1");
    }

    #[test]
    fn depth_zero_keeps_only_root() {
        let result = flatten_values(&sample_tree(), false, Some(0));
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].role, "RootWebArea");
    }

    #[test]
    fn disabled_property_is_extracted() {
        let result = flatten_values(&sample_tree(), false, None);
        let button = result.nodes.iter().find(|n| n.role == "button").unwrap();
        assert!(button.disabled);
        assert!(!button.focused);
    }

    #[test]
    fn nameless_static_text_is_dropped() {
        let values = vec![
            json!({
                "nodeId": "1",
                "ignored": false,
                "role": {"value": "RootWebArea"},
                "name": {"value": "Doc"},
                "childIds": ["2", "3"],
                "backendDOMNodeId": 1
            }),
            json!({
                "nodeId": "2",
                "ignored": false,
                "role": {"value": "StaticText"},
                "name": {"value": ""},
                "childIds": [],
                "backendDOMNodeId": 2
            }),
            json!({
                "nodeId": "3",
                "ignored": false,
                "role": {"value": "StaticText"},
                "name": {"value": "hello"},
                "childIds": [],
                "backendDOMNodeId": 3
            }),
        ];
        let result = flatten_values(&values, false, None);
        let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["Doc", "hello"]);
    }

    #[test]
    fn missing_backend_id_means_no_ref_entry() {
        let values = vec![json!({
            "nodeId": "1",
            "ignored": false,
            "role": {"value": "RootWebArea"},
            "name": {"value": "Doc"},
            "childIds": []
        })];
        let result = flatten_values(&values, false, None);
        assert_eq!(result.nodes.len(), 1);
        assert!(result.nodes[0].backend_node_id.is_none());
        assert!(result.refs.is_empty());
    }

    #[test]
    fn scope_keeps_only_reachable_subtree() {
        let raw = parse_ax_nodes(&sample_tree());
        // Scope to the ignored generic (backend 20): keeps it and the button
        let scoped = scope_to_subtree(raw, 20);
        let ids: Vec<&str> = scoped.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, ["3", "5"]);
    }

    #[test]
    fn scope_with_unknown_backend_id_keeps_nothing() {
        let raw = parse_ax_nodes(&sample_tree());
        let scoped = scope_to_subtree(raw, 9999);
        assert!(scoped.is_empty());
    }

    #[test]
    fn serialization_omits_empty_state() {
        let result = flatten_values(&sample_tree(), false, None);
        let link = result.nodes.iter().find(|n| n.role == "link").unwrap();
        let json = serde_json::to_value(link).unwrap();
        assert_eq!(json["ref"], "e2");
        assert_eq!(json["nodeId"], 30);
        assert!(json.get("value").is_none());
        assert!(json.get("disabled").is_none());
        assert!(json.get("focused").is_none());
        assert!(json.get("identity").is_none());
    }

    // --- diff ---

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let a = flatten_values(&sample_tree(), false, None).nodes;
        let b = flatten_values(&sample_tree(), false, None).nodes;
        let d = diff(&a, &b);
        assert!(d.is_empty());
    }

    #[test]
    fn diff_is_antisymmetric() {
        let a = flatten_values(&sample_tree(), false, None).nodes;
        let mut smaller = sample_tree();
        smaller.truncate(3); // drop the link and button
        let b = flatten_values(&smaller, false, None).nodes;

        let forward = diff(&a, &b);
        let backward = diff(&b, &a);
        let fwd_removed: Vec<&str> = forward.removed.iter().map(|n| n.role.as_str()).collect();
        let bwd_added: Vec<&str> = backward.added.iter().map(|n| n.role.as_str()).collect();
        assert_eq!(fwd_removed, bwd_added);
        assert!(forward.added.is_empty());
        assert!(backward.removed.is_empty());
    }

    #[test]
    fn diff_detects_state_change_not_add_remove() {
        let a = flatten_values(&sample_tree(), false, None).nodes;
        let mut changed_tree = sample_tree();
        // Enable the button
        changed_tree[4]["properties"] = json!([]);
        let b = flatten_values(&changed_tree, false, None).nodes;

        let d = diff(&a, &b);
        assert!(d.added.is_empty());
        assert!(d.removed.is_empty());
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].role, "button");
        assert!(!d.changed[0].disabled);
    }

    #[test]
    fn diff_identity_compares_fields_not_concatenations() {
        // A name containing a separator-ish character must not collide
        // with a role containing one: ("c", "a|b") vs ("b|c", "a").
        let tree_one = vec![json!({
            "nodeId": "1",
            "ignored": false,
            "role": {"value": "c"},
            "name": {"value": "a|b"},
            "childIds": [],
            "backendDOMNodeId": 1
        })];
        let tree_two = vec![json!({
            "nodeId": "1",
            "ignored": false,
            "role": {"value": "b|c"},
            "name": {"value": "a"},
            "childIds": [],
            "backendDOMNodeId": 1
        })];
        let a = flatten_values(&tree_one, false, None).nodes;
        let b = flatten_values(&tree_two, false, None).nodes;

        let d = diff(&a, &b);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.removed.len(), 1);
        assert!(d.changed.is_empty());
        assert_eq!(d.added[0].role, "b|c");
        assert_eq!(d.removed[0].role, "c");
    }

    #[test]
    fn diff_ignores_ref_renumbering() {
        let a = flatten_values(&sample_tree(), false, None).nodes;
        let mut b = flatten_values(&sample_tree(), false, None).nodes;
        for (i, node) in b.iter_mut().enumerate() {
            node.ref_id = format!("e{}", i + 100);
        }
        assert!(diff(&a, &b).is_empty());
    }

    // --- formatting & truncation ---

    #[test]
    fn text_format_indents_by_depth() {
        let result = flatten_values(&sample_tree(), false, None);
        let text = format_text(&result.nodes);
        assert!(text.contains("- RootWebArea \"Example Domain\" [e0]"));
        assert!(text.contains("  - heading \"Example Domain\" [e1]"));
        assert!(text.contains("    - button \"Go\" [e3] disabled"));
    }

    #[test]
    fn compact_format_is_one_line_per_node() {
        let result = flatten_values(&sample_tree(), false, None);
        let compact = format_compact(&result.nodes);
        assert_eq!(compact.lines().count(), result.nodes.len());
        assert!(compact.contains("e2 link \"More information...\""));
    }

    #[test]
    fn truncation_respects_byte_budget_and_node_boundaries() {
        let result = flatten_values(&sample_tree(), false, None);
        let total = result.nodes.len();
        // A budget of 20 tokens = 80 bytes fits only the first node or two
        let (kept, truncated) = truncate_to_tokens(result.nodes, 20, SnapshotFormat::Compact);
        assert!(truncated);
        assert!(kept.len() < total);
        let rendered = format_compact(&kept);
        assert!(rendered.len() <= 80);
    }

    #[test]
    fn truncation_with_ample_budget_keeps_everything() {
        let result = flatten_values(&sample_tree(), false, None);
        let total = result.nodes.len();
        let (kept, truncated) = truncate_to_tokens(result.nodes, 100_000, SnapshotFormat::Json);
        assert!(!truncated);
        assert_eq!(kept.len(), total);
    }

    #[test]
    fn format_parse_defaults_to_json() {
        assert_eq!(SnapshotFormat::parse("yaml"), SnapshotFormat::Yaml);
        assert_eq!(SnapshotFormat::parse("text"), SnapshotFormat::Text);
        assert_eq!(SnapshotFormat::parse("compact"), SnapshotFormat::Compact);
        assert_eq!(SnapshotFormat::parse("json"), SnapshotFormat::Json);
        assert_eq!(SnapshotFormat::parse("anything"), SnapshotFormat::Json);
    }

    #[test]
    fn identical_trees_produce_identical_node_content() {
        let a = flatten_values(&sample_tree(), false, None);
        let b = flatten_values(&sample_tree(), false, None);
        assert_eq!(a.nodes, b.nodes);
    }
}
