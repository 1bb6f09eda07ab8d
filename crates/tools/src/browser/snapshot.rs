//! Accessibility snapshot rendering.
//!
//! Flattens the driver's accessibility tree into an indented text outline
//! and hands out `@eN` refs for interactive nodes. Refs map back to backend
//! DOM node ids so later actions (click, type, hover) can target elements
//! seen in the snapshot.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Roles that earn a ref: things an agent can act on.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "menuitem",
    "option",
    "radio",
    "checkbox",
    "switch",
    "slider",
    "spinbutton",
    "tab",
    "treeitem",
];

/// Container roles elided in compact rendering when they add nothing.
const STRUCTURAL_ROLES: &[&str] = &[
    "generic",
    "none",
    "presentation",
    "group",
    "GenericContainer",
    "Section",
];

const MAX_DEPTH: usize = 15;

struct AxNode {
    role: String,
    name: String,
    backend_node_id: Option<i64>,
    children: Vec<String>,
}

/// Render an `Accessibility.getFullAXTree` response into outline text plus
/// the ref → node mapping.
pub fn render(ax_response: &Value, compact: bool) -> (String, HashMap<String, Value>) {
    let nodes = match ax_response.get("nodes").and_then(Value::as_array) {
        Some(nodes) => nodes,
        None => return (String::new(), HashMap::new()),
    };

    let mut by_id: HashMap<String, AxNode> = HashMap::new();
    let mut referenced: HashSet<String> = HashSet::new();

    for raw in nodes {
        if raw.get("ignored").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let Some(id) = raw.get("nodeId").and_then(Value::as_str) else {
            continue;
        };
        let children: Vec<String> = raw
            .get("childIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        referenced.extend(children.iter().cloned());
        by_id.insert(
            id.to_string(),
            AxNode {
                role: string_prop(raw, "role"),
                name: string_prop(raw, "name"),
                backend_node_id: raw.get("backendDOMNodeId").and_then(Value::as_i64),
                children,
            },
        );
    }

    // Roots: present nodes nobody lists as a child, in document order
    let roots: Vec<&str> = nodes
        .iter()
        .filter_map(|raw| raw.get("nodeId").and_then(Value::as_str))
        .filter(|id| by_id.contains_key(*id) && !referenced.contains(*id))
        .collect();

    let mut out = String::new();
    let mut refs = HashMap::new();
    let mut next_ref = 0u32;
    for root in roots {
        render_node(root, &by_id, compact, 0, &mut out, &mut refs, &mut next_ref);
    }
    (out, refs)
}

fn render_node(
    id: &str,
    by_id: &HashMap<String, AxNode>,
    compact: bool,
    depth: usize,
    out: &mut String,
    refs: &mut HashMap<String, Value>,
    next_ref: &mut u32,
) {
    let Some(node) = by_id.get(id) else { return };
    if depth > MAX_DEPTH {
        return;
    }

    let structural = STRUCTURAL_ROLES.contains(&node.role.as_str());
    let skip_line = compact && structural && node.name.is_empty();

    let child_depth = if skip_line {
        depth
    } else {
        let mut line = format!("{}- {}", "  ".repeat(depth), node.role);
        if !node.name.is_empty() {
            line.push_str(&format!(" \"{}\"", node.name));
        }
        if INTERACTIVE_ROLES.contains(&node.role.as_str()) {
            if let Some(backend_id) = node.backend_node_id {
                *next_ref += 1;
                let ref_id = format!("e{}", next_ref);
                line.push_str(&format!(" [@{}]", ref_id));
                refs.insert(
                    ref_id,
                    json!({
                        "backendNodeId": backend_id,
                        "role": node.role,
                        "name": node.name,
                    }),
                );
            }
        }
        out.push_str(&line);
        out.push('\n');
        depth + 1
    };

    for child in &node.children {
        render_node(child, by_id, compact, child_depth, out, refs, next_ref);
    }
}

fn string_prop(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(|p| p.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ax_response() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": {"value": "RootWebArea"},
                    "name": {"value": "Example"},
                    "childIds": ["2", "3"],
                    "backendDOMNodeId": 1
                },
                {
                    "nodeId": "2",
                    "role": {"value": "generic"},
                    "name": {"value": ""},
                    "childIds": ["4"],
                    "backendDOMNodeId": 2
                },
                {
                    "nodeId": "3",
                    "role": {"value": "button"},
                    "name": {"value": "Submit"},
                    "childIds": [],
                    "backendDOMNodeId": 3
                },
                {
                    "nodeId": "4",
                    "role": {"value": "link"},
                    "name": {"value": "Docs"},
                    "childIds": [],
                    "backendDOMNodeId": 4
                },
                {
                    "nodeId": "5",
                    "role": {"value": "generic"},
                    "ignored": true,
                    "childIds": []
                }
            ]
        })
    }

    #[test]
    fn test_render_assigns_refs_to_interactive_nodes() {
        let (text, refs) = render(&ax_response(), true);
        assert!(text.contains("RootWebArea \"Example\""));
        assert!(text.contains("button \"Submit\""));
        assert!(text.contains("link \"Docs\""));
        assert_eq!(refs.len(), 2);
        let backend_ids: Vec<i64> = refs
            .values()
            .map(|v| v["backendNodeId"].as_i64().unwrap())
            .collect();
        assert!(backend_ids.contains(&3));
        assert!(backend_ids.contains(&4));
    }

    #[test]
    fn test_compact_elides_empty_structural_nodes() {
        let (text, _) = render(&ax_response(), true);
        assert!(!text.contains("generic"));
        let (full, _) = render(&ax_response(), false);
        assert!(full.contains("generic"));
    }

    #[test]
    fn test_ignored_nodes_are_dropped() {
        let (text, _) = render(&ax_response(), false);
        assert_eq!(text.matches("generic").count(), 1);
    }

    #[test]
    fn test_empty_response() {
        let (text, refs) = render(&json!({}), true);
        assert!(text.is_empty());
        assert!(refs.is_empty());
    }

    #[test]
    fn test_ref_ids_are_sequential() {
        let (text, refs) = render(&ax_response(), true);
        assert!(refs.contains_key("e1"));
        assert!(refs.contains_key("e2"));
        assert!(text.contains("[@e1]"));
        assert!(text.contains("[@e2]"));
    }
}
