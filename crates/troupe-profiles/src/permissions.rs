//! Tool permissions parsed from profile markdown.
//!
//! Recognised shapes, anywhere in a SOUL/AGENTS document:
//!
//! ```markdown
//! **Allowed Tools:** search, send_message
//! **Denied Tools:** exec
//!
//! ## Tools
//! - allow: search
//! - deny: exec
//! ```
//!
//! Merging across layers unions both sets; a deny anywhere wins.

use std::collections::BTreeSet;

use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPermissions {
    pub allowed: BTreeSet<String>,
    pub denied: BTreeSet<String>,
}

impl ToolPermissions {
    /// Whether a tool may be used. An empty allow-set means everything not
    /// denied is permitted.
    pub fn permits(&self, tool: &str) -> bool {
        if self.denied.contains(tool) || self.denied.contains("*") {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(tool)
    }
}

/// Extract permissions from one markdown document.
pub fn parse_tool_permissions(content: &str) -> ToolPermissions {
    let mut permissions = ToolPermissions::default();

    let allowed_re = Regex::new(r"\*\*Allowed Tools:\*\*\s*(.+)").expect("valid regex");
    if let Some(caps) = allowed_re.captures(content) {
        for tool in caps[1].split(',') {
            let tool = tool.trim();
            if !tool.is_empty() {
                permissions.allowed.insert(tool.to_string());
            }
        }
    }

    let denied_re = Regex::new(r"\*\*Denied Tools:\*\*\s*(.+)").expect("valid regex");
    if let Some(caps) = denied_re.captures(content) {
        for tool in caps[1].split(',') {
            let tool = tool.trim();
            if !tool.is_empty() {
                permissions.denied.insert(tool.to_string());
            }
        }
    }

    let list_re = Regex::new(r"(?m)^\s*-\s*(allow|deny):\s*(\S+)").expect("valid regex");
    for caps in list_re.captures_iter(content) {
        let tool = caps[2].trim_matches('`').to_string();
        match &caps[1] {
            "allow" => {
                permissions.allowed.insert(tool);
            }
            _ => {
                permissions.denied.insert(tool);
            }
        }
    }

    permissions
}

/// Merge permission layers; later layers add to both sets and denies win.
pub fn merge_permissions(layers: &[ToolPermissions]) -> ToolPermissions {
    let mut merged = ToolPermissions::default();
    for layer in layers {
        merged.allowed.extend(layer.allowed.iter().cloned());
        merged.denied.extend(layer.denied.iter().cloned());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_markers_parse() {
        let p = parse_tool_permissions(
            "**Allowed Tools:** search, send_message\n**Denied Tools:** exec",
        );
        assert!(p.allowed.contains("search"));
        assert!(p.allowed.contains("send_message"));
        assert!(p.denied.contains("exec"));
    }

    #[test]
    fn list_form_parses() {
        let p = parse_tool_permissions("## Tools\n- allow: `search`\n- deny: exec\n");
        assert!(p.allowed.contains("search"));
        assert!(p.denied.contains("exec"));
    }

    #[test]
    fn deny_wins_after_merge() {
        let template = parse_tool_permissions("**Allowed Tools:** exec, search");
        let workspace = parse_tool_permissions("**Denied Tools:** exec");
        let merged = merge_permissions(&[template, workspace]);
        assert!(!merged.permits("exec"));
        assert!(merged.permits("search"));
    }

    #[test]
    fn empty_allow_set_permits_everything_not_denied() {
        let p = parse_tool_permissions("**Denied Tools:** exec");
        assert!(p.permits("search"));
        assert!(!p.permits("exec"));
    }

    #[test]
    fn wildcard_deny_blocks_all() {
        let p = parse_tool_permissions("**Denied Tools:** *");
        assert!(!p.permits("anything"));
    }
}
