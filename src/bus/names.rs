//! Registration name validation.

use regex::Regex;

use crate::config::BusConfig;
use crate::element::{ElementKind, ElementSpec, ROW_TEMPLATE};
use crate::error::{BusError, BusResult};
use crate::tree::path::split_path;
use crate::tree::{NamespaceTree, NodeId};

/// Checks registration paths against the segment grammar and the tree.
#[derive(Debug, Clone)]
pub(crate) struct NameValidator {
    segment: Regex,
    method: Regex,
    max_depth: usize,
    max_length: usize,
}

impl NameValidator {
    pub(crate) fn new(cfg: &BusConfig) -> BusResult<Self> {
        let segment = Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$")
            .map_err(|e| BusError::internal(format!("segment grammar: {e}")))?;
        let method = Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*(\(\))?$")
            .map_err(|e| BusError::internal(format!("method grammar: {e}")))?;
        Ok(Self {
            segment,
            method,
            max_depth: cfg.max_path_depth,
            max_length: cfg.max_name_length,
        })
    }

    /// Validates `spec` against the grammar and the current tree.
    pub(crate) fn check(&self, tree: &NamespaceTree, spec: &ElementSpec) -> BusResult<()> {
        let name = spec.name.as_str();
        let invalid = |reason: String| BusError::InvalidName {
            name: name.to_string(),
            reason,
        };

        if name.len() > self.max_length {
            return Err(invalid(format!("longer than {} bytes", self.max_length)));
        }
        let parsed = split_path(name).ok_or_else(|| invalid("empty path segment".to_string()))?;
        if parsed.partial && !spec.kind.is_table() {
            return Err(invalid("only tables may end in '.'".to_string()));
        }
        let mut segments = parsed.segments;
        if spec.kind.is_table() && segments.last() == Some(&ROW_TEMPLATE) {
            segments.pop();
        }
        if segments.is_empty() {
            return Err(invalid("empty path".to_string()));
        }
        if segments.len() > self.max_depth {
            return Err(invalid(format!("deeper than {} segments", self.max_depth)));
        }

        let last = segments.len() - 1;
        let mut cur = Some(tree.root());
        for (i, &seg) in segments.iter().enumerate() {
            let parent = cur.and_then(|id| tree.get(id));
            if seg == ROW_TEMPLATE {
                if i == 0 {
                    return Err(invalid("'{i}' needs a table above it".to_string()));
                }
                if parent.is_some_and(|p| !p.kind().is_container() && !p.kind().is_table()) {
                    return Err(invalid(format!("'{{i}}' below {} element", kind_article(parent.map(|p| p.kind())))));
                }
            } else {
                let grammar = if i == last && spec.kind == ElementKind::Method {
                    &self.method
                } else {
                    &self.segment
                };
                if !grammar.is_match(seg) {
                    return Err(invalid(format!("segment '{seg}' is not a valid name")));
                }
                if let Some(p) = parent {
                    if p.kind().is_table() {
                        return Err(invalid(format!("'{}' is a table; expected '{{i}}' next", p.full_name())));
                    }
                    if !p.kind().is_container() {
                        return Err(invalid(format!("'{}' is a {} and cannot have children", p.full_name(), p.kind())));
                    }
                }
            }
            cur = cur.and_then(|id| tree.find_child(id, seg));
        }

        if let Some(existing) = cur.and_then(|id| tree.get(id)) {
            let converts_to_table = existing.kind().is_container()
                && spec.kind.is_table()
                && existing
                    .children()
                    .iter()
                    .all(|&c| tree.get(c).is_some_and(|n| n.is_row_template()));
            if !converts_to_table {
                return Err(BusError::DuplicateName {
                    name: existing.full_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn kind_article(kind: Option<ElementKind>) -> String {
    kind.map_or_else(|| "an unknown".to_string(), |k| format!("a {k}"))
}

/// Resolves a registration name to its node. Table names may carry the
/// `.{i}.` suffix. Containers are not registrations.
pub(crate) fn registered_node(tree: &NamespaceTree, name: &str) -> Option<NodeId> {
    let parsed = split_path(name)?;
    let mut segments = parsed.segments;
    if segments.last() == Some(&ROW_TEMPLATE) {
        segments.pop();
    }
    let mut cur = tree.root();
    for seg in segments {
        cur = tree.find_child(cur, seg)?;
    }
    let node = tree.get(cur)?;
    if node.kind().is_container() || cur == tree.root() {
        return None;
    }
    Some(cur)
}
