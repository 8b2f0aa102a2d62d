//! Subscription patterns.
//!
//! An event name such as `Device.WiFi.AP.*.SSID` is parsed once, at subscribe
//! time, against the registration chain of the element it names. Each segment
//! becomes a [`Token`]; segments aligned with a table's `{i}` level select
//! rows by wildcard, alias or instance number. A trailing `.` marks a partial
//! path that covers the whole branch below the matched node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::element::ROW_TEMPLATE;
use crate::error::{BusError, BusResult};
use crate::tree::path::{is_instance_number, parse_alias};
use crate::tree::{ElementNode, NamespaceTree, NodeId};

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Token {
    /// Exact segment name.
    Literal(String),
    /// Any row (`*`).
    Wildcard,
    /// The row whose alias is the bracketed name (`[name]`).
    AliasRef(String),
    /// The row with this decimal instance number.
    InstanceRef(String),
}

impl Token {
    /// True for row selectors (everything except `Literal`).
    #[must_use]
    pub const fn is_row_selector(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) | Self::InstanceRef(s) => f.write_str(s),
            Self::Wildcard => f.write_str("*"),
            Self::AliasRef(a) => write!(f, "[{a}]"),
        }
    }
}

/// Parsed subscription event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
    subtree: bool,
}

impl Pattern {
    /// Parses `source` against the registration chain `chain` (segment names
    /// from the first level below the root down to the registered element).
    pub fn parse(source: &str, chain: &[&str]) -> BusResult<Self> {
        let invalid = |reason: String| BusError::InvalidPattern {
            pattern: source.to_string(),
            reason,
        };

        let (body, subtree) = match source.strip_suffix('.') {
            Some(body) => (body, true),
            None => (source, false),
        };
        if body.is_empty() {
            return Err(invalid("empty pattern".to_string()));
        }

        let segments: Vec<&str> = body.split('.').collect();
        if segments.len() > chain.len() {
            return Err(invalid(format!(
                "{} segments but the registered path has {}",
                segments.len(),
                chain.len()
            )));
        }
        if !subtree && segments.len() != chain.len() {
            return Err(invalid("does not name a registered element".to_string()));
        }

        let mut tokens = Vec::with_capacity(segments.len());
        for (i, (&seg, &reg)) in segments.iter().zip(chain).enumerate() {
            if seg.is_empty() {
                return Err(invalid(format!("empty segment at position {i}")));
            }
            let token = if reg == ROW_TEMPLATE {
                if seg == "*" {
                    Token::Wildcard
                } else if let Some(alias) = parse_alias(seg) {
                    Token::AliasRef(alias.to_string())
                } else if is_instance_number(seg) {
                    Token::InstanceRef(seg.to_string())
                } else {
                    return Err(invalid(format!(
                        "'{seg}' is not a row selector (*, [alias] or instance number)"
                    )));
                }
            } else if seg == reg {
                Token::Literal(seg.to_string())
            } else {
                return Err(invalid(format!("'{seg}' does not match registered segment '{reg}'")));
            };
            tokens.push(token);
        }

        Ok(Self {
            source: source.to_string(),
            tokens,
            subtree,
        })
    }

    /// Parses `source` against the registration chain of `registration`.
    pub fn for_element(source: &str, tree: &NamespaceTree, registration: NodeId) -> BusResult<Self> {
        let chain: Vec<&str> = tree
            .chain(registration)
            .into_iter()
            .filter_map(|id| tree.get(id).map(ElementNode::name))
            .collect();
        Self::parse(source, &chain)
    }

    /// The original event name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// True for partial-path patterns (trailing `.`).
    #[must_use]
    pub const fn is_subtree(&self) -> bool {
        self.subtree
    }

    /// Number of tokens; the depth at which this pattern binds.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tokens.len()
    }

    /// True if any segment selects rows by wildcard or alias.
    #[must_use]
    pub fn has_row_selectors(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Wildcard | Token::AliasRef(_)))
    }

    /// Tests the token at `index` against `node`, which must sit at depth
    /// `index + 1`.
    pub(crate) fn segment_matches(&self, index: usize, tree: &NamespaceTree, node: NodeId) -> bool {
        let Some(token) = self.tokens.get(index) else {
            return false;
        };
        let Some(n) = tree.get(node) else {
            return false;
        };
        if n.is_row_template() {
            return false;
        }
        let is_row = n
            .parent()
            .and_then(|p| tree.get(p))
            .is_some_and(|p| p.kind().is_table());
        match token {
            Token::Literal(name) => !is_row && n.name() == name,
            Token::Wildcard => is_row,
            Token::AliasRef(alias) => is_row && n.alias() == Some(alias.as_str()),
            Token::InstanceRef(number) => is_row && n.name() == number,
        }
    }

    /// Match predicate: `node` is described by this pattern. Partial paths also
    /// match every node below the matched depth.
    #[must_use]
    pub fn matches(&self, tree: &NamespaceTree, node: NodeId) -> bool {
        let chain = tree.chain(node);
        if chain.len() < self.tokens.len() || (!self.subtree && chain.len() != self.tokens.len()) {
            return false;
        }
        if chain.iter().any(|&c| tree.get(c).is_some_and(ElementNode::is_row_template)) {
            return false;
        }
        chain
            .iter()
            .take(self.tokens.len())
            .enumerate()
            .all(|(i, &c)| self.segment_matches(i, tree, c))
    }

    /// Binding predicate: `node` matches at exactly the pattern depth. A partial
    /// path binds the root of the covered branch only.
    #[must_use]
    pub fn binds(&self, tree: &NamespaceTree, node: NodeId) -> bool {
        tree.depth(node) == self.tokens.len() && self.matches(tree, node)
    }

    /// Every live node this pattern binds, in tree order.
    ///
    /// Walks the instance tree one token per level, pruning on the first
    /// mismatching segment. Descent continues through containers and table rows
    /// only, never past other leaves.
    #[must_use]
    pub fn find_matches(&self, tree: &NamespaceTree) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(tree, tree.root(), 0, &mut out);
        out
    }

    fn collect(&self, tree: &NamespaceTree, parent: NodeId, depth: usize, out: &mut Vec<NodeId>) {
        let Some(node) = tree.get(parent) else {
            return;
        };
        for &child in node.children() {
            if !self.segment_matches(depth, tree, child) {
                continue;
            }
            if depth + 1 == self.tokens.len() {
                out.push(child);
                continue;
            }
            if tree
                .get(child)
                .is_some_and(|c| c.kind().is_container() || c.kind().is_table())
            {
                self.collect(tree, child, depth + 1, out);
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
