//! Node handles and the per-node record kept by the namespace tree.

use std::fmt;

use crate::element::{ElementKind, HandlerRef, ROW_TEMPLATE};
use crate::subscription::SubscriptionId;

/// Generational handle to a node in a [`NamespaceTree`](super::NamespaceTree).
///
/// A handle to a freed node never resolves again, even after its slot has been
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A node of the unified schema and instance tree.
pub struct ElementNode {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) kind: ElementKind,
    pub(crate) alias: Option<String>,
    pub(crate) handler: Option<HandlerRef>,
    pub(crate) owner: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) subscriptions: Vec<SubscriptionId>,
}

impl ElementNode {
    pub(crate) fn new(name: String, full_name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            full_name,
            kind: ElementKind::Container,
            alias: None,
            handler: None,
            owner: None,
            parent,
            children: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Local segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified dotted path.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Row alias, set only on row instances.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Capability set registered by the provider.
    #[must_use]
    pub const fn handler(&self) -> Option<&HandlerRef> {
        self.handler.as_ref()
    }

    /// Component that registered this element.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Subscriptions currently bound to this node.
    #[must_use]
    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    /// True for the `{i}` template child of a table.
    #[must_use]
    pub fn is_row_template(&self) -> bool {
        self.name == ROW_TEMPLATE
    }
}

impl fmt::Debug for ElementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementNode")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("alias", &self.alias)
            .field("has_handler", &self.handler.is_some())
            .field("children", &self.children.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
