//! Namespace tree: schema and live instances in one arena.
//!
//! Registration paths create the schema. A table owns a `{i}` row template as
//! its first child; every row instance is a deep copy of that template named by
//! its decimal instance number. Nodes live in a generational arena and refer to
//! each other by [`NodeId`]; subscription back-references are plain ids as well.

mod node;
pub(crate) mod path;

use crate::element::{ElementKind, HandlerRef, ROW_TEMPLATE};
use crate::error::{BusError, BusResult};
use crate::subscription::SubscriptionId;

pub use node::{ElementNode, NodeId};

use path::{is_instance_number, parse_alias, split_path};

/// Result of [`NamespaceTree::insert`]. Passing it back to
/// [`NamespaceTree::undo`] reverts the insert.
#[derive(Debug, Clone)]
pub struct Insertion {
    /// The registered element.
    pub node: NodeId,
    /// Every node created by the insert, parents before children, including
    /// copies placed into existing rows.
    pub created: Vec<NodeId>,
    overwritten: Vec<PriorState>,
}

/// Attributes of an existing node before an insert replaced them.
#[derive(Clone)]
struct PriorState {
    id: NodeId,
    kind: ElementKind,
    handler: Option<HandlerRef>,
    owner: Option<String>,
}

impl std::fmt::Debug for PriorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorState")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// A node freed by a removal, with the subscriptions that were bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedNode {
    pub id: NodeId,
    pub full_name: String,
    pub kind: ElementKind,
    pub subscriptions: Vec<SubscriptionId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<ElementNode>,
}

/// Arena-backed namespace tree.
#[derive(Debug)]
pub struct NamespaceTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTree {
    /// Creates a tree holding only the unnamed root container.
    #[must_use]
    pub fn new() -> Self {
        let root = ElementNode::new(String::new(), String::new(), None);
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(root),
            }],
            free: Vec::new(),
            root: NodeId::new(0, 0),
            live: 0,
        }
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, excluding the root.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Resolves a handle. Stale handles return `None`.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&ElementNode> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut ElementNode> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    // Stale ids read as empty, childless containers.
    fn is_table(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.kind.is_table())
    }

    fn is_template(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(ElementNode::is_row_template)
    }

    fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[][..], |n| n.children.as_slice())
    }

    fn name_of(&self, id: NodeId) -> &str {
        self.get(id).map_or("", ElementNode::name)
    }

    fn alloc(&mut self, node: ElementNode) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    fn free_slot(&mut self, id: NodeId) -> Option<ElementNode> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(u32::try_from(id.index()).unwrap_or(u32::MAX));
        self.live -= 1;
        Some(node)
    }

    fn new_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let full_name = match self.get(parent) {
            Some(p) if p.parent.is_some() => format!("{}.{name}", p.full_name),
            Some(_) => name.to_string(),
            None => {
                debug_assert!(false, "new child under stale node {parent}");
                name.to_string()
            }
        };
        let id = self.alloc(ElementNode::new(name.to_string(), full_name, Some(parent)));
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Finds a direct child by segment name.
    #[must_use]
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.name_of(c) == name)
    }

    /// The `{i}` template of a table.
    #[must_use]
    pub fn row_template(&self, table: NodeId) -> Option<NodeId> {
        let node = self.get(table)?;
        if !node.kind.is_table() {
            return None;
        }
        self.find_child(table, ROW_TEMPLATE)
    }

    /// Row instances of a table, in creation order.
    #[must_use]
    pub fn rows(&self, table: NodeId) -> Vec<NodeId> {
        match self.get(table) {
            Some(node) if node.kind.is_table() => node
                .children
                .iter()
                .copied()
                .filter(|&c| !self.is_template(c))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Row instance of `table` whose alias equals `alias`.
    #[must_use]
    pub fn row_by_alias(&self, table: NodeId, alias: &str) -> Option<NodeId> {
        self.rows(table)
            .into_iter()
            .find(|&r| self.get(r).is_some_and(|n| n.alias.as_deref() == Some(alias)))
    }

    /// Row instance of `table` named `number`.
    #[must_use]
    pub fn row_by_number(&self, table: NodeId, number: &str) -> Option<NodeId> {
        if !is_instance_number(number) {
            return None;
        }
        self.rows(table)
            .into_iter()
            .find(|&r| self.name_of(r) == number)
    }

    /// Nodes from the first level below the root down to `id`, inclusive.
    #[must_use]
    pub fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let Some(node) = self.get(c) else {
                return Vec::new();
            };
            if node.parent.is_none() {
                break;
            }
            out.push(c);
            cur = node.parent;
        }
        out.reverse();
        out
    }

    /// Depth below the root (children of the root have depth 1).
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        self.chain(id).len()
    }

    /// Pre-order listing of `id` and all its descendants.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.children_of(cur).iter().rev().copied());
        }
        out
    }

    /// True if `id` is a template or lies inside one.
    #[must_use]
    pub fn is_in_template(&self, id: NodeId) -> bool {
        self.chain(id).iter().any(|&c| self.is_template(c))
    }

    /// Registers an element.
    ///
    /// Table paths may carry a trailing `.{i}.`, `.{i}` or `.`; the table node
    /// itself receives the handler and a `{i}` template child. Missing
    /// intermediate nodes become containers. When the path runs under the
    /// template of a populated table, the new branch is copied into every
    /// existing row.
    pub fn insert(
        &mut self,
        path: &str,
        kind: ElementKind,
        handler: Option<HandlerRef>,
        owner: Option<&str>,
    ) -> BusResult<Insertion> {
        let invalid = || BusError::InvalidName {
            name: path.to_string(),
            reason: "empty path segment".to_string(),
        };
        let parsed = split_path(path).ok_or_else(invalid)?;
        let mut segments = parsed.segments;
        if kind.is_table() && segments.last() == Some(&ROW_TEMPLATE) {
            segments.pop();
        }
        if segments.is_empty() {
            return Err(invalid());
        }

        let mut created = Vec::new();
        let mut cur = self.root;
        for seg in segments {
            cur = match self.find_child(cur, seg) {
                Some(child) => child,
                None => {
                    let child = self.new_child(cur, seg);
                    created.push(child);
                    child
                }
            };
        }

        let mut ins = Insertion {
            node: cur,
            created,
            overwritten: Vec::new(),
        };
        if !ins.created.contains(&cur) {
            ins.overwritten.extend(self.capture(cur));
        }
        if let Some(node) = self.get_mut(cur) {
            node.kind = kind;
            node.handler = handler;
            node.owner = owner.map(str::to_string);
        }
        if kind.is_table() {
            if let Some(template) = self.ensure_row_template(cur) {
                ins.created.push(template);
            }
        }

        self.replicate_into(cur, &mut ins);
        Ok(ins)
    }

    fn capture(&self, id: NodeId) -> Option<PriorState> {
        self.get(id).map(|n| PriorState {
            id,
            kind: n.kind,
            handler: n.handler.clone(),
            owner: n.owner.clone(),
        })
    }

    /// Reverts an [`Insertion`]: attributes it overwrote are restored and the
    /// nodes it created are freed, deepest first. Inserts of one batch must be
    /// undone newest first.
    pub fn undo(&mut self, ins: &Insertion) -> Vec<ReleasedNode> {
        for prior in ins.overwritten.iter().rev() {
            if let Some(node) = self.get_mut(prior.id) {
                node.kind = prior.kind;
                node.handler = prior.handler.clone();
                node.owner = prior.owner.clone();
            }
        }
        let mut released = Vec::new();
        for &id in ins.created.iter().rev() {
            released.extend(self.release_subtree(id));
        }
        released
    }

    /// Makes sure the table's first child is its `{i}` template. Returns the
    /// template if it had to be created.
    fn ensure_row_template(&mut self, table: NodeId) -> Option<NodeId> {
        let existing = self.find_child(table, ROW_TEMPLATE);
        let template = existing.unwrap_or_else(|| self.new_child(table, ROW_TEMPLATE));
        if let Some(node) = self.get_mut(table) {
            node.children.retain(|&c| c != template);
            node.children.insert(0, template);
        }
        if existing.is_none() {
            Some(template)
        } else {
            None
        }
    }

    /// Copies a branch registered under a row template into every existing
    /// row, recursing through nested tables. Returns the created nodes.
    pub fn replicate_across_rows(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut ins = Insertion {
            node: id,
            created: Vec::new(),
            overwritten: Vec::new(),
        };
        self.replicate_into(id, &mut ins);
        ins.created
    }

    fn replicate_into(&mut self, id: NodeId, ins: &mut Insertion) {
        let chain = self.chain(id);
        if chain.iter().any(|&c| self.is_template(c)) {
            self.replicate_level(self.root, &chain, 0, false, ins);
        }
    }

    fn replicate_level(
        &mut self,
        cur: NodeId,
        chain: &[NodeId],
        depth: usize,
        via_row: bool,
        ins: &mut Insertion,
    ) {
        let Some(&schema) = chain.get(depth) else {
            return;
        };
        let last = depth + 1 == chain.len();

        if self.is_template(schema) {
            if last {
                return;
            }
            if !self.is_table(cur) {
                if let Some(template) = self.find_child(cur, ROW_TEMPLATE) {
                    self.replicate_level(template, chain, depth + 1, via_row, ins);
                }
                return;
            }
            let children = self.children_of(cur).to_vec();
            for child in children {
                let into_row = !self.is_template(child);
                self.replicate_level(child, chain, depth + 1, via_row || into_row, ins);
            }
            return;
        }

        let name = self.name_of(schema).to_string();
        match self.find_child(cur, &name) {
            Some(existing) if last => {
                if via_row && existing != schema {
                    self.sync_from_schema(schema, existing, ins);
                }
            }
            Some(existing) => self.replicate_level(existing, chain, depth + 1, via_row, ins),
            None if via_row => {
                if let Some(dup) = self.duplicate(schema, cur, None) {
                    ins.created.extend(self.subtree(dup));
                }
            }
            None => {}
        }
    }

    /// Brings an in-row copy up to date after its schema node was
    /// (re)registered.
    fn sync_from_schema(&mut self, schema: NodeId, target: NodeId, ins: &mut Insertion) {
        let Some(source) = self.capture(schema) else {
            return;
        };
        ins.overwritten.extend(self.capture(target));
        if let Some(t) = self.get_mut(target) {
            t.kind = source.kind;
            t.handler = source.handler;
            t.owner = source.owner;
        }
        if source.kind.is_table() && self.find_child(target, ROW_TEMPLATE).is_none() {
            let dup = self
                .find_child(schema, ROW_TEMPLATE)
                .and_then(|template| self.duplicate(template, target, None));
            if let Some(dup) = dup {
                if let Some(t) = self.get_mut(target) {
                    t.children.retain(|&c| c != dup);
                    t.children.insert(0, dup);
                }
                ins.created.extend(self.subtree(dup));
            }
        }
    }

    /// Deep-copies `src` under `parent`, keeping kind, handler and owner but not
    /// the alias.
    fn duplicate(&mut self, src: NodeId, parent: NodeId, name: Option<String>) -> Option<NodeId> {
        let (src_name, kind, handler, owner, children) = {
            let s = self.get(src)?;
            (
                s.name.clone(),
                s.kind,
                s.handler.clone(),
                s.owner.clone(),
                s.children.clone(),
            )
        };
        let id = self.new_child(parent, name.as_deref().unwrap_or(&src_name));
        if let Some(n) = self.get_mut(id) {
            n.kind = kind;
            n.handler = handler;
            n.owner = owner;
        }
        for child in children {
            self.duplicate(child, id, None);
        }
        Some(id)
    }

    /// Creates row `instance_number` of `table` from its template.
    pub fn instantiate_row(
        &mut self,
        table: NodeId,
        instance_number: u32,
        alias: Option<&str>,
    ) -> BusResult<NodeId> {
        let full_name = self
            .get(table)
            .map(|n| n.full_name.clone())
            .ok_or_else(|| BusError::internal(format!("row target {table} is not a live node")))?;
        let template = self
            .row_template(table)
            .ok_or_else(|| BusError::internal(format!("table '{full_name}' has no row template")))?;
        let row = self
            .duplicate(template, table, Some(instance_number.to_string()))
            .ok_or_else(|| BusError::internal(format!("table '{full_name}' lost its row template")))?;
        if let Some(node) = self.get_mut(row) {
            node.alias = alias.map(str::to_string);
        }
        Ok(row)
    }

    /// Frees a row instance and its subtree.
    pub fn delete_row(&mut self, row: NodeId) -> Vec<ReleasedNode> {
        self.release_subtree(row)
    }

    /// Removes a registered element.
    ///
    /// Copies of the element inside existing rows go with it. Tables lose all
    /// their rows before their template. Containers left empty are pruned.
    pub fn remove(&mut self, id: NodeId) -> Vec<ReleasedNode> {
        if id == self.root || !self.contains(id) {
            return Vec::new();
        }
        let chain = self.chain(id);
        let mut targets = self.expansions(&chain);
        // Replicas first, schema node last.
        targets.retain(|&t| t != id);
        targets.push(id);

        let mut released = Vec::new();
        for target in targets {
            let Some(parent) = self.get(target).and_then(|n| n.parent) else {
                continue;
            };
            released.extend(self.release_subtree(target));
            released.extend(self.prune_upwards(parent));
        }
        released
    }

    /// All nodes reachable by following `chain`, where `{i}` levels fan out to
    /// the template and every row.
    fn expansions(&self, chain: &[NodeId]) -> Vec<NodeId> {
        let mut frontier = vec![self.root];
        for &schema in chain {
            let name = self.name_of(schema);
            let mut next = Vec::new();
            for cur in frontier {
                if name == ROW_TEMPLATE && self.is_table(cur) {
                    next.extend(self.children_of(cur).iter().copied());
                } else if let Some(child) = self.find_child(cur, name) {
                    next.push(child);
                }
            }
            frontier = next;
        }
        frontier
    }

    fn prune_upwards(&mut self, start: NodeId) -> Vec<ReleasedNode> {
        let mut released = Vec::new();
        let mut cur = start;
        while cur != self.root {
            let Some(node) = self.get(cur) else {
                break;
            };
            if !node.kind.is_container() || !node.children.is_empty() {
                break;
            }
            let Some(parent) = node.parent else {
                break;
            };
            if self.is_table(parent) {
                break;
            }
            released.extend(self.release_subtree(cur));
            cur = parent;
        }
        released
    }

    /// Detaches `id` from its parent and frees it with all descendants,
    /// deepest nodes first and table rows before templates.
    fn release_subtree(&mut self, id: NodeId) -> Vec<ReleasedNode> {
        let Some(parent) = self.get(id).and_then(|n| n.parent) else {
            return Vec::new();
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != id);
        }

        let mut order = Vec::new();
        self.release_order(id, &mut order);
        order
            .into_iter()
            .filter_map(|n| {
                self.free_slot(n).map(|node| ReleasedNode {
                    id: n,
                    full_name: node.full_name,
                    kind: node.kind,
                    subscriptions: node.subscriptions,
                })
            })
            .collect()
    }

    fn release_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let (templates, rows): (Vec<NodeId>, Vec<NodeId>) = self
            .children_of(id)
            .iter()
            .copied()
            .partition(|&c| self.is_template(c));
        for child in rows.into_iter().chain(templates) {
            self.release_order(child, out);
        }
        out.push(id);
    }

    /// Resolves a path against registration names: every segment below a
    /// table is read as the `{i}` template.
    #[must_use]
    pub fn retrieve_schema(&self, path: &str) -> Option<NodeId> {
        let parsed = split_path(path)?;
        let mut cur = self.root;
        for seg in parsed.segments {
            cur = if self.is_table(cur) {
                self.row_template(cur)?
            } else {
                self.find_child(cur, seg)?
            };
        }
        Some(cur)
    }

    /// Resolves a path against live instances. Row segments are instance
    /// numbers or `[alias]`; templates are not addressable.
    #[must_use]
    pub fn retrieve_instance(&self, path: &str) -> Option<NodeId> {
        let parsed = split_path(path)?;
        let mut cur = self.root;
        for seg in parsed.segments {
            if seg == ROW_TEMPLATE {
                return None;
            }
            cur = if self.is_table(cur) {
                match parse_alias(seg) {
                    Some(alias) => self.row_by_alias(cur, alias)?,
                    None => self.row_by_number(cur, seg)?,
                }
            } else {
                self.find_child(cur, seg)?
            };
        }
        Some(cur)
    }

    /// Full name of a live node.
    #[must_use]
    pub fn full_name(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(ElementNode::full_name)
    }

    pub(crate) fn attach_subscription(&mut self, id: NodeId, sub: SubscriptionId) -> bool {
        match self.get_mut(id) {
            Some(node) if !node.subscriptions.contains(&sub) => {
                node.subscriptions.push(sub);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn detach_subscription(&mut self, id: NodeId, sub: SubscriptionId) {
        if let Some(node) = self.get_mut(id) {
            node.subscriptions.retain(|&s| s != sub);
        }
    }

    pub(crate) fn take_subscriptions(&mut self, id: NodeId) -> Vec<SubscriptionId> {
        self.get_mut(id)
            .map(|n| std::mem::take(&mut n.subscriptions))
            .unwrap_or_default()
    }
}
