//! Lookup tables and reference resolution over a linked [`Tree`].
//!
//! Normalization assigns every node a canonical id from a preorder walk,
//! builds the phandle, label and alias tables, and eagerly resolves every
//! reference marker. Resolution is position-independent: a reference to a
//! node defined later in the source resolves exactly like one defined
//! earlier, it is merely classified differently.

use std::collections::HashMap;

use crate::error::Error;
use crate::tree::{MarkerKind, Node, Tree};

/// Canonical node identity: the index of the node in preorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Position of a reference target relative to the referencing node in
/// emission (preorder) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Target precedes the referencing node.
    Backward,
    /// Target follows the referencing node.
    Forward,
    /// A node referring to itself.
    SelfRef,
}

/// A fully resolved reference found in a property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub from: NodeId,
    pub property: String,
    pub to: NodeId,
    pub kind: RefKind,
}

/// The normalized view of a tree: preorder node list plus every table the
/// classifier and emitter need.
#[derive(Debug)]
pub struct Normalized<'t> {
    order: Vec<&'t Node>,
    children: Vec<Vec<NodeId>>,
    paths: HashMap<&'t str, NodeId>,
    labels: HashMap<&'t str, NodeId>,
    phandles: HashMap<u32, NodeId>,
    aliases: HashMap<String, NodeId>,
    refs: Vec<ResolvedRef>,
}

impl<'t> Normalized<'t> {
    /// Walk `tree` and build every table, failing on duplicate labels or
    /// phandles and on any reference without a target.
    pub fn build(tree: &'t Tree) -> Result<Self, Error> {
        let mut n = Normalized {
            order: Vec::new(),
            children: Vec::new(),
            paths: HashMap::new(),
            labels: HashMap::new(),
            phandles: HashMap::new(),
            aliases: HashMap::new(),
            refs: Vec::new(),
        };

        n.visit(&tree.root)?;
        n.build_aliases()?;
        n.resolve_all()?;
        Ok(n)
    }

    fn visit(&mut self, node: &'t Node) -> Result<NodeId, Error> {
        let id = NodeId(self.order.len());
        self.order.push(node);
        self.children.push(Vec::new());
        self.paths.insert(node.path.as_str(), id);

        for label in &node.labels {
            if let Some(prev) = self.labels.insert(label.as_str(), id) {
                return Err(Error::DuplicateLabel {
                    label: label.clone(),
                    first: self.order[prev.0].path.clone(),
                    second: node.path.clone(),
                });
            }
        }

        if let Some(value) = node.phandle {
            if let Some(prev) = self.phandles.insert(value, id) {
                return Err(Error::DuplicatePhandle {
                    value,
                    first: self.order[prev.0].path.clone(),
                    second: node.path.clone(),
                });
            }
        }

        for child in &node.children {
            let child_id = self.visit(child)?;
            self.children[id.0].push(child_id);
        }

        Ok(id)
    }

    /// Record the `/aliases` entries. Each value must name an existing node,
    /// either as a reference or as a literal path string.
    fn build_aliases(&mut self) -> Result<(), Error> {
        let root = self.order[0];
        let Some(aliases) = root.children.iter().find(|c| c.full_name() == "aliases") else {
            return Ok(());
        };

        let mut resolved = Vec::new();
        for prop in &aliases.properties {
            let id = match prop.markers.as_slice() {
                [m] if m.kind == MarkerKind::Path && m.offset == 0 && m.len == prop.raw.len() => {
                    self.resolve(&m.reference).ok_or_else(|| {
                        Error::UnresolvedReference {
                            node: aliases.path.clone(),
                            property: prop.name.clone(),
                            reference: m.reference.clone(),
                        }
                    })?
                }
                [] => {
                    let path = std::str::from_utf8(
                        prop.raw.strip_suffix(&[0]).unwrap_or(&prop.raw),
                    )
                    .ok()
                    .filter(|p| p.starts_with('/'))
                    .ok_or_else(|| Error::UnsupportedValue {
                        node: aliases.path.clone(),
                        property: prop.name.clone(),
                        reason: "alias value must be a node reference or a path string"
                            .to_string(),
                    })?;
                    self.paths.get(path).copied().ok_or_else(|| {
                        Error::UnresolvedReference {
                            node: aliases.path.clone(),
                            property: prop.name.clone(),
                            reference: path.to_string(),
                        }
                    })?
                }
                _ => {
                    return Err(Error::UnsupportedValue {
                        node: aliases.path.clone(),
                        property: prop.name.clone(),
                        reason: "alias value must be a node reference or a path string"
                            .to_string(),
                    })
                }
            };
            resolved.push((prop.name.clone(), id));
        }

        self.aliases.extend(resolved);
        Ok(())
    }

    /// Resolve every marker in every property up front, so classification
    /// and emission cannot hit an unresolved reference.
    fn resolve_all(&mut self) -> Result<(), Error> {
        let mut refs = Vec::new();

        for (index, node) in self.order.iter().enumerate() {
            let from = NodeId(index);
            for prop in &node.properties {
                for marker in &prop.markers {
                    let to = self.resolve(&marker.reference).ok_or_else(|| {
                        Error::UnresolvedReference {
                            node: node.path.clone(),
                            property: prop.name.clone(),
                            reference: marker.reference.clone(),
                        }
                    })?;
                    refs.push(ResolvedRef {
                        from,
                        property: prop.name.clone(),
                        to,
                        kind: Self::kind(from, to),
                    });
                }
            }
        }

        self.refs = refs;
        Ok(())
    }

    fn kind(from: NodeId, to: NodeId) -> RefKind {
        match to.cmp(&from) {
            std::cmp::Ordering::Less => RefKind::Backward,
            std::cmp::Ordering::Equal => RefKind::SelfRef,
            std::cmp::Ordering::Greater => RefKind::Forward,
        }
    }

    /// Resolve a reference token to a node: absolute paths first, then
    /// labels, then aliases.
    pub fn resolve(&self, token: &str) -> Option<NodeId> {
        if token.starts_with('/') {
            return self.paths.get(token).copied();
        }
        self.labels
            .get(token)
            .or_else(|| self.aliases.get(token))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes in canonical (preorder) emission order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &'t Node)> + '_ {
        self.order
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i), *n))
    }

    pub fn node(&self, id: NodeId) -> &'t Node {
        self.order[id.0]
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.0]
    }

    pub fn references(&self) -> &[ResolvedRef] {
        &self.refs
    }

    /// Resolve a token and report how the target sits relative to `from`.
    pub fn resolve_in(&self, from: NodeId, token: &str) -> Option<(NodeId, RefKind)> {
        let to = self.resolve(token)?;
        Some((to, Self::kind(from, to)))
    }
}
