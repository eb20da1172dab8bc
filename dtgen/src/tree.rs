//! The linked device tree consumed by the generation pipeline.
//!
//! The tree is built once by [`crate::link`] and is read-only from then on:
//! normalization and classification derive auxiliary tables and typed
//! values from it without ever mutating a node. Parent-to-child containment
//! is the only ownership relation; phandle, label and alias lookups live in
//! tables built by [`crate::normalize`], never as back-pointers.

/// A fully linked device tree. Exactly one root, whose path is `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub root: Node,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Node name without the unit address (`/` for the root).
    pub name: String,
    /// The part of the node name after `@`, if any.
    pub unit_address: Option<String>,
    /// Labels attached to this node, in source order.
    pub labels: Vec<String>,
    /// Absolute path from the root, e.g. `/soc/serial@101f0000`.
    pub path: String,
    /// Explicit phandle value, from a `phandle` property.
    pub phandle: Option<u32>,
    /// Properties in source order; names are unique within a node.
    pub properties: Vec<Property>,
    /// Child nodes in source order, owned by this node.
    pub children: Vec<Node>,
}

impl Node {
    /// The name as written, unit address included.
    pub fn full_name(&self) -> String {
        match &self.unit_address {
            Some(addr) => format!("{}@{}", self.name, addr),
            None => self.name.clone(),
        }
    }

    /// The primary (first) label, if any.
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A property with its value in raw FDT encoding: strings are
/// NUL-terminated, cells are big-endian. Reference markers record which
/// regions of the raw bytes stand in for a node reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub raw: Vec<u8>,
    /// Reference markers, ordered by offset, non-overlapping.
    pub markers: Vec<Marker>,
    /// Cell width of the value if it was written as cell arrays of a
    /// single uniform width (32 unless `/bits/` said otherwise), 0 for
    /// any other shape.
    pub bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Byte offset of the placeholder region within `raw`.
    pub offset: usize,
    /// Length of the placeholder region.
    pub len: usize,
    pub kind: MarkerKind,
    /// The reference token as written: a label name or a `/full/path`.
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// A 32-bit phandle cell inside a cell array.
    Cell,
    /// A value-level reference, encoded as the target's path string.
    Path,
}
