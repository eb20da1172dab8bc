//! Generates static C data from Device Tree Source files.
//!
//! The pipeline parses DTS input, links all blocks into a single tree,
//! normalizes it into lookup tables, classifies every property value, and
//! emits one self-contained C translation unit rooted at a `dt_root`
//! pointer. Cross-references between nodes become C pointers, with forward
//! and cyclic references handled by declaring every node before defining
//! any.
//!
//! The same input always produces byte-identical output, and any failure
//! is reported as an [`Error`] without producing partial output.

use std::path::{Path, PathBuf};

pub mod classify;
pub mod emit;
mod error;
pub mod link;
pub mod normalize;
pub mod tree;
pub mod writer;

pub use error::Error;
pub use tree::{Marker, MarkerKind, Node, Property, Tree};

/// Generate C code for an already linked tree.
pub fn generate(tree: &Tree) -> Result<String, Error> {
    let normalized = normalize::Normalized::build(tree)?;
    let decls = emit::emit(&normalized)?;
    Ok(writer::render(&decls))
}

/// Generate C code from DTS source text. Include directives cannot be
/// resolved in this mode.
pub fn generate_source(source: &str) -> Result<String, Error> {
    generate(&link::from_source(source)?)
}

/// Generate C code from a DTS file, resolving `/include/` directives
/// relative to the including file and through `include_dirs`.
pub fn generate_file(input: &Path, include_dirs: &[PathBuf]) -> Result<String, Error> {
    generate(&link::load(input, include_dirs)?)
}
