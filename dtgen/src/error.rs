//! Error taxonomy for the generation pipeline.
//!
//! Every error is terminal for the run: there is no partial or degraded
//! output mode. Errors carry the node path and property name needed to
//! locate the problem in the original source. The library never logs; the
//! caller decides how to present failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The upstream parser rejected the source text.
    #[error("{file}: {source}")]
    Parse {
        file: PathBuf,
        source: dts_parser::SyntaxError,
    },

    /// A source or include file could not be read.
    #[error("cannot read {file}: {source}")]
    Read {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An `/include/`d file was not found next to the includer or in any
    /// search directory.
    #[error("{file}: include \"{include}\" not found")]
    IncludeNotFound { file: PathBuf, include: String },

    /// A file transitively includes itself.
    #[error("{file}: include cycle through \"{include}\"")]
    IncludeCycle { file: PathBuf, include: String },

    /// `#include` requires a C preprocessor, which is out of scope.
    #[error("#include \"{include}\" requires a preprocessor and is not supported")]
    CppInclude { include: String },

    /// A phandle, label or alias reference has no resolving target.
    #[error("unresolved reference &{reference} in {node} property \"{property}\"")]
    UnresolvedReference {
        node: String,
        property: String,
        reference: String,
    },

    /// Two nodes claim the same phandle value.
    #[error("duplicate phandle {value} claimed by {first} and {second}")]
    DuplicatePhandle {
        value: u32,
        first: String,
        second: String,
    },

    /// Two nodes carry the same label.
    #[error("duplicate label \"{label}\" on {first} and {second}")]
    DuplicateLabel {
        label: String,
        first: String,
        second: String,
    },

    /// A property value cannot be represented. Reachable when a reference
    /// sits in a value that cannot carry it (the byte fallback would drop
    /// the reference); otherwise a defensive check.
    #[error("unsupported value in {node} property \"{property}\": {reason}")]
    UnsupportedValue {
        node: String,
        property: String,
        reason: String,
    },
}
