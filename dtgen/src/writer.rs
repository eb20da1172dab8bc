//! Assembles the generated C translation unit.
//!
//! The output is a single self-contained header-style file: a fixed
//! preamble defining the data model, the tentative node declarations, the
//! definitions, and one externally visible entry point. Byte-identical
//! input produces byte-identical output.

use std::fmt::Write;

use crate::emit::Declarations;

const PREAMBLE: &str = "\
/* Generated device tree data. Do not edit. */
#ifndef DTGEN_DEVICE_TREE_H
#define DTGEN_DEVICE_TREE_H

#include <stddef.h>
#include <stdint.h>

struct dt_node;

enum dt_value_kind {
    DT_VALUE_EMPTY,
    DT_VALUE_STRINGS,
    DT_VALUE_CELLS32,
    DT_VALUE_CELLS64,
    DT_VALUE_PHANDLE,
    DT_VALUE_MIXED,
    DT_VALUE_BYTES,
};

enum dt_mixed_kind {
    DT_MIXED_LIT,
    DT_MIXED_REF,
};

/* One entry of a cell array that mixes literals and node references. */
struct dt_mixed_cell {
    enum dt_mixed_kind kind;
    const struct dt_node *node;
    uint32_t value;
};

struct dt_value {
    enum dt_value_kind kind;
    /* Strings, cells or bytes in the array; 1 for a node reference. */
    size_t count;
    union {
        const char *const *strings;
        const uint32_t *cells32;
        const uint64_t *cells64;
        const struct dt_node *node;
        const struct dt_mixed_cell *mixed;
        const uint8_t *bytes;
    };
};

struct dt_property {
    const char *name;
    struct dt_value value;
};

struct dt_node {
    const char *path;
    const char *name;
    const char *unit_address;
    const char *label;
    uint32_t phandle;
    const struct dt_property *properties;
    size_t num_properties;
    const struct dt_node *const *children;
    size_t num_children;
};
";

/// Render the complete output file.
pub fn render(decls: &Declarations) -> String {
    let mut out = String::with_capacity(
        PREAMBLE.len() + decls.forward.len() + decls.definitions.len() + 256,
    );

    out.push_str(PREAMBLE);
    out.push('\n');
    out.push_str("/* Node declarations. */\n");
    out.push_str(&decls.forward);
    out.push('\n');
    out.push_str("/* Node definitions. */\n");
    out.push_str(&decls.definitions);
    let _ = writeln!(
        out,
        "const struct dt_node *const dt_root = &{};",
        decls.root_symbol
    );
    out.push('\n');
    out.push_str("#endif /* DTGEN_DEVICE_TREE_H */\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_appear_in_order() {
        let decls = Declarations {
            forward: "static const struct dt_node dt_node_root; /* / */\n".to_string(),
            definitions: "static const struct dt_node dt_node_root = {\n};\n".to_string(),
            root_symbol: "dt_node_root".to_string(),
        };
        let out = render(&decls);

        let guard = out.find("#ifndef DTGEN_DEVICE_TREE_H").unwrap();
        let decl = out.find("/* Node declarations. */").unwrap();
        let defs = out.find("/* Node definitions. */").unwrap();
        let root = out.find("const struct dt_node *const dt_root = &dt_node_root;").unwrap();
        let end = out.find("#endif").unwrap();
        assert!(guard < decl && decl < defs && defs < root && root < end);
        assert!(out.ends_with("#endif /* DTGEN_DEVICE_TREE_H */\n"));
    }
}
