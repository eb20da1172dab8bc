//! Renders the normalized tree as C declarations.
//!
//! Emission is two-pass: every node is first tentatively declared, then
//! defined. A node definition may therefore take the address of any other
//! node regardless of where it sits in the file, which is what makes
//! forward and cyclic references work without topological sorting.

use std::collections::HashMap;
use std::fmt::Write;

use crate::classify::{classify, MixedCell, TypedValue};
use crate::error::Error;
use crate::normalize::{NodeId, Normalized};
use crate::tree::Node;

/// The rendered output, ready for [`crate::writer`] to assemble.
pub struct Declarations {
    /// Tentative declarations, one per node, in canonical order.
    pub forward: String,
    /// Array and node definitions, in canonical order.
    pub definitions: String,
    /// The symbol of the root node.
    pub root_symbol: String,
}

pub fn emit(n: &Normalized) -> Result<Declarations, Error> {
    let symbols = symbol_table(n);

    let mut forward = String::new();
    for (id, node) in n.iter() {
        let _ = writeln!(
            forward,
            "static const struct dt_node {}; /* {} */",
            symbols[id.0], node.path
        );
    }

    let mut definitions = String::new();
    for (id, node) in n.iter() {
        emit_node(n, &symbols, id, node, &mut definitions)?;
    }

    Ok(Declarations {
        forward,
        definitions,
        root_symbol: symbols[0].clone(),
    })
}

/* === Symbols === */

/// Derive one C identifier per node from its path. The mapping is injective
/// by construction of the escape; residual collisions (possible only when a
/// path segment itself spells an escape sequence) get the canonical id
/// appended until unique.
fn symbol_table(n: &Normalized) -> Vec<String> {
    let mut symbols = Vec::with_capacity(n.len());
    let mut taken: HashMap<String, NodeId> = HashMap::new();

    for (id, node) in n.iter() {
        let mut sym = path_symbol(&node.path);
        while taken.contains_key(&sym) {
            let _ = write!(sym, "_{}", id.0);
        }
        taken.insert(sym.clone(), id);
        symbols.push(sym);
    }

    symbols
}

fn path_symbol(path: &str) -> String {
    let mut sym = String::from("dt_node_");
    if path == "/" {
        sym.push_str("root");
        return sym;
    }

    let mut first = true;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !first {
            sym.push('_');
        }
        first = false;
        for b in segment.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => sym.push(b as char),
                b'_' => sym.push_str("__"),
                _ => {
                    let _ = write!(sym, "_{b:02x}");
                }
            }
        }
    }
    sym
}

/* === Node rendering === */

fn emit_node(
    n: &Normalized,
    symbols: &[String],
    id: NodeId,
    node: &Node,
    out: &mut String,
) -> Result<(), Error> {
    let sym = &symbols[id.0];
    let _ = writeln!(out, "/* {} */", node.path);

    // Auxiliary arrays backing each property value.
    let mut values = Vec::with_capacity(node.properties.len());
    for (i, prop) in node.properties.iter().enumerate() {
        let value = classify(n, node, prop)?;
        emit_value_array(symbols, sym, i, &value, out);
        values.push(value);
    }

    if !node.properties.is_empty() {
        let _ = writeln!(out, "static const struct dt_property {sym}_props[] = {{");
        for (i, (prop, value)) in node.properties.iter().zip(&values).enumerate() {
            let _ = writeln!(
                out,
                "    {{ .name = {}, .value = {} }},",
                c_string(prop.name.as_bytes()),
                render_value(symbols, sym, i, value)
            );
        }
        let _ = writeln!(out, "}};");
    }

    let children = n.children_of(id);
    if !children.is_empty() {
        let _ = writeln!(
            out,
            "static const struct dt_node *const {sym}_children[] = {{"
        );
        for child in children {
            let _ = writeln!(out, "    &{},", symbols[child.0]);
        }
        let _ = writeln!(out, "}};");
    }

    let _ = writeln!(out, "static const struct dt_node {sym} = {{");
    let _ = writeln!(out, "    .path = {},", c_string(node.path.as_bytes()));
    let _ = writeln!(out, "    .name = {},", c_string(node.name.as_bytes()));
    let _ = writeln!(
        out,
        "    .unit_address = {},",
        match &node.unit_address {
            Some(addr) => c_string(addr.as_bytes()),
            None => "NULL".to_string(),
        }
    );
    let _ = writeln!(
        out,
        "    .label = {},",
        match node.label() {
            Some(label) => c_string(label.as_bytes()),
            None => "NULL".to_string(),
        }
    );
    let _ = writeln!(out, "    .phandle = {}u,", node.phandle.unwrap_or(0));
    if node.properties.is_empty() {
        let _ = writeln!(out, "    .properties = NULL,");
    } else {
        let _ = writeln!(out, "    .properties = {sym}_props,");
    }
    let _ = writeln!(out, "    .num_properties = {}u,", node.properties.len());
    if children.is_empty() {
        let _ = writeln!(out, "    .children = NULL,");
    } else {
        let _ = writeln!(out, "    .children = {sym}_children,");
    }
    let _ = writeln!(out, "    .num_children = {}u,", children.len());
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    Ok(())
}

/// Emit the array a value points into, if its variant needs one.
fn emit_value_array(symbols: &[String], sym: &str, i: usize, value: &TypedValue, out: &mut String) {
    match value {
        TypedValue::Empty | TypedValue::PhandleRef(_) => {}
        TypedValue::StringList(strings) => {
            let _ = writeln!(
                out,
                "static const char *const {sym}_prop{i}_strings[] = {{"
            );
            for s in strings {
                let _ = writeln!(out, "    {},", c_string(s.as_bytes()));
            }
            let _ = writeln!(out, "}};");
        }
        TypedValue::Cells32(cells) => {
            let _ = write!(out, "static const uint32_t {sym}_prop{i}_cells[] = {{");
            for (j, c) in cells.iter().enumerate() {
                let sep = if j == 0 { " " } else { ", " };
                let _ = write!(out, "{sep}0x{c:x}u");
            }
            let _ = writeln!(out, " }};");
        }
        TypedValue::Cells64(cells) => {
            let _ = write!(out, "static const uint64_t {sym}_prop{i}_cells64[] = {{");
            for (j, c) in cells.iter().enumerate() {
                let sep = if j == 0 { " " } else { ", " };
                let _ = write!(out, "{sep}0x{c:x}ull");
            }
            let _ = writeln!(out, " }};");
        }
        TypedValue::MixedCellList(cells) => {
            let _ = writeln!(
                out,
                "static const struct dt_mixed_cell {sym}_prop{i}_mixed[] = {{"
            );
            for c in cells {
                match c {
                    MixedCell::Lit(v) => {
                        let _ = writeln!(
                            out,
                            "    {{ .kind = DT_MIXED_LIT, .node = NULL, .value = 0x{v:x}u }},"
                        );
                    }
                    MixedCell::Ref(id) => {
                        let _ = writeln!(
                            out,
                            "    {{ .kind = DT_MIXED_REF, .node = &{}, .value = 0u }},",
                            symbols[id.0]
                        );
                    }
                }
            }
            let _ = writeln!(out, "}};");
        }
        TypedValue::Bytes(bytes) => {
            let _ = write!(out, "static const uint8_t {sym}_prop{i}_bytes[] = {{");
            for (j, b) in bytes.iter().enumerate() {
                let sep = if j == 0 { " " } else { ", " };
                let _ = write!(out, "{sep}0x{b:02x}u");
            }
            let _ = writeln!(out, " }};");
        }
    }
}

fn render_value(symbols: &[String], sym: &str, i: usize, value: &TypedValue) -> String {
    match value {
        TypedValue::Empty => "{ .kind = DT_VALUE_EMPTY, .count = 0u }".to_string(),
        TypedValue::StringList(strings) => format!(
            "{{ .kind = DT_VALUE_STRINGS, .count = {}u, .strings = {sym}_prop{i}_strings }}",
            strings.len()
        ),
        TypedValue::Cells32(cells) => format!(
            "{{ .kind = DT_VALUE_CELLS32, .count = {}u, .cells32 = {sym}_prop{i}_cells }}",
            cells.len()
        ),
        TypedValue::Cells64(cells) => format!(
            "{{ .kind = DT_VALUE_CELLS64, .count = {}u, .cells64 = {sym}_prop{i}_cells64 }}",
            cells.len()
        ),
        TypedValue::PhandleRef(id) => format!(
            "{{ .kind = DT_VALUE_PHANDLE, .count = 1u, .node = &{} }}",
            symbols[id.0]
        ),
        TypedValue::MixedCellList(cells) => format!(
            "{{ .kind = DT_VALUE_MIXED, .count = {}u, .mixed = {sym}_prop{i}_mixed }}",
            cells.len()
        ),
        TypedValue::Bytes(bytes) => format!(
            "{{ .kind = DT_VALUE_BYTES, .count = {}u, .bytes = {sym}_prop{i}_bytes }}",
            bytes.len()
        ),
    }
}

/// Render bytes as a C string literal. Non-printable bytes use three-digit
/// octal escapes so a following digit cannot extend the escape.
pub(crate) fn c_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link;

    fn emitted(source: &str) -> Declarations {
        let tree = link::from_source(source).unwrap();
        let n = Normalized::build(&tree).unwrap();
        emit(&n).unwrap()
    }

    #[test]
    fn root_symbol_is_stable() {
        let d = emitted("/ { };");
        assert_eq!(d.root_symbol, "dt_node_root");
        assert!(d.forward.contains("static const struct dt_node dt_node_root;"));
    }

    #[test]
    fn path_symbols_escape_non_identifier_bytes() {
        assert_eq!(path_symbol("/"), "dt_node_root");
        assert_eq!(path_symbol("/soc/serial@1000"), "dt_node_soc_serial_401000");
        assert_eq!(path_symbol("/a-b"), "dt_node_a_2db");
        assert_eq!(path_symbol("/has_underscore"), "dt_node_has__underscore");
    }

    #[test]
    fn colliding_symbols_get_the_canonical_id_appended() {
        // `/a-b` and `/a/2db` both escape to `dt_node_a_2db`.
        let d = emitted("/ { a-b { }; a { 2db { }; }; };");
        assert!(d.forward.contains("dt_node_a_2db;"));
        assert!(d.forward.contains("dt_node_a_2db_3;"));
    }

    #[test]
    fn every_node_is_forward_declared_before_any_definition() {
        let d = emitted("/ { a { b { }; }; c { }; };");
        assert_eq!(d.forward.matches("static const struct dt_node ").count(), 4);
        for sym in ["dt_node_root", "dt_node_a", "dt_node_a_b", "dt_node_c"] {
            assert!(d.forward.contains(&format!("static const struct dt_node {sym};")));
            assert!(d.definitions.contains(&format!("static const struct dt_node {sym} = {{")));
        }
    }

    #[test]
    fn forward_reference_uses_the_target_symbol() {
        let d = emitted("/ { a { next = <&later>; }; later: b { }; };");
        assert!(d
            .definitions
            .contains(".value = { .kind = DT_VALUE_PHANDLE, .count = 1u, .node = &dt_node_b }"));
    }

    #[test]
    fn mixed_cells_render_literals_and_refs() {
        let d = emitted("/ { i: intc { }; a { irq = <&i 5>; }; };");
        assert!(d
            .definitions
            .contains("{ .kind = DT_MIXED_REF, .node = &dt_node_intc, .value = 0u },"));
        assert!(d
            .definitions
            .contains("{ .kind = DT_MIXED_LIT, .node = NULL, .value = 0x5u },"));
    }

    #[test]
    fn strings_and_cells_render_as_arrays() {
        let d = emitted(r#"/ { compatible = "a", "b"; reg = <1 0x20>; };"#);
        assert!(d.definitions.contains(
            "static const char *const dt_node_root_prop0_strings[] = {\n    \"a\",\n    \"b\",\n};"
        ));
        assert!(d
            .definitions
            .contains("static const uint32_t dt_node_root_prop1_cells[] = { 0x1u, 0x20u };"));
    }

    #[test]
    fn node_metadata_fields() {
        let d = emitted("/ { u0: serial@1000 { phandle = <3>; }; };");
        assert!(d.definitions.contains(".name = \"serial\","));
        assert!(d.definitions.contains(".unit_address = \"1000\","));
        assert!(d.definitions.contains(".label = \"u0\","));
        assert!(d.definitions.contains(".phandle = 3u,"));
    }

    #[test]
    fn c_string_escapes() {
        assert_eq!(c_string(b"plain"), r#""plain""#);
        assert_eq!(c_string(b"a\"b\\c"), r#""a\"b\\c""#);
        assert_eq!(c_string(b"line\n"), r#""line\n""#);
        assert_eq!(c_string(&[0x01, b'2']), r#""\0012""#);
    }
}
