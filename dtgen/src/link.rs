//! Builds a fully linked [`Tree`] from parsed DTS input.
//!
//! This is the glue to the upstream parser: `/include/` directives are
//! expanded lexically (the way dtlib treats them) before parsing, then the
//! AST's top-level blocks are merged in document order. Later property
//! assignments replace earlier values in place, `&label { ... }` blocks
//! extend previously defined nodes, and deletion directives apply as they
//! are encountered.

use std::fs;
use std::path::{Path, PathBuf};

use dts_parser::ast;

use crate::error::Error;
use crate::tree::{Marker, MarkerKind, Node, Property, Tree};

/// Parse and link `path`, resolving `/include/`d files relative to the
/// including file first, then through `include_dirs` in order.
pub fn load(path: &Path, include_dirs: &[PathBuf]) -> Result<Tree, Error> {
    let source = expand_includes(path, include_dirs, &mut Vec::new())?;
    link_source(&source, path)
}

/// Link a source string directly. Include directives are not resolvable in
/// this mode and are reported as missing.
pub fn from_source(source: &str) -> Result<Tree, Error> {
    link_source(source, Path::new("<input>"))
}

fn link_source(source: &str, file: &Path) -> Result<Tree, Error> {
    let dts = dts_parser::from_str(source).map_err(|e| Error::Parse {
        file: file.to_path_buf(),
        source: e,
    })?;
    link(&dts, file)
}

/* === Include expansion === */

fn expand_includes(
    path: &Path,
    include_dirs: &[PathBuf],
    stack: &mut Vec<PathBuf>,
) -> Result<String, Error> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if stack.contains(&canonical) {
        return Err(Error::IncludeCycle {
            file: stack.last().cloned().unwrap_or_default(),
            include: path.display().to_string(),
        });
    }

    let text = fs::read_to_string(path).map_err(|e| Error::Read {
        file: path.to_path_buf(),
        source: e,
    })?;

    stack.push(canonical);
    let expanded = splice_includes(&text, path, include_dirs, stack)?;
    stack.pop();
    Ok(expanded)
}

/// Replace every `/include/ "file"` outside strings and comments with the
/// (recursively expanded) contents of that file.
fn splice_includes(
    text: &str,
    path: &Path,
    include_dirs: &[PathBuf],
    stack: &mut Vec<PathBuf>,
) -> Result<String, Error> {
    const DIRECTIVE: &str = "/include/";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['"', '/']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find('\n').map(|p| 2 + p + 1).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else if let Some(after) = rest.strip_prefix("/*") {
            let end = after.find("*/").map(|p| 2 + p + 2).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else if let Some(after) = rest.strip_prefix(DIRECTIVE) {
            let after = after.trim_start();
            let Some(quoted) = after.strip_prefix('"') else {
                // Malformed directive: hand the rest to the parser, which
                // will report the syntax error with a position.
                out.push_str(rest);
                rest = "";
                break;
            };
            let Some(close) = quoted.find('"') else {
                out.push_str(rest);
                rest = "";
                break;
            };
            let include = &quoted[..close];
            let resolved = resolve_include(path, include_dirs, include)?;
            out.push_str(&expand_includes(&resolved, include_dirs, stack)?);
            out.push('\n');
            rest = &quoted[close + 1..];
        } else if rest.starts_with('"') {
            let bytes = rest.as_bytes();
            let mut end = 1;
            while end < bytes.len() {
                match bytes[end] {
                    b'\\' => end += 2,
                    b'"' => {
                        end += 1;
                        break;
                    }
                    _ => end += 1,
                }
            }
            let end = end.min(bytes.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else {
            out.push_str(&rest[..1]);
            rest = &rest[1..];
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_include(
    from: &Path,
    include_dirs: &[PathBuf],
    include: &str,
) -> Result<PathBuf, Error> {
    let local = from
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(include);
    if local.is_file() {
        return Ok(local);
    }

    for dir in include_dirs {
        let candidate = dir.join(include);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(Error::IncludeNotFound {
        file: from.to_path_buf(),
        include: include.to_string(),
    })
}

/* === AST merging === */

fn link(dts: &ast::Dts, file: &Path) -> Result<Tree, Error> {
    let mut root = Node {
        name: "/".to_string(),
        path: "/".to_string(),
        ..Default::default()
    };

    for item in &dts.items {
        match item {
            ast::TopLevel::Root(node) => merge_node(&mut root, node, "/")?,
            ast::TopLevel::Override(node) => {
                let ast::NodeId::Ref(r) = &node.id else {
                    continue;
                };
                let Some(target) = find_mut(&mut root, r.0) else {
                    return Err(Error::UnresolvedReference {
                        node: "/".to_string(),
                        property: "(node override)".to_string(),
                        reference: r.0.to_string(),
                    });
                };
                let path = target.path.clone();
                merge_node(target, node, &path)?;
            }
            ast::TopLevel::DeleteNode(id) => delete_top_level(&mut root, id)?,
            ast::TopLevel::Include(inc) => return Err(include_error(inc, file)),
            // Only affects which unreferenced nodes a dtb emitter would
            // drop; the generated code keeps every node.
            ast::TopLevel::OmitIfNoRef(_) => {}
        }
    }

    finalize(&mut root)?;
    Ok(Tree { root })
}

fn include_error(inc: &ast::Include, file: &Path) -> Error {
    match inc {
        ast::Include::Dts(p) => Error::IncludeNotFound {
            file: file.to_path_buf(),
            include: (*p).to_string(),
        },
        ast::Include::C(p) => Error::CppInclude {
            include: (*p).to_string(),
        },
    }
}

fn merge_node(dst: &mut Node, src: &ast::Node, path: &str) -> Result<(), Error> {
    for label in &src.labels {
        if !dst.labels.iter().any(|l| l == label) {
            dst.labels.push((*label).to_string());
        }
    }

    for item in &src.items {
        match item {
            ast::NodeItem::Property(p) => {
                let prop = encode_property(p, path)?;
                match dst.properties.iter_mut().find(|q| q.name == prop.name) {
                    Some(existing) => *existing = prop,
                    None => dst.properties.push(prop),
                }
            }
            ast::NodeItem::Child(c) => {
                let ast::NodeId::Name(name, unit) = &c.id else {
                    continue;
                };
                let child_path = join_path(path, name, *unit);
                let child = match dst
                    .children
                    .iter_mut()
                    .position(|x| x.name == *name && x.unit_address.as_deref() == *unit)
                {
                    Some(i) => &mut dst.children[i],
                    None => {
                        dst.children.push(Node {
                            name: (*name).to_string(),
                            unit_address: unit.map(str::to_string),
                            ..Default::default()
                        });
                        let last = dst.children.len() - 1;
                        &mut dst.children[last]
                    }
                };
                merge_node(child, c, &child_path)?;
            }
            ast::NodeItem::Include(inc) => {
                return Err(include_error(inc, Path::new(path)));
            }
            ast::NodeItem::DeleteProperty(name) => {
                dst.properties.retain(|p| p.name != *name);
            }
            ast::NodeItem::DeleteNode(id) => {
                if let ast::NodeId::Name(name, unit) = id {
                    dst.children
                        .retain(|c| !(c.name == *name && c.unit_address.as_deref() == *unit));
                }
            }
        }
    }

    Ok(())
}

fn delete_top_level(root: &mut Node, id: &ast::NodeId) -> Result<(), Error> {
    match id {
        ast::NodeId::Name(name, unit) => {
            root.children
                .retain(|c| !(c.name == *name && c.unit_address.as_deref() == *unit));
            Ok(())
        }
        ast::NodeId::Ref(r) => {
            let removed = if r.0.starts_with('/') {
                remove_by_path(root, r.0)
            } else {
                remove_labeled(root, r.0)
            };
            if removed {
                Ok(())
            } else {
                Err(Error::UnresolvedReference {
                    node: "/".to_string(),
                    property: "/delete-node/".to_string(),
                    reference: r.0.to_string(),
                })
            }
        }
    }
}

/// Remove the node carrying `label`, wherever it sits. Name matching would
/// not do here: an unrelated node elsewhere may share the target's name.
fn remove_labeled(node: &mut Node, label: &str) -> bool {
    let before = node.children.len();
    node.children
        .retain(|c| !c.labels.iter().any(|l| l == label));
    if node.children.len() != before {
        return true;
    }
    node.children.iter_mut().any(|c| remove_labeled(c, label))
}

fn remove_by_path(root: &mut Node, path: &str) -> bool {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.pop() else {
        return false;
    };

    let mut cur = root;
    for segment in segments {
        match cur.children.iter_mut().find(|c| c.full_name() == segment) {
            Some(child) => cur = child,
            None => return false,
        }
    }

    let before = cur.children.len();
    cur.children.retain(|c| c.full_name() != last);
    cur.children.len() != before
}

/// Locate a node by `&label` token or `/full/path`, in the partially
/// merged tree.
fn find_mut<'t>(root: &'t mut Node, token: &str) -> Option<&'t mut Node> {
    if token.starts_with('/') {
        find_path_mut(root, token)
    } else {
        find_label_mut(root, token)
    }
}

fn find_path_mut<'t>(root: &'t mut Node, path: &str) -> Option<&'t mut Node> {
    let mut cur = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        cur = cur
            .children
            .iter_mut()
            .find(|c| c.full_name() == segment)?;
    }
    Some(cur)
}

fn find_label_mut<'t>(node: &'t mut Node, label: &str) -> Option<&'t mut Node> {
    if node.labels.iter().any(|l| l == label) {
        return Some(node);
    }
    for child in &mut node.children {
        if let Some(found) = find_label_mut(child, label) {
            return Some(found);
        }
    }
    None
}

fn join_path(parent: &str, name: &str, unit: Option<&str>) -> String {
    let full = match unit {
        Some(u) => format!("{name}@{u}"),
        None => name.to_string(),
    };
    if parent == "/" {
        format!("/{full}")
    } else {
        format!("{parent}/{full}")
    }
}

/* === Value encoding === */

fn encode_property(p: &ast::Property, path: &str) -> Result<Property, Error> {
    let mut prop = Property {
        name: p.name.to_string(),
        raw: Vec::new(),
        markers: Vec::new(),
        bits: 0,
    };

    let Some(values) = &p.values else {
        return Ok(prop);
    };

    let unsupported = |reason: String| Error::UnsupportedValue {
        node: path.to_string(),
        property: p.name.to_string(),
        reason,
    };

    for value in values {
        match value {
            ast::Value::String(s) => {
                prop.raw.extend(unescape(s));
                prop.raw.push(0);
            }
            ast::Value::Ref(r) => {
                // Placeholder region; the classifier resolves the token and
                // substitutes the target path.
                let offset = prop.raw.len();
                prop.raw.extend(r.0.bytes());
                prop.raw.push(0);
                prop.markers.push(Marker {
                    offset,
                    len: prop.raw.len() - offset,
                    kind: MarkerKind::Path,
                    reference: r.0.to_string(),
                });
            }
            ast::Value::Bytes(bytes) => prop.raw.extend(bytes),
            ast::Value::Cells(width, cells) => {
                for cell in cells {
                    match cell {
                        ast::Cell::Ref(r) => {
                            if *width != 32 {
                                return Err(unsupported(format!(
                                    "reference in a {width}-bit cell array (phandles are 32-bit)"
                                )));
                            }
                            prop.markers.push(Marker {
                                offset: prop.raw.len(),
                                len: 4,
                                kind: MarkerKind::Cell,
                                reference: r.0.to_string(),
                            });
                            prop.raw.extend([0u8; 4]);
                        }
                        ast::Cell::Expr(e) => {
                            let v = e.eval().map_err(|err| unsupported(err.to_string()))? as u64;
                            match width {
                                8 => prop.raw.push(v as u8),
                                16 => prop.raw.extend((v as u16).to_be_bytes()),
                                64 => prop.raw.extend(v.to_be_bytes()),
                                _ => prop.raw.extend((v as u32).to_be_bytes()),
                            }
                        }
                    }
                }
            }
        }
    }

    // Record the cell width only when the whole value is cell arrays of one
    // uniform width; anything else carries no width hint.
    let widths: Vec<u32> = values
        .iter()
        .filter_map(|v| match v {
            ast::Value::Cells(w, _) => Some(*w),
            _ => None,
        })
        .collect();
    if widths.len() == values.len() && !widths.is_empty() && widths.iter().all(|w| *w == widths[0])
    {
        prop.bits = widths[0];
    }

    Ok(prop)
}

/// Interpret C-style escapes in a string literal body.
fn unescape(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            None => out.push(b'\\'),
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('a') => out.push(0x07),
            Some('b') => out.push(0x08),
            Some('f') => out.push(0x0c),
            Some('v') => out.push(0x0b),
            Some('x') => {
                let mut value: u32 = 0;
                let mut seen = 0;
                while seen < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            seen += 1;
                        }
                        None => break,
                    }
                }
                if seen == 0 {
                    out.push(b'x');
                } else {
                    out.push(value as u8);
                }
            }
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                let mut seen = 1;
                while seen < 3 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                            seen += 1;
                        }
                        None => break,
                    }
                }
                out.push(value as u8);
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    out
}

/* === Finalization === */

/// Assign absolute paths and extract explicit phandle values.
fn finalize(root: &mut Node) -> Result<(), Error> {
    finalize_at(root, "/")
}

fn finalize_at(node: &mut Node, path: &str) -> Result<(), Error> {
    node.path = path.to_string();

    if let Some(p) = node
        .properties
        .iter()
        .find(|p| p.name == "phandle" || p.name == "linux,phandle")
    {
        if p.raw.len() != 4 || !p.markers.is_empty() {
            return Err(Error::UnsupportedValue {
                node: path.to_string(),
                property: p.name.clone(),
                reason: "phandle value must be a single literal cell".to_string(),
            });
        }
        node.phandle = Some(u32::from_be_bytes([p.raw[0], p.raw[1], p.raw[2], p.raw[3]]));
    }

    for child in &mut node.children {
        let child_path = join_path(path, &child.name, child.unit_address.as_deref());
        finalize_at(child, &child_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(source: &str) -> Tree {
        from_source(source).unwrap()
    }

    #[test]
    fn empty_root() {
        let t = tree("/dts-v1/; / { };");
        assert_eq!(t.root.path, "/");
        assert_eq!(t.root.name, "/");
        assert!(t.root.properties.is_empty());
        assert!(t.root.children.is_empty());
    }

    #[test]
    fn string_property_encoding() {
        let t = tree(r#"/ { compatible = "foo,bar"; };"#);
        let p = t.root.property("compatible").unwrap();
        assert_eq!(p.raw, b"foo,bar\0");
        assert!(p.markers.is_empty());
    }

    #[test]
    fn cell_encoding_is_big_endian() {
        let t = tree("/ { reg = <0x101f0000 0x1000>; };");
        let p = t.root.property("reg").unwrap();
        assert_eq!(
            p.raw,
            [0x10, 0x1f, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00]
        );
        assert_eq!(p.bits, 32);
    }

    #[test]
    fn bits64_encoding() {
        let t = tree("/ { freq = /bits/ 64 <0x16e3600>; };");
        let p = t.root.property("freq").unwrap();
        assert_eq!(p.raw, [0, 0, 0, 0, 0x01, 0x6e, 0x36, 0x00]);
        assert_eq!(p.bits, 64);
    }

    #[test]
    fn reference_cells_get_markers() {
        let t = tree("/ { intc: pic { }; uart { interrupt-parent = <&intc 5>; }; };");
        let uart = &t.root.children[1];
        let p = uart.property("interrupt-parent").unwrap();
        assert_eq!(p.raw.len(), 8);
        assert_eq!(p.markers.len(), 1);
        assert_eq!(p.markers[0].offset, 0);
        assert_eq!(p.markers[0].kind, MarkerKind::Cell);
        assert_eq!(p.markers[0].reference, "intc");
    }

    #[test]
    fn reference_in_64bit_cells_is_rejected() {
        let err = from_source("/ { a: n { }; bad = /bits/ 64 <&a>; };").unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
    }

    #[test]
    fn later_root_blocks_merge() {
        let t = tree(
            r#"
            / { model = "first"; a { x = <1>; }; };
            / { model = "second"; a { y = <2>; }; b { }; };
            "#,
        );
        let p = t.root.property("model").unwrap();
        assert_eq!(p.raw, b"second\0");
        // `model` kept its original position before `a`.
        assert_eq!(t.root.properties[0].name, "model");
        let a = &t.root.children[0];
        assert_eq!(a.full_name(), "a");
        assert!(a.property("x").is_some());
        assert!(a.property("y").is_some());
        assert_eq!(t.root.children[1].full_name(), "b");
    }

    #[test]
    fn label_override_merges_into_target() {
        let t = tree(
            r#"
            / { uart0: serial@1000 { status = "disabled"; }; };
            &uart0 { status = "okay"; extra = <1>; };
            "#,
        );
        let uart = &t.root.children[0];
        assert_eq!(uart.property("status").unwrap().raw, b"okay\0");
        assert!(uart.property("extra").is_some());
    }

    #[test]
    fn path_override_merges_into_target() {
        let t = tree(
            r#"
            / { soc { serial@1000 { }; }; };
            &{/soc/serial@1000} { status = "okay"; };
            "#,
        );
        let serial = &t.root.children[0].children[0];
        assert_eq!(serial.property("status").unwrap().raw, b"okay\0");
    }

    #[test]
    fn unresolved_override_fails() {
        let err = from_source("/ { }; &missing { };").unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn delete_property_and_node() {
        let t = tree(
            r#"
            / { keep = <1>; gone = <2>; a { }; b { };
                /delete-property/ gone;
                /delete-node/ a;
            };
            "#,
        );
        assert!(t.root.property("keep").is_some());
        assert!(t.root.property("gone").is_none());
        assert_eq!(t.root.children.len(), 1);
        assert_eq!(t.root.children[0].full_name(), "b");
    }

    #[test]
    fn top_level_delete_by_reference() {
        let t = tree("/ { x: victim { }; other { }; }; /delete-node/ &x;");
        assert_eq!(t.root.children.len(), 1);
        assert_eq!(t.root.children[0].full_name(), "other");
    }

    #[test]
    fn delete_by_label_ignores_same_named_nodes() {
        // An unrelated top-level `victim` shares the target's name; only the
        // labeled one under `b` must go.
        let t = tree("/ { victim { }; b { v: victim { }; }; }; /delete-node/ &v;");
        assert_eq!(t.root.children.len(), 2);
        assert_eq!(t.root.children[0].full_name(), "victim");
        assert_eq!(t.root.children[1].full_name(), "b");
        assert!(t.root.children[1].children.is_empty());
    }

    #[test]
    fn delete_by_path_reference() {
        let t = tree("/ { a { c { }; d { }; }; }; /delete-node/ &{/a/c};");
        let a = &t.root.children[0];
        assert_eq!(a.children.len(), 1);
        assert_eq!(a.children[0].full_name(), "d");
    }

    #[test]
    fn delete_by_unresolved_reference_fails() {
        let err = from_source("/ { }; /delete-node/ &ghost;").unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn phandle_property_is_extracted() {
        let t = tree("/ { n { phandle = <7>; }; };");
        assert_eq!(t.root.children[0].phandle, Some(7));
    }

    #[test]
    fn malformed_phandle_fails() {
        let err = from_source("/ { n { phandle = <1 2>; }; };").unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
    }

    #[test]
    fn paths_are_assigned() {
        let t = tree("/ { soc { serial@101f0000 { }; }; };");
        assert_eq!(t.root.children[0].path, "/soc");
        assert_eq!(t.root.children[0].children[0].path, "/soc/serial@101f0000");
    }

    #[test]
    fn unescape_handles_common_escapes() {
        assert_eq!(unescape(r"a\nb"), b"a\nb");
        assert_eq!(unescape(r#"quote \" backslash \\"#), b"quote \" backslash \\");
        assert_eq!(unescape(r"\x41\102"), b"AB");
        assert_eq!(unescape(r"\0"), &[0u8][..]);
    }

    #[test]
    fn labels_accumulate_without_duplicates() {
        let t = tree("/ { l1: n { }; }; &l1 { }; / { l2: l1: n { }; };");
        assert_eq!(t.root.children[0].labels, vec!["l1", "l2"]);
    }

    #[test]
    fn parse_error_reports_file() {
        let err = from_source("NOT VALID").unwrap_err();
        match err {
            Error::Parse { file, .. } => assert_eq!(file, PathBuf::from("<input>")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn leftover_include_is_reported() {
        let err = from_source(r#"/include/ "missing.dtsi" / { };"#).unwrap_err();
        assert!(matches!(err, Error::IncludeNotFound { .. }));
    }
}
