//! Maps raw property values to the typed representation emitted as C.
//!
//! Classification is total for reference-free values: anything well-formed
//! falls through to [`TypedValue::Bytes`] when no richer shape applies.
//! Reference markers drive the choice first, since a path placeholder is
//! indistinguishable from a string by looking at the bytes alone — and a
//! value carrying references must keep them representable, so the byte
//! fallback never swallows a marker.

use crate::error::Error;
use crate::normalize::{NodeId, Normalized};
use crate::tree::{MarkerKind, Node, Property};

/// The typed value of a property, ready for emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    /// Presence-only property (`foo;`).
    Empty,
    /// One or more NUL-terminated strings.
    StringList(Vec<String>),
    /// A 32-bit cell array with no references.
    Cells32(Vec<u32>),
    /// A `/bits/ 64` cell array.
    Cells64(Vec<u64>),
    /// A value that is exactly one node reference.
    PhandleRef(NodeId),
    /// A 32-bit cell array mixing literals and references.
    MixedCellList(Vec<MixedCell>),
    /// Fallback: uninterpreted bytes.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixedCell {
    Lit(u32),
    Ref(NodeId),
}

/// Classify one property of `node`.
pub fn classify(n: &Normalized, node: &Node, prop: &Property) -> Result<TypedValue, Error> {
    let unsupported = |reason: String| Error::UnsupportedValue {
        node: node.path.clone(),
        property: prop.name.clone(),
        reason,
    };
    let resolve = |token: &str| {
        n.resolve(token).ok_or_else(|| Error::UnresolvedReference {
            node: node.path.clone(),
            property: prop.name.clone(),
            reference: token.to_string(),
        })
    };

    if prop.raw.is_empty() {
        return Ok(TypedValue::Empty);
    }

    let path_markers = prop
        .markers
        .iter()
        .filter(|m| m.kind == MarkerKind::Path)
        .count();

    if path_markers > 0 {
        if path_markers != prop.markers.len() {
            let cell = prop
                .markers
                .iter()
                .find(|m| m.kind == MarkerKind::Cell)
                .map(|m| m.reference.as_str())
                .unwrap_or_default();
            return Err(unsupported(format!(
                "cell reference &{cell} mixed with node references in one value"
            )));
        }

        // A value that is exactly one reference becomes a node pointer.
        if let [m] = prop.markers.as_slice() {
            if m.offset == 0 && m.len == prop.raw.len() {
                return Ok(TypedValue::PhandleRef(resolve(&m.reference)?));
            }
        }

        // Otherwise substitute each placeholder with the target's path and
        // try to read the result as strings.
        let mut raw = Vec::with_capacity(prop.raw.len());
        let mut at = 0;
        for m in &prop.markers {
            raw.extend_from_slice(&prop.raw[at..m.offset]);
            let target = n.node(resolve(&m.reference)?);
            raw.extend_from_slice(target.path.as_bytes());
            raw.push(0);
            at = m.offset + m.len;
        }
        raw.extend_from_slice(&prop.raw[at..]);

        return Ok(match string_list(&raw) {
            Some(strings) => TypedValue::StringList(strings),
            None => TypedValue::Bytes(raw),
        });
    }

    if !prop.markers.is_empty() {
        // A cell reference only exists inside a 32-bit cell array, but the
        // surrounding value may mix in strings or byte strings. As long as
        // the whole value decomposes into aligned 32-bit cells it renders
        // as a mixed cell list, the non-cell bytes becoming literal cells.
        // When it does not, the byte fallback would silently drop the
        // reference, so the value is rejected instead.
        if prop.raw.len() % 4 != 0 {
            return Err(unsupported(format!(
                "reference &{} in a value that does not decompose into 32-bit cells",
                prop.markers[0].reference
            )));
        }
        for m in &prop.markers {
            if m.len != 4 || m.offset % 4 != 0 {
                return Err(unsupported(format!(
                    "reference &{} is not aligned to a 32-bit cell",
                    m.reference
                )));
            }
        }

        if prop.raw.len() == 4 {
            if let [m] = prop.markers.as_slice() {
                return Ok(TypedValue::PhandleRef(resolve(&m.reference)?));
            }
        }

        let mut cells = Vec::with_capacity(prop.raw.len() / 4);
        let mut markers = prop.markers.iter().peekable();
        for (i, chunk) in prop.raw.chunks_exact(4).enumerate() {
            let offset = i * 4;
            if markers.peek().is_some_and(|m| m.offset == offset) {
                let m = markers.next().ok_or_else(|| {
                    unsupported("marker list out of sync".to_string())
                })?;
                cells.push(MixedCell::Ref(resolve(&m.reference)?));
            } else {
                cells.push(MixedCell::Lit(u32::from_be_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3],
                ])));
            }
        }
        return Ok(TypedValue::MixedCellList(cells));
    }

    if let Some(strings) = string_list(&prop.raw) {
        return Ok(TypedValue::StringList(strings));
    }

    match prop.bits {
        32 if prop.raw.len() % 4 == 0 => Ok(TypedValue::Cells32(
            prop.raw
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )),
        64 if prop.raw.len() % 8 == 0 => Ok(TypedValue::Cells64(
            prop.raw
                .chunks_exact(8)
                .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )),
        _ => Ok(TypedValue::Bytes(prop.raw.clone())),
    }
}

/// Read `raw` as a list of NUL-terminated printable strings. The single
/// NUL byte reads as one empty string; an empty or non-conforming value
/// reads as nothing.
fn string_list(raw: &[u8]) -> Option<Vec<String>> {
    if raw.last() != Some(&0) {
        return None;
    }
    if raw == [0] {
        return Some(vec![String::new()]);
    }

    let mut strings = Vec::new();
    for segment in raw[..raw.len() - 1].split(|&b| b == 0) {
        if segment.is_empty() {
            return None;
        }
        let s = std::str::from_utf8(segment).ok()?;
        if !s.chars().all(|c| (' '..='~').contains(&c)) {
            return None;
        }
        strings.push(s.to_string());
    }
    Some(strings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link;
    use crate::tree::Tree;

    fn classified(source: &str) -> Vec<(String, TypedValue)> {
        let tree: Tree = link::from_source(source).unwrap();
        let n = Normalized::build(&tree).unwrap();
        let mut out = Vec::new();
        for (_, node) in n.iter() {
            for prop in &node.properties {
                out.push((
                    format!("{}:{}", node.path, prop.name),
                    classify(&n, node, prop).unwrap(),
                ));
            }
        }
        out
    }

    fn one(source: &str, key: &str) -> TypedValue {
        classified(source)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("property {key} not found"))
    }

    fn classify_err(source: &str, path: &str, name: &str) -> Error {
        let tree: Tree = link::from_source(source).unwrap();
        let n = Normalized::build(&tree).unwrap();
        let (_, node) = n.iter().find(|(_, nd)| nd.path == path).unwrap();
        let prop = node.property(name).unwrap();
        classify(&n, node, prop).unwrap_err()
    }

    #[test]
    fn empty_value() {
        assert_eq!(one("/ { flag; };", "/:flag"), TypedValue::Empty);
    }

    #[test]
    fn string_lists() {
        assert_eq!(
            one(r#"/ { compatible = "a,b", "c"; };"#, "/:compatible"),
            TypedValue::StringList(vec!["a,b".to_string(), "c".to_string()])
        );
        assert_eq!(
            one(r#"/ { s = ""; };"#, "/:s"),
            TypedValue::StringList(vec![String::new()])
        );
    }

    #[test]
    fn string_with_control_bytes_is_bytes() {
        assert_eq!(
            one(r#"/ { s = "a\x01b"; };"#, "/:s"),
            TypedValue::Bytes(vec![b'a', 1, b'b', 0])
        );
    }

    #[test]
    fn cell_arrays() {
        assert_eq!(
            one("/ { reg = <1 2 3>; };", "/:reg"),
            TypedValue::Cells32(vec![1, 2, 3])
        );
        assert_eq!(
            one("/ { freq = /bits/ 64 <0x16e3600>; };", "/:freq"),
            TypedValue::Cells64(vec![0x16e3600])
        );
    }

    #[test]
    fn narrow_cells_fall_back_to_bytes() {
        assert_eq!(
            one("/ { v = /bits/ 8 <0x12 0x34>; };", "/:v"),
            TypedValue::Bytes(vec![0x12, 0x34])
        );
        assert_eq!(
            one("/ { v = /bits/ 16 <0x1234>; };", "/:v"),
            TypedValue::Bytes(vec![0x12, 0x34])
        );
    }

    #[test]
    fn byte_strings() {
        assert_eq!(
            one("/ { mac = [00 11 22]; };", "/:mac"),
            TypedValue::Bytes(vec![0x00, 0x11, 0x22])
        );
    }

    #[test]
    fn single_cell_reference_is_a_phandle_ref() {
        assert_eq!(
            one("/ { t: target { }; a { p = <&t>; }; };", "/a:p"),
            TypedValue::PhandleRef(NodeId(1))
        );
    }

    #[test]
    fn value_level_reference_is_a_phandle_ref() {
        assert_eq!(
            one("/ { t: target { }; a { p = &t; }; };", "/a:p"),
            TypedValue::PhandleRef(NodeId(1))
        );
    }

    #[test]
    fn mixed_cell_list() {
        assert_eq!(
            one("/ { i: intc { }; a { irq = <&i 5 0>; }; };", "/a:irq"),
            TypedValue::MixedCellList(vec![
                MixedCell::Ref(NodeId(1)),
                MixedCell::Lit(5),
                MixedCell::Lit(0),
            ])
        );
    }

    #[test]
    fn cell_refs_mixed_with_strings_classify_when_cell_aligned() {
        assert_eq!(
            one(r#"/ { m: t { }; n { v = <&m 1>, "abc"; }; };"#, "/n:v"),
            TypedValue::MixedCellList(vec![
                MixedCell::Ref(NodeId(1)),
                MixedCell::Lit(1),
                MixedCell::Lit(0x61626300),
            ])
        );
    }

    #[test]
    fn cell_ref_in_non_cell_sized_value_is_rejected() {
        let err = classify_err(
            r#"/ { mpic: pic { }; n { example = <&mpic 0xf00f0000 19>, "a strange property format"; }; };"#,
            "/n",
            "example",
        );
        match err {
            Error::UnsupportedValue { property, reason, .. } => {
                assert_eq!(property, "example");
                assert!(reason.contains("&mpic"), "reason: {reason}");
                assert!(reason.contains("32-bit cells"), "reason: {reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mixed_path_and_cell_references_name_the_cell_token() {
        let err = classify_err("/ { a: x { }; b: y { }; n { p = <&a>, &b; }; };", "/n", "p");
        match err {
            Error::UnsupportedValue { reason, .. } => {
                assert!(reason.contains("&a"), "reason: {reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reference_plus_string_becomes_path_string_list() {
        assert_eq!(
            one(
                r#"/ { t: soc { }; a { p = &t, "extra"; }; };"#,
                "/a:p"
            ),
            TypedValue::StringList(vec!["/soc".to_string(), "extra".to_string()])
        );
    }

    #[test]
    fn classification_never_fails_on_wellformed_input() {
        // Odd byte counts, unterminated strings, mixed shapes all land in
        // the byte fallback rather than an error.
        for (src, key) in [
            ("/ { v = [aa bb cc]; };", "/:v"),
            (r#"/ { v = <1>, "x"; };"#, "/:v"),
            ("/ { v = /bits/ 8 <1 2 3>; };", "/:v"),
        ] {
            assert!(matches!(one(src, key), TypedValue::Bytes(_)));
        }
    }
}
