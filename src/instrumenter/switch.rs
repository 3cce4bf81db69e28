use std::collections::HashMap;

use tree_sitter::Node;

use super::discover::Placement;

pub const ACTIVE_MUTANT: &str = "globalThis.__mutantActive";
pub const PREAMBLE: &str = "// @ts-nocheck\n";

/// One mutant switched into a node: the full node text with the mutation applied.
pub(crate) struct Switch {
    pub id: String,
    pub alternative: String,
}

pub(crate) struct SwitchSet {
    pub placement: Placement,
    pub switches: Vec<Switch>,
}

/// Rebuild `source` with every node in `switches` wrapped in its mutant switch.
/// Alternatives carry the original children, so nested switches only ever live
/// on the original branch.
pub(crate) fn emit_file(root: Node, source: &str, switches: &HashMap<usize, SwitchSet>) -> String {
    let mut out = String::with_capacity(source.len() * 2);
    let body_start = shebang_len(source);
    out.push_str(&source[..body_start]);
    out.push_str(PREAMBLE);
    out.push_str(&source[body_start..root.start_byte().max(body_start)]);
    emit_node(root, source, switches, &mut out, body_start);
    out.push_str(&source[root.end_byte()..]);
    out
}

fn shebang_len(source: &str) -> usize {
    if source.starts_with("#!") {
        source.find('\n').map(|i| i + 1).unwrap_or(source.len())
    } else {
        0
    }
}

fn emit_node(
    node: Node,
    source: &str,
    switches: &HashMap<usize, SwitchSet>,
    out: &mut String,
    floor: usize,
) {
    let start = node.start_byte().max(floor);
    let mut inner = String::new();
    let mut cursor = start;
    let mut walker = node.walk();
    for child in node.children(&mut walker) {
        if child.end_byte() <= floor {
            continue;
        }
        inner.push_str(&source[cursor..child.start_byte().max(cursor)]);
        emit_node(child, source, switches, &mut inner, floor);
        cursor = child.end_byte();
    }
    inner.push_str(&source[cursor..node.end_byte().max(cursor)]);

    match switches.get(&node.id()) {
        None => out.push_str(&inner),
        Some(set) => out.push_str(&wrap(set, &inner)),
    }
}

fn condition(id: &str) -> String {
    format!("{ACTIVE_MUTANT} === \"{id}\"")
}

fn wrap(set: &SwitchSet, original: &str) -> String {
    match set.placement {
        Placement::Expression => {
            let mut s = String::from("(");
            for sw in &set.switches {
                s.push_str(&format!("{} ? ({}) : ", condition(&sw.id), sw.alternative));
            }
            s.push_str(&format!("({original}))"));
            s
        }
        Placement::Statement => {
            let mut s = String::from("{ ");
            for (i, sw) in set.switches.iter().enumerate() {
                if i > 0 {
                    s.push_str(" else ");
                }
                s.push_str(&format!("if ({}) {{ {} }}", condition(&sw.id), sw.alternative));
            }
            s.push_str(&format!(" else {{ {original} }} }}"));
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(placement: Placement, ids: &[(&str, &str)]) -> SwitchSet {
        SwitchSet {
            placement,
            switches: ids
                .iter()
                .map(|(id, alt)| Switch { id: id.to_string(), alternative: alt.to_string() })
                .collect(),
        }
    }

    #[test]
    fn expression_switches_chain_ternaries() {
        let s = set(Placement::Expression, &[("0", "a >= b"), ("1", "a <= b")]);
        assert_eq!(
            wrap(&s, "a > b"),
            "(globalThis.__mutantActive === \"0\" ? (a >= b) : \
             globalThis.__mutantActive === \"1\" ? (a <= b) : (a > b))"
        );
    }

    #[test]
    fn statement_switches_use_if_else() {
        let s = set(Placement::Statement, &[("4", "return null;")]);
        assert_eq!(
            wrap(&s, "return x;"),
            "{ if (globalThis.__mutantActive === \"4\") { return null; } else { return x; } }"
        );
    }

    #[test]
    fn shebang_is_kept_first() {
        assert_eq!(shebang_len("#!/usr/bin/env node\nfoo()"), 20);
        assert_eq!(shebang_len("foo()"), 0);
    }
}
