use tree_sitter::Node;

use super::operators::{self, Family, MutationOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Switched with a conditional expression.
    Expression,
    /// Switched with an if/else statement.
    Statement,
}

/// A mutation found in the tree, before it is assigned an id.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    /// `Node::id` of the node the switch wraps.
    pub node_id: usize,
    pub placement: Placement,
    pub placement_range: (usize, usize),
    pub span: (usize, usize),
    pub start: tree_sitter::Point,
    pub end: tree_sitter::Point,
    pub family: Family,
    pub mutator: &'static str,
    pub original: String,
    pub replacement: String,
}

pub(crate) fn discover(root: Node, source: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    walk_node(root, source, false, &mut out);
    out
}

fn walk_node(node: Node, source: &str, in_function: bool, out: &mut Vec<Candidate>) {
    if should_skip_node(node, source) {
        return;
    }
    let in_function = in_function || is_function_node(node.kind());

    if in_function {
        match node.kind() {
            "binary_expression" => collect_binary_mutations(node, source, out),
            "unary_expression" => collect_unary_mutations(node, source, out),
            "return_statement" => collect_return_mutations(node, source, out),
            "true" | "false" => collect_boolean_mutations(node, source, out),
            "if_statement" => collect_if_body_mutations(node, source, out),
            "for_statement" | "for_in_statement" | "while_statement" | "do_statement" => {
                if let Some(body) = node.child_by_field_name("body") {
                    add_block_remove_mutation(body, source, out);
                }
            }
            _ => {}
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_node(child, source, in_function, out);
    }
}

fn is_function_node(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "generator_function_declaration"
            | "method_definition"
            | "arrow_function"
            | "function_expression"
            | "function"
            | "generator_function"
    )
}

fn is_type_node(kind: &str) -> bool {
    kind.ends_with("_type")
        || matches!(
            kind,
            "type_annotation"
                | "type_arguments"
                | "type_parameters"
                | "type_alias_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "ambient_declaration"
        )
}

fn should_skip_node(node: Node, source: &str) -> bool {
    if is_type_node(node.kind()) {
        return true;
    }
    if node.kind() == "call_expression" {
        if let Some(func) = node.child_by_field_name("function") {
            if node_text(func, source).starts_with("console.") {
                return true;
            }
        }
    }
    // 'use strict' and friends
    if node.kind() == "expression_statement" && node.named_child_count() == 1 {
        if let Some(child) = node.named_child(0) {
            if child.kind() == "string" {
                return true;
            }
        }
    }
    false
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

fn push_ops(
    wrap: Node,
    placement: Placement,
    span: Node,
    source: &str,
    ops: Vec<MutationOp>,
    out: &mut Vec<Candidate>,
) {
    for op in ops {
        out.push(Candidate {
            node_id: wrap.id(),
            placement,
            placement_range: (wrap.start_byte(), wrap.end_byte()),
            span: (span.start_byte(), span.end_byte()),
            start: span.start_position(),
            end: span.end_position(),
            family: op.family,
            mutator: op.mutator,
            original: node_text(span, source).to_string(),
            replacement: op.replacement.to_string(),
        });
    }
}

fn collect_binary_mutations(node: Node, source: &str, out: &mut Vec<Candidate>) {
    let Some(op_node) = node.child_by_field_name("operator") else {
        return;
    };
    let op_text = node_text(op_node, source);
    let ops = match op_text {
        ">" | ">=" | "<" | "<=" | "==" | "!=" | "===" | "!==" => {
            operators::comparison_mutations(op_text)
        }
        "&&" | "||" | "??" => operators::logical_mutations(op_text),
        "+" | "-" | "*" | "/" | "%" | "**" => {
            // Skip string concatenation
            if op_text == "+" && is_stringish(node) {
                return;
            }
            operators::arithmetic_mutations(op_text)
        }
        _ => vec![],
    };
    push_ops(node, Placement::Expression, op_node, source, ops, out);
}

fn is_stringish(node: Node) -> bool {
    ["left", "right"].iter().any(|field| {
        node.child_by_field_name(field)
            .is_some_and(|n| n.kind() == "string" || n.kind() == "template_string")
    })
}

fn collect_unary_mutations(node: Node, source: &str, out: &mut Vec<Candidate>) {
    let Some(op_node) = node.child_by_field_name("operator") else {
        return;
    };
    if op_node.kind() != "!" {
        return;
    }
    if let Some(operand) = node.child_by_field_name("argument") {
        out.push(Candidate {
            node_id: node.id(),
            placement: Placement::Expression,
            placement_range: (node.start_byte(), node.end_byte()),
            span: (node.start_byte(), node.end_byte()),
            start: node.start_position(),
            end: node.end_position(),
            family: Family::Unary,
            mutator: "negate_remove",
            original: node_text(node, source).to_string(),
            replacement: node_text(operand, source).to_string(),
        });
    }
}

fn collect_return_mutations(node: Node, source: &str, out: &mut Vec<Candidate>) {
    let expr = node.named_child(0).filter(|c| c.kind() != "comment");
    let replacement = operators::return_replacement(expr.map(|e| node_text(e, source)));
    out.push(Candidate {
        node_id: node.id(),
        placement: Placement::Statement,
        placement_range: (node.start_byte(), node.end_byte()),
        span: (node.start_byte(), node.end_byte()),
        start: node.start_position(),
        end: node.end_position(),
        family: Family::Return,
        mutator: "return_val",
        original: node_text(node, source).to_string(),
        replacement: replacement.to_string(),
    });
}

fn collect_boolean_mutations(node: Node, source: &str, out: &mut Vec<Candidate>) {
    // `return true` is covered by the return mutation
    if node.parent().is_some_and(|p| p.kind() == "return_statement") {
        return;
    }
    let ops = operators::boolean_mutations(node_text(node, source));
    push_ops(node, Placement::Expression, node, source, ops, out);
}

fn collect_if_body_mutations(node: Node, source: &str, out: &mut Vec<Candidate>) {
    if let Some(consequence) = node.child_by_field_name("consequence") {
        add_block_remove_mutation(consequence, source, out);
    }
    if let Some(alternative) = node.child_by_field_name("alternative") {
        // else-if is a nested if_statement and gets visited on its own
        let mut cursor = alternative.walk();
        for child in alternative.children(&mut cursor) {
            add_block_remove_mutation(child, source, out);
        }
    }
}

fn add_block_remove_mutation(block: Node, source: &str, out: &mut Vec<Candidate>) {
    if block.kind() != "statement_block" {
        return;
    }
    let text = node_text(block, source);
    if text.trim() == "{}" {
        return;
    }
    out.push(Candidate {
        node_id: block.id(),
        placement: Placement::Statement,
        placement_range: (block.start_byte(), block.end_byte()),
        span: (block.start_byte(), block.end_byte()),
        start: block.start_position(),
        end: block.end_position(),
        family: Family::Block,
        mutator: "block_remove",
        original: text.to_string(),
        replacement: "{}".to_string(),
    });
}
