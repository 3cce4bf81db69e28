/// Mutation operator tables for JavaScript and TypeScript.
/// Each entry maps an original token to the replacements worth switching in.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Equality,
    Logical,
    Arithmetic,
    Boolean,
    Unary,
    Return,
    Block,
}

impl Family {
    pub const ALL: [Family; 7] = [
        Family::Equality,
        Family::Logical,
        Family::Arithmetic,
        Family::Boolean,
        Family::Unary,
        Family::Return,
        Family::Block,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Family::Equality => "equality",
            Family::Logical => "logical",
            Family::Arithmetic => "arithmetic",
            Family::Boolean => "boolean",
            Family::Unary => "unary",
            Family::Return => "return",
            Family::Block => "block",
        }
    }
}

pub struct MutationOp {
    pub family: Family,
    pub mutator: &'static str,
    pub replacement: &'static str,
}

const fn op(family: Family, mutator: &'static str, replacement: &'static str) -> MutationOp {
    MutationOp { family, mutator, replacement }
}

/// Tier 1: comparisons and equality
pub fn comparison_mutations(op_text: &str) -> Vec<MutationOp> {
    use Family::Equality;
    match op_text {
        ">" => vec![op(Equality, "boundary", ">="), op(Equality, "negate_cmp", "<=")],
        ">=" => vec![op(Equality, "boundary", ">"), op(Equality, "negate_cmp", "<")],
        "<" => vec![op(Equality, "boundary", "<="), op(Equality, "negate_cmp", ">=")],
        "<=" => vec![op(Equality, "boundary", "<"), op(Equality, "negate_cmp", ">")],
        "==" => vec![op(Equality, "negate_eq", "!=")],
        "!=" => vec![op(Equality, "negate_eq", "==")],
        "===" => vec![op(Equality, "negate_eq", "!==")],
        "!==" => vec![op(Equality, "negate_eq", "===")],
        _ => vec![],
    }
}

/// Tier 1: logical operators
pub fn logical_mutations(op_text: &str) -> Vec<MutationOp> {
    use Family::Logical;
    match op_text {
        "&&" => vec![op(Logical, "logic_flip", "||")],
        "||" => vec![op(Logical, "logic_flip", "&&")],
        "??" => vec![op(Logical, "logic_flip", "&&")],
        _ => vec![],
    }
}

/// Tier 2: arithmetic operators
pub fn arithmetic_mutations(op_text: &str) -> Vec<MutationOp> {
    use Family::Arithmetic;
    match op_text {
        "+" => vec![op(Arithmetic, "arith", "-")],
        "-" => vec![op(Arithmetic, "arith", "+")],
        "*" => vec![op(Arithmetic, "arith", "/")],
        "/" => vec![op(Arithmetic, "arith", "*")],
        "%" => vec![op(Arithmetic, "arith", "*")],
        "**" => vec![op(Arithmetic, "arith", "*")],
        _ => vec![],
    }
}

pub fn boolean_mutations(text: &str) -> Vec<MutationOp> {
    match text {
        "true" => vec![op(Family::Boolean, "bool_flip", "false")],
        "false" => vec![op(Family::Boolean, "bool_flip", "true")],
        _ => vec![],
    }
}

/// Replacement statement for `return <expr>;`, keyed on the returned expression.
pub fn return_replacement(expr_text: Option<&str>) -> &'static str {
    let Some(expr) = expr_text.map(str::trim) else {
        return "return undefined;";
    };
    if expr == "true" {
        "return false;"
    } else if expr == "false" {
        "return true;"
    } else if expr == "null" || expr == "undefined" {
        "return \"\";"
    } else if expr == "0" {
        "return 1;"
    } else if expr.starts_with('"') || expr.starts_with('\'') || expr.starts_with('`') {
        "return \"\";"
    } else if expr.starts_with('[') {
        "return [];"
    } else if expr == "{}" {
        "return null;"
    } else if expr.starts_with('{') {
        "return {};"
    } else if expr.parse::<f64>().is_ok() {
        "return 0;"
    } else {
        "return null;"
    }
}
