/// Operator substitution tables for binary and assignment expressions.
///
/// Each operator maps to the replacement operators a mutation may splice in.
/// Bitwise, shift, `in` and `instanceof` operators map to nothing.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Small hand-picked replacement sets per operator.
    #[default]
    Curated,
    /// Every same-category alternative.
    Exhaustive,
}

impl Mode {
    pub fn from_exhaustive(exhaustive: bool) -> Self {
        if exhaustive { Mode::Exhaustive } else { Mode::Curated }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOp {
    pub operator_name: &'static str,
    pub replacement: &'static str,
}

fn ops(operator_name: &'static str, replacements: &'static [&'static str]) -> Vec<MutationOp> {
    replacements
        .iter()
        .map(|replacement| MutationOp { operator_name, replacement })
        .collect()
}

/// `+ - * / % **`
pub fn arithmetic_mutations(op_text: &str, mode: Mode) -> Vec<MutationOp> {
    let replacements: &'static [&'static str] = match (op_text, mode) {
        ("+", _) => &["-", "*", "/"],
        ("-", _) => &["+", "*", "/"],
        ("*", _) => &["+", "-", "/"],
        ("/", _) => &["+", "-", "*"],
        ("%", Mode::Curated) => &["*"],
        ("**", Mode::Curated) => &["*"],
        ("%", Mode::Exhaustive) => &["+", "-", "*"],
        ("**", Mode::Exhaustive) => &["+", "-", "*"],
        _ => &[],
    };
    ops("arithmetic", replacements)
}

/// `< <= > >=`
pub fn relational_mutations(op_text: &str) -> Vec<MutationOp> {
    let replacements: &'static [&'static str] = match op_text {
        "<" => &["<=", ">", ">="],
        "<=" => &["<", ">", ">="],
        ">" => &["<", "<=", ">="],
        ">=" => &["<", "<=", ">"],
        _ => &[],
    };
    ops("relational", replacements)
}

/// `== != === !==`
pub fn equality_mutations(op_text: &str, mode: Mode) -> Vec<MutationOp> {
    let replacements: &'static [&'static str] = match (op_text, mode) {
        ("==", Mode::Curated) => &["!="],
        ("!=", Mode::Curated) => &["=="],
        ("===", Mode::Curated) => &["!=="],
        ("!==", Mode::Curated) => &["==="],
        ("==", Mode::Exhaustive) => &["===", "!=", "!=="],
        ("!=", Mode::Exhaustive) => &["==", "===", "!=="],
        ("===", Mode::Exhaustive) => &["==", "!=", "!=="],
        ("!==", Mode::Exhaustive) => &["==", "!=", "==="],
        _ => &[],
    };
    ops("equality", replacements)
}

/// Replacements for the operator of a binary expression.
pub fn binary_mutations(op_text: &str, mode: Mode) -> Vec<MutationOp> {
    match op_text {
        "+" | "-" | "*" | "/" | "%" | "**" => arithmetic_mutations(op_text, mode),
        "<" | "<=" | ">" | ">=" => relational_mutations(op_text),
        "==" | "!=" | "===" | "!==" => equality_mutations(op_text, mode),
        // bitwise, shift, logical, `in`, `instanceof`
        _ => vec![],
    }
}

/// Replacements for the operator of a plain or compound assignment.
pub fn assignment_mutations(op_text: &str, mode: Mode) -> Vec<MutationOp> {
    let replacements: &'static [&'static str] = match (op_text, mode) {
        ("=", _) => &["+="],
        ("||=" | "&&=" | "??=", _) => &["="],

        ("+=", Mode::Curated) => &["-="],
        ("-=", Mode::Curated) => &["+="],
        ("*=", Mode::Curated) => &["/="],
        ("/=", Mode::Curated) => &["*="],
        ("%=", Mode::Curated) => &["*="],
        ("**=", Mode::Curated) => &["*="],

        ("+=", Mode::Exhaustive) => &["=", "-=", "*=", "/="],
        ("-=", Mode::Exhaustive) => &["=", "+=", "*=", "/="],
        ("*=", Mode::Exhaustive) => &["=", "-=", "+=", "/="],
        ("/=", Mode::Exhaustive) => &["=", "-=", "*=", "+="],
        ("%=", Mode::Exhaustive) => &["=", "-=", "*=", "/="],
        ("**=", Mode::Exhaustive) => &["=", "-=", "*=", "/="],

        // <<= >>= >>>= |= ^= &=
        _ => &[],
    };
    ops("assignment", replacements)
}
