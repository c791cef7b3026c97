use std::path::Path;

use tree_sitter::{Language as Grammar, Node, Parser};

use crate::Language;
use crate::error::{Error, Result};
use crate::mutants::{MutationCandidate, Span};
use crate::operators::{self, Mode, MutationOp};

fn grammar(language: Language) -> Grammar {
    match language {
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
    }
}

/// Parse `content` and emit one candidate per (operator node, replacement)
/// pair, in pre-order. Pure: identical input yields an identical list.
///
/// A parse failure only affects this file; the caller decides whether to
/// skip it.
pub fn generate_mutations(content: &str, file_path: &Path, mode: Mode) -> Result<Vec<MutationCandidate>> {
    let language = crate::detect_language(file_path)
        .ok_or_else(|| Error::UnsupportedLanguage(file_path.to_path_buf()))?;

    let mut parser = Parser::new();
    parser.set_language(&grammar(language)).map_err(|e| Error::Parse {
        path: file_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let tree = parser.parse(content, None).ok_or_else(|| Error::Parse {
        path: file_path.to_path_buf(),
        reason: "parser produced no tree".to_string(),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(Error::Parse {
            path: file_path.to_path_buf(),
            reason: first_error_position(root)
                .map(|(line, col)| format!("syntax error at {line}:{col}"))
                .unwrap_or_else(|| "syntax error".to_string()),
        });
    }

    let mut mutations = Vec::new();
    walk_node(root, content, mode, &mut mutations);
    Ok(mutations)
}

fn first_error_position(node: Node) -> Option<(usize, usize)> {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        return Some((pos.row + 1, pos.column + 1));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error_position(child) {
                return Some(found);
            }
        }
    }
    None
}

fn walk_node(node: Node, source: &str, mode: Mode, mutations: &mut Vec<MutationCandidate>) {
    match node.kind() {
        "binary_expression" => {
            collect_binary_mutations(node, source, mode, mutations);
        }
        "assignment_expression" | "augmented_assignment_expression" => {
            collect_assignment_mutations(node, source, mode, mutations);
        }
        _ => {}
    }

    let child_count = node.child_count();
    for i in 0..child_count {
        if let Some(child) = node.child(i) {
            walk_node(child, source, mode, mutations);
        }
    }
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

/// The operator child sitting between `left` and `right`.
fn operator_node<'a>(node: Node<'a>, left: Node<'a>, right: Node<'a>) -> Option<Node<'a>> {
    if let Some(op) = node.child_by_field_name("operator") {
        return Some(op);
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|c| !c.is_named() && c.start_byte() >= left.end_byte() && c.end_byte() <= right.start_byte());
    found
}

fn collect_binary_mutations(node: Node, source: &str, mode: Mode, mutations: &mut Vec<MutationCandidate>) {
    let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right")) else {
        return;
    };
    let Some(op_node) = operator_node(node, left, right) else {
        return;
    };
    let ops = operators::binary_mutations(node_text(op_node, source), mode);
    push_candidates(left, right, op_node, source, ops, mutations);
}

fn collect_assignment_mutations(node: Node, source: &str, mode: Mode, mutations: &mut Vec<MutationCandidate>) {
    let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right")) else {
        return;
    };
    let Some(op_node) = operator_node(node, left, right) else {
        return;
    };
    let ops = operators::assignment_mutations(node_text(op_node, source), mode);
    push_candidates(left, right, op_node, source, ops, mutations);
}

fn push_candidates(
    left: Node,
    right: Node,
    op_node: Node,
    source: &str,
    ops: Vec<MutationOp>,
    mutations: &mut Vec<MutationCandidate>,
) {
    if ops.is_empty() {
        return;
    }
    let span = Span {
        start: left.end_byte(),
        end: right.start_byte(),
    };
    let original = node_text(op_node, source);
    let line = op_node.start_position().row + 1;
    let column = op_node.start_position().column + 1;

    for op in ops {
        mutations.push(MutationCandidate {
            span,
            operator: op.operator_name.to_string(),
            original: original.to_string(),
            replacement: op.replacement.to_string(),
            line,
            column,
        });
    }
}
