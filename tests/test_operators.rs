use mutarun::operators::{self, Mode};

fn replacements(ops: &[operators::MutationOp]) -> Vec<&'static str> {
    ops.iter().map(|op| op.replacement).collect()
}

// --- Arithmetic ---

#[test]
fn plus_has_three_replacements_in_both_modes() {
    for mode in [Mode::Curated, Mode::Exhaustive] {
        let ops = operators::binary_mutations("+", mode);
        assert_eq!(replacements(&ops), vec!["-", "*", "/"]);
        assert!(ops.iter().all(|op| op.operator_name == "arithmetic"));
    }
}

#[test]
fn minus_mutates_to_other_arithmetic() {
    let ops = operators::binary_mutations("-", Mode::Curated);
    assert_eq!(replacements(&ops), vec!["+", "*", "/"]);
}

#[test]
fn modulo_is_narrower_when_curated() {
    assert_eq!(replacements(&operators::binary_mutations("%", Mode::Curated)), vec!["*"]);
    assert_eq!(
        replacements(&operators::binary_mutations("%", Mode::Exhaustive)),
        vec!["+", "-", "*"]
    );
}

#[test]
fn exponent_mutates_to_multiply() {
    assert_eq!(replacements(&operators::binary_mutations("**", Mode::Curated)), vec!["*"]);
}

// --- Relational ---

#[test]
fn relational_interchange() {
    assert_eq!(replacements(&operators::relational_mutations("<")), vec!["<=", ">", ">="]);
    assert_eq!(replacements(&operators::relational_mutations(">=")), vec!["<", "<=", ">"]);
}

#[test]
fn relational_never_maps_to_itself() {
    for op in ["<", "<=", ">", ">="] {
        let ops = operators::binary_mutations(op, Mode::Exhaustive);
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|m| m.replacement != op));
    }
}

// --- Equality ---

#[test]
fn curated_equality_negates() {
    assert_eq!(replacements(&operators::equality_mutations("===", Mode::Curated)), vec!["!=="]);
    assert_eq!(replacements(&operators::equality_mutations("!=", Mode::Curated)), vec!["=="]);
}

#[test]
fn exhaustive_equality_covers_all_others() {
    let ops = operators::equality_mutations("==", Mode::Exhaustive);
    assert_eq!(replacements(&ops), vec!["===", "!=", "!=="]);
}

// --- Excluded operators ---

#[test]
fn bitwise_shift_and_membership_are_excluded() {
    for op in ["&", "|", "^", "<<", ">>", ">>>", "instanceof", "in", "&&", "||", "??"] {
        assert!(operators::binary_mutations(op, Mode::Curated).is_empty(), "{op}");
        assert!(operators::binary_mutations(op, Mode::Exhaustive).is_empty(), "{op}");
    }
}

// --- Assignment ---

#[test]
fn plain_assignment_becomes_add_assign() {
    assert_eq!(replacements(&operators::assignment_mutations("=", Mode::Curated)), vec!["+="]);
}

#[test]
fn compound_assignment_curated_vs_exhaustive() {
    assert_eq!(replacements(&operators::assignment_mutations("+=", Mode::Curated)), vec!["-="]);
    assert_eq!(
        replacements(&operators::assignment_mutations("+=", Mode::Exhaustive)),
        vec!["=", "-=", "*=", "/="]
    );
}

#[test]
fn logical_assignment_becomes_plain() {
    for op in ["||=", "&&=", "??="] {
        assert_eq!(replacements(&operators::assignment_mutations(op, Mode::Curated)), vec!["="]);
    }
}

#[test]
fn bitwise_compound_assignment_is_excluded() {
    for op in ["<<=", ">>=", ">>>=", "|=", "^=", "&="] {
        assert!(operators::assignment_mutations(op, Mode::Exhaustive).is_empty(), "{op}");
    }
}

#[test]
fn mode_from_flag() {
    assert_eq!(Mode::from_exhaustive(true), Mode::Exhaustive);
    assert_eq!(Mode::from_exhaustive(false), Mode::Curated);
    assert_eq!(Mode::default(), Mode::Curated);
}
