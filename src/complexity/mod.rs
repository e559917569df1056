//! Complexity scoring
//!
//! Advisory structural score: per-function cyclomatic counts (1 + decision
//! points) summed over every function, plus fixed style penalties. Never used
//! for pass/fail decisions, and never fails: unparsable text scores 0.

use crate::language::Language;
use regex::Regex;
use std::cell::RefCell;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Node, Parser, TreeCursor};

/// Added when no numeric type token (`int`, `float`) appears anywhere.
pub const TYPE_PENALTY: u32 = 5;
/// Added when no docstring marker (`"""` or `'''`) appears anywhere.
pub const DOC_PENALTY: u32 = 5;

// One parser per language per thread; `score` is called from rayon workers.
thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });
}

fn numeric_type_token() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:int|float)\b").ok())
        .as_ref()
}

/// Score `source` as a program in `language`.
pub fn score(source: &str, language: Language) -> u32 {
    match logic_score(source, language) {
        Ok(logic) => logic + style_penalties(source),
        Err(err) => {
            tracing::debug!(%language, error = %err, "complexity scoring degraded to 0");
            0
        }
    }
}

/// Read and score a file; unreadable files score 0.
pub fn score_path(path: &Path) -> u32 {
    match std::fs::read_to_string(path) {
        Ok(source) => score(&source, Language::from_path(path)),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "complexity scoring skipped unreadable file");
            0
        }
    }
}

/// Percentage reduction from `reference` to `candidate`; `None` when the
/// reference score is 0.
pub fn improvement(reference: u32, candidate: u32) -> Option<f64> {
    if reference == 0 {
        return None;
    }
    let reference = f64::from(reference);
    Some((reference - f64::from(candidate)) / reference * 100.0)
}

pub fn style_penalties(source: &str) -> u32 {
    let mut penalty = 0;
    if !numeric_type_token().is_some_and(|re| re.is_match(source)) {
        penalty += TYPE_PENALTY;
    }
    if !source.contains("\"\"\"") && !source.contains("'''") {
        penalty += DOC_PENALTY;
    }
    penalty
}

/// Sum of per-function cyclomatic complexity. Code outside any function
/// contributes nothing.
pub fn logic_score(source: &str, language: Language) -> anyhow::Result<u32> {
    let grammar = match language {
        Language::Python => Grammar::Python,
        Language::JavaScript => Grammar::JavaScript,
        Language::Shell | Language::Unknown => return Ok(0),
    };

    let parsed = match grammar {
        Grammar::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(source, None)),
        Grammar::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(source, None)),
    };
    let tree = parsed.ok_or_else(|| anyhow::anyhow!("Failed to parse {} source", language))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(anyhow::anyhow!("{} source has syntax errors", language));
    }

    let mut total = 0;
    let mut cursor = root.walk();
    tally(&mut cursor, grammar, 0, &mut total);
    Ok(total)
}

#[derive(Debug, Clone, Copy)]
enum Grammar {
    Python,
    JavaScript,
}

impl Grammar {
    fn is_function(self, node: &Node) -> bool {
        // `function` is also the kind of the anonymous keyword token.
        if !node.is_named() {
            return false;
        }
        match self {
            Grammar::Python => node.kind() == "function_definition",
            Grammar::JavaScript => matches!(
                node.kind(),
                "function_declaration"
                    | "function_expression"
                    | "function"
                    | "generator_function_declaration"
                    | "generator_function"
                    | "arrow_function"
                    | "method_definition"
            ),
        }
    }

    fn is_decision(self, node: &Node) -> bool {
        match self {
            Grammar::Python => matches!(
                node.kind(),
                "if_statement"
                    | "elif_clause"
                    | "for_statement"
                    | "while_statement"
                    | "except_clause"
                    | "conditional_expression"
                    | "boolean_operator"
                    | "for_in_clause"
                    | "if_clause"
                    | "case_clause"
            ),
            Grammar::JavaScript => match node.kind() {
                "if_statement" | "for_statement" | "for_in_statement" | "while_statement"
                | "do_statement" | "catch_clause" | "ternary_expression" | "switch_case" => true,
                "binary_expression" => node
                    .child_by_field_name("operator")
                    .is_some_and(|op| matches!(op.kind(), "&&" | "||" | "??")),
                _ => false,
            },
        }
    }
}

/// Count functions, and decision points that sit inside at least one.
fn tally(cursor: &mut TreeCursor, grammar: Grammar, function_depth: usize, total: &mut u32) {
    loop {
        let node = cursor.node();
        let is_function = grammar.is_function(&node);
        if is_function || (function_depth > 0 && grammar.is_decision(&node)) {
            *total += 1;
        }

        if cursor.goto_first_child() {
            tally(cursor, grammar, function_depth + usize::from(is_function), total);
            cursor.goto_parent();
        }

        if !cursor.goto_next_sibling() {
            break;
        }
    }
}
