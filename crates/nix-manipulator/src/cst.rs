//! Adapter over the `tree-sitter-nix` grammar.
//!
//! The grammar is an external collaborator: everything this module exposes
//! is a concrete syntax tree of kind-tagged nodes over the source bytes.
//! All classification above token level (trivia ownership, expression
//! variants) happens in `lower`.

use tree_sitter::{Node, Parser, Tree};

use crate::ManipulatorError;

/// Parse source text into a raw tree, rejecting syntactically invalid
/// input. Error positions are 1-based line/column.
pub fn parse_tree(text: &str) -> Result<Tree, ManipulatorError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_nix::LANGUAGE.into())
        .expect("the bundled Nix grammar is ABI-compatible");

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ManipulatorError::Parse {
            message: "parser produced no tree".to_string(),
            line: 1,
            column: 1,
        })?;

    if tree.root_node().has_error() {
        let (message, line, column) = match find_error_node(tree.root_node()) {
            Some(node) => {
                let pos = node.start_position();
                let what = if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    "invalid syntax".to_string()
                };
                (what, pos.row + 1, pos.column + 1)
            }
            None => ("invalid syntax".to_string(), 1, 1),
        };
        return Err(ManipulatorError::Parse {
            message,
            line,
            column,
        });
    }

    Ok(tree)
}

fn find_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_error_node)
}

/// Exact source text for a node.
pub fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

/// Source bytes between two absolute offsets. Gaps between sibling nodes
/// contain only whitespace; comments are nodes of their own.
pub fn gap<'a>(source: &'a [u8], start: usize, end: usize) -> &'a str {
    if start >= end || end > source.len() {
        return "";
    }
    std::str::from_utf8(&source[start..end]).unwrap_or_default()
}

/// True when the whitespace between two offsets contains a blank line
/// (two line breaks separated only by spaces or tabs).
pub fn gap_has_blank_line(source: &[u8], start: usize, end: usize) -> bool {
    let gap = &source[start.min(source.len())..end.min(source.len())];
    let mut newlines_seen = 0usize;
    let mut only_blanks_since_newline = true;
    for &byte in gap {
        match byte {
            b'\n' => {
                if newlines_seen > 0 && only_blanks_since_newline {
                    return true;
                }
                newlines_seen += 1;
                only_blanks_since_newline = true;
            }
            b' ' | b'\t' | b'\r' => {}
            _ => only_blanks_since_newline = false,
        }
    }
    false
}

/// True when the whitespace between two offsets contains a line break.
pub fn gap_has_newline(source: &[u8], start: usize, end: usize) -> bool {
    source[start.min(source.len())..end.min(source.len())].contains(&b'\n')
}

/// All children of a node, tokens included, in source order.
pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}
