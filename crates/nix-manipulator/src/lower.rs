//! Lowering: concrete syntax tree -> expression model.
//!
//! This is where all trivia attachment happens. The rules are owned here
//! (and in `lower::bindings` for delimited sequences); the renderer only
//! ever emits `before`, the node's own text, then `after`.

use log::trace;
use tree_sitter::Node;

use crate::cst::{children, gap_has_blank_line, gap_has_newline, node_text};
use crate::expr::{
    Assertion, BinaryExpression, Expr, ExprKind, FunctionCall, IfExpression, Multiline, Primitive,
    Select, SourceFile, UnaryExpression, WithStatement,
};
use crate::trivia::Trivia;
use crate::ManipulatorError;

pub mod bindings;

pub(crate) fn parse_err(node: Node<'_>, message: impl Into<String>) -> ManipulatorError {
    let pos = node.start_position();
    ManipulatorError::Parse {
        message: message.into(),
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

pub(crate) fn trivia_err(node: Node<'_>, message: impl Into<String>) -> ManipulatorError {
    let pos = node.start_position();
    ManipulatorError::TriviaUnowned(format!(
        "{} at {}:{}",
        message.into(),
        pos.row + 1,
        pos.column + 1
    ))
}

/// Append a blank-line or line-break marker for the whitespace between two
/// byte offsets. Alignment-only spaces are discarded here.
pub(crate) fn push_gap(trivia: &mut Vec<Trivia>, source: &[u8], start: usize, end: usize) {
    if gap_has_blank_line(source, start, end) {
        trivia.push(Trivia::BlankLine);
    } else if gap_has_newline(source, start, end) {
        trivia.push(Trivia::LineBreak);
    }
}

/// Classify a comment node. Comment text is kept verbatim so rebuilds are
/// byte-preserving; `inline` is decided by the caller from line positions.
pub(crate) fn lower_comment(node: Node<'_>, source: &[u8], inline: bool) -> Trivia {
    let text = node_text(node, source).to_string();
    if text.starts_with("/*") {
        Trivia::MultilineComment { text }
    } else {
        Trivia::Comment { text, inline }
    }
}

/// Lower a whole `source_code` node into a document.
pub fn lower_source(root: Node<'_>, source: &[u8]) -> Result<SourceFile, ManipulatorError> {
    trace!("lowering source file of {} bytes", source.len());

    let kids = children(root);
    let mut before: Vec<Trivia> = Vec::new();
    let mut expr: Option<Expr> = None;
    let mut trailing: Vec<Trivia> = Vec::new();
    let mut prev: Option<Node<'_>> = None;

    for child in &kids {
        let child = *child;
        if child.kind() == "comment" {
            let inline = expr.is_some()
                && prev.map_or(false, |p| {
                    child.start_position().row == p.end_position().row
                });
            if inline {
                let owner = expr.as_mut().expect("inline requires an expression");
                owner.after.push(lower_comment(child, source, true));
            } else {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                before.push(lower_comment(child, source, false));
            }
            prev = Some(child);
            continue;
        }

        if expr.is_some() {
            return Err(parse_err(child, "multiple top-level expressions"));
        }
        if let Some(p) = prev {
            push_gap(&mut before, source, p.end_byte(), child.start_byte());
        }
        let mut lowered = lower_expr(child, source)?;
        if !before.is_empty() {
            before.append(&mut lowered.before);
            lowered.before = std::mem::take(&mut before);
        }
        expr = Some(lowered);
        prev = Some(child);
    }

    if !before.is_empty() {
        match expr.as_mut() {
            Some(owner) => owner.after.append(&mut before),
            None => trailing = std::mem::take(&mut before),
        }
    }
    if let Some(p) = prev {
        push_gap(&mut trailing, source, p.end_byte(), root.end_byte());
    }

    Ok(SourceFile { expr, trailing })
}

/// Lower a single expression node.
pub fn lower_expr(node: Node<'_>, source: &[u8]) -> Result<Expr, ManipulatorError> {
    let kind = match node.kind() {
        "integer_expression" => {
            let text = node_text(node, source);
            match text.parse::<i64>() {
                Ok(value) => ExprKind::Primitive(Primitive::Int(value)),
                Err(_) => ExprKind::Primitive(Primitive::Float(text.to_string())),
            }
        }
        "float_expression" => ExprKind::Primitive(Primitive::Float(node_text(node, source).into())),
        "string_expression" => {
            let text = node_text(node, source);
            let inner = text
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
                .unwrap_or(text);
            ExprKind::Primitive(Primitive::String {
                value: inner.to_string(),
                raw: true,
            })
        }
        "indented_string_expression" => {
            let text = node_text(node, source);
            let inner = text
                .strip_prefix("''")
                .and_then(|rest| rest.strip_suffix("''"))
                .unwrap_or(text);
            ExprKind::Primitive(Primitive::Indented {
                value: inner.to_string(),
            })
        }
        "variable_expression" | "identifier" => match node_text(node, source) {
            "true" => ExprKind::Primitive(Primitive::Bool(true)),
            "false" => ExprKind::Primitive(Primitive::Bool(false)),
            "null" => ExprKind::Primitive(Primitive::Null),
            name => ExprKind::Identifier(name.to_string()),
        },
        "path_expression" | "hpath_expression" | "spath_expression" | "uri_expression" => {
            ExprKind::Path(node_text(node, source).to_string())
        }
        "list_expression" => ExprKind::List(bindings::lower_list(node, source)?),
        "attrset_expression" | "rec_attrset_expression" => {
            ExprKind::AttrSet(bindings::lower_attr_set(node, source)?)
        }
        "let_expression" => return bindings::lower_let(node, source),
        "function_expression" => ExprKind::Lambda(bindings::lower_lambda(node, source)?),
        "apply_expression" => ExprKind::Apply(lower_apply(node, source)?),
        "select_expression" => ExprKind::Select(lower_select(node, source)?),
        "has_attr_expression" => ExprKind::BinaryOp(lower_has_attr(node, source)?),
        "binary_expression" => ExprKind::BinaryOp(lower_binary(node, source)?),
        "unary_expression" => ExprKind::UnaryOp(lower_unary(node, source)?),
        "if_expression" => ExprKind::If(lower_if(node, source)?),
        "with_expression" => ExprKind::With(lower_with(node, source)?),
        "assert_expression" => ExprKind::Assert(lower_assert(node, source)?),
        "parenthesized_expression" => ExprKind::Paren(Box::new(lower_paren(node, source)?)),
        other => return Err(parse_err(node, format!("unsupported node type: {other}"))),
    };
    Ok(Expr::new(kind))
}

fn field<'t>(node: Node<'t>, name: &str) -> Result<Node<'t>, ManipulatorError> {
    node.child_by_field_name(name)
        .ok_or_else(|| parse_err(node, format!("{} is missing its {name}", node.kind())))
}

fn lower_apply(node: Node<'_>, source: &[u8]) -> Result<FunctionCall, ManipulatorError> {
    let function = lower_expr(field(node, "function")?, source)?;
    let argument_node = field(node, "argument")?;
    let mut argument = lower_expr(argument_node, source)?;
    // A line break between callee and argument keeps the argument below.
    let function_node = field(node, "function")?;
    push_gap(
        &mut argument.before,
        source,
        function_node.end_byte(),
        argument_node.start_byte(),
    );
    Ok(FunctionCall {
        function: Box::new(function),
        argument: Box::new(argument),
    })
}

fn lower_select(node: Node<'_>, source: &[u8]) -> Result<Select, ManipulatorError> {
    let expression = lower_expr(field(node, "expression")?, source)?;
    let attrpath = node_text(field(node, "attrpath")?, source).to_string();
    let default = match node.child_by_field_name("default") {
        Some(default_node) => Some(Box::new(lower_expr(default_node, source)?)),
        None => None,
    };
    Ok(Select {
        expression: Box::new(expression),
        attrpath,
        default,
    })
}

fn lower_has_attr(node: Node<'_>, source: &[u8]) -> Result<BinaryExpression, ManipulatorError> {
    let left = lower_expr(field(node, "expression")?, source)?;
    let attrpath = node_text(field(node, "attrpath")?, source).to_string();
    Ok(BinaryExpression {
        left: Box::new(left),
        operator: "?".to_string(),
        right: Box::new(Expr::ident(attrpath)),
    })
}

fn lower_binary(node: Node<'_>, source: &[u8]) -> Result<BinaryExpression, ManipulatorError> {
    let parts: Vec<Node<'_>> = children(node)
        .into_iter()
        .filter(|child| child.kind() != "comment")
        .collect();
    if parts.len() != 3 {
        return Err(parse_err(node, "malformed binary expression"));
    }
    let left = lower_expr(parts[0], source)?;
    let operator = node_text(parts[1], source).to_string();
    let right = lower_expr(parts[2], source)?;
    Ok(BinaryExpression {
        left: Box::new(left),
        operator,
        right: Box::new(right),
    })
}

fn lower_unary(node: Node<'_>, source: &[u8]) -> Result<UnaryExpression, ManipulatorError> {
    let parts: Vec<Node<'_>> = children(node)
        .into_iter()
        .filter(|child| child.kind() != "comment")
        .collect();
    if parts.len() < 2 {
        return Err(parse_err(node, "malformed unary expression"));
    }
    let operator = node_text(parts[0], source).to_string();
    let operand = lower_expr(parts[1], source)?;
    Ok(UnaryExpression {
        operator,
        operand: Box::new(operand),
    })
}

fn lower_if(node: Node<'_>, source: &[u8]) -> Result<IfExpression, ManipulatorError> {
    let condition_node = field(node, "condition")?;
    let consequence_node = field(node, "consequence")?;
    let alternative_node = field(node, "alternative")?;
    let condition = lower_expr(condition_node, source)?;
    let mut consequence = lower_expr(consequence_node, source)?;
    let mut alternative = lower_expr(alternative_node, source)?;
    attach_interior_comments(node, source, condition_node, consequence_node, &mut consequence)?;
    attach_interior_comments(node, source, consequence_node, alternative_node, &mut alternative)?;
    let multiline = Multiline::from_source(node_text(node, source).contains('\n'));
    Ok(IfExpression {
        condition: Box::new(condition),
        consequence: Box::new(consequence),
        alternative: Box::new(alternative),
        multiline,
    })
}

fn lower_with(node: Node<'_>, source: &[u8]) -> Result<WithStatement, ManipulatorError> {
    let environment_node = field(node, "environment")?;
    let body_node = field(node, "body")?;
    let environment = lower_expr(environment_node, source)?;
    let mut body = lower_expr(body_node, source)?;
    let body_on_newline =
        gap_has_newline(source, environment_node.end_byte(), body_node.start_byte());
    attach_interior_comments(node, source, environment_node, body_node, &mut body)?;
    Ok(WithStatement {
        environment: Box::new(environment),
        body: Box::new(body),
        body_on_newline,
    })
}

fn lower_assert(node: Node<'_>, source: &[u8]) -> Result<Assertion, ManipulatorError> {
    let condition_node = field(node, "condition")?;
    let body_node = field(node, "body")?;
    let condition = lower_expr(condition_node, source)?;
    let mut body = lower_expr(body_node, source)?;
    let body_on_newline =
        gap_has_newline(source, condition_node.end_byte(), body_node.start_byte());
    attach_interior_comments(node, source, condition_node, body_node, &mut body)?;
    Ok(Assertion {
        condition: Box::new(condition),
        body: Box::new(body),
        body_on_newline,
    })
}

/// Attach comments and blank lines sitting between two parts of a compound
/// expression to the following part's `before`.
fn attach_interior_comments(
    node: Node<'_>,
    source: &[u8],
    start: Node<'_>,
    end: Node<'_>,
    owner: &mut Expr,
) -> Result<(), ManipulatorError> {
    let mut collected: Vec<Trivia> = Vec::new();
    let mut prev_end = start.end_byte();
    for child in children(node) {
        if child.kind() == "comment"
            && child.start_byte() >= start.end_byte()
            && child.end_byte() <= end.start_byte()
        {
            push_gap(&mut collected, source, prev_end, child.start_byte());
            collected.push(lower_comment(child, source, false));
            prev_end = child.end_byte();
        }
    }
    if gap_has_blank_line(source, prev_end, end.start_byte()) {
        collected.push(Trivia::BlankLine);
    }
    collected.retain(|t| *t != Trivia::LineBreak);
    if !collected.is_empty() {
        collected.append(&mut owner.before);
        owner.before = collected;
    }
    Ok(())
}

fn lower_paren(node: Node<'_>, source: &[u8]) -> Result<Expr, ManipulatorError> {
    let mut inner: Option<Expr> = None;
    let mut before: Vec<Trivia> = Vec::new();
    for child in children(node) {
        match child.kind() {
            "(" | ")" => {}
            "comment" => {
                let comment = lower_comment(child, source, false);
                match inner.as_mut() {
                    Some(expr) => expr.after.push(comment),
                    None => before.push(comment),
                }
            }
            _ => {
                let mut lowered = lower_expr(child, source)?;
                if !before.is_empty() {
                    before.append(&mut lowered.before);
                    lowered.before = std::mem::take(&mut before);
                }
                inner = Some(lowered);
            }
        }
    }
    inner.ok_or_else(|| parse_err(node, "empty parenthesized expression"))
}
