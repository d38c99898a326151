//! Delimited-sequence lowering: attribute sets, lists, `let` bindings and
//! lambda formals all share the same trivia attachment discipline.
//!
//! Between-item whitespace becomes layout markers on the *following* item's
//! `before`; a comment sharing a line with the previous item becomes that
//! item's trailing `after` comment; whatever is left at the end of the
//! sequence belongs to the last item, or to the container when it is empty.

use tree_sitter::Node;

use crate::cst::{children, gap_has_blank_line, gap_has_newline, node_text};
use crate::expr::{
    AttributeSet, Binding, Expr, ExprKind, Formal, FormalsBinding, FunctionDefinition, Inherit,
    LetExpression, Multiline, NixList, Param, ScopeLayer, SetItem,
};
use crate::lower::{lower_comment, lower_expr, parse_err, push_gap, trivia_err};
use crate::trivia::Trivia;
use crate::ManipulatorError;

fn same_row(a: Node<'_>, b: Node<'_>) -> bool {
    a.start_position().row == b.end_position().row
}

fn find_token<'t>(node: Node<'t>, token: &str) -> Option<Node<'t>> {
    children(node).into_iter().find(|child| child.kind() == token)
}

/// Walk a binding/inherit sequence. `content` holds the semantic children
/// plus interleaved comments, in source order.
fn lower_item_sequence(
    source: &[u8],
    content: &[Node<'_>],
    mut before: Vec<Trivia>,
) -> Result<(Vec<SetItem>, Vec<Trivia>), ManipulatorError> {
    let mut items: Vec<SetItem> = Vec::new();
    let mut inner: Vec<Trivia> = Vec::new();
    let mut prev: Option<Node<'_>> = None;

    for child in content {
        let child = *child;
        match child.kind() {
            "comment" => {
                let inline = prev.map_or(false, |p| {
                    matches!(p.kind(), "binding" | "inherit" | "inherit_from")
                        && same_row(child, p)
                }) && !items.is_empty();
                if inline {
                    let after = match items.last_mut().expect("non-empty items") {
                        SetItem::Binding(binding) => &mut binding.after,
                        SetItem::Inherit(inherit) => &mut inherit.after,
                    };
                    after.push(lower_comment(child, source, true));
                } else {
                    if let Some(p) = prev {
                        push_gap(&mut before, source, p.end_byte(), child.start_byte());
                    }
                    before.push(lower_comment(child, source, false));
                }
            }
            "binding" => {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                let binding = lower_binding(child, source, std::mem::take(&mut before))?;
                items.push(SetItem::Binding(binding));
            }
            "inherit" | "inherit_from" => {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                let inherit = lower_inherit(child, source, std::mem::take(&mut before))?;
                items.push(SetItem::Inherit(inherit));
            }
            other => {
                return Err(parse_err(
                    child,
                    format!("unexpected node in binding sequence: {other}"),
                ))
            }
        }
        prev = Some(child);
    }

    if !before.is_empty() {
        match items.last_mut() {
            Some(SetItem::Binding(binding)) => binding.after.append(&mut before),
            Some(SetItem::Inherit(inherit)) => inherit.after.append(&mut before),
            None => inner = before,
        }
    }

    Ok((items, inner))
}

/// Flatten the `binding_set` wrapper that the grammar inserts.
fn set_content<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut content = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "binding_set" {
            let mut inner_cursor = child.walk();
            content.extend(child.named_children(&mut inner_cursor));
        } else {
            content.push(child);
        }
    }
    content
}

pub fn lower_attr_set(node: Node<'_>, source: &[u8]) -> Result<AttributeSet, ManipulatorError> {
    let multiline = Multiline::from_source(node_text(node, source).contains('\n'));
    let recursive = node.kind() == "rec_attrset_expression";
    let content = set_content(node);

    let mut leading: Vec<Trivia> = Vec::new();
    if let (Some(open), Some(first)) = (find_token(node, "{"), content.first()) {
        if gap_has_blank_line(source, open.end_byte(), first.start_byte()) {
            leading.push(Trivia::BlankLine);
        }
    }

    let (mut items, mut inner_trivia) = lower_item_sequence(source, &content, leading)?;

    if let (Some(last), Some(close)) = (content.last(), find_token(node, "}")) {
        if gap_has_blank_line(source, last.end_byte(), close.start_byte()) {
            match items.last_mut() {
                Some(SetItem::Binding(binding)) => binding.after.push(Trivia::BlankLine),
                Some(SetItem::Inherit(inherit)) => inherit.after.push(Trivia::BlankLine),
                None => inner_trivia.push(Trivia::BlankLine),
            }
        }
    }
    if content.is_empty() {
        if let (Some(open), Some(close)) = (find_token(node, "{"), find_token(node, "}")) {
            if gap_has_blank_line(source, open.end_byte(), close.start_byte()) {
                inner_trivia.push(Trivia::BlankLine);
            }
        }
    }

    Ok(AttributeSet {
        values: items,
        recursive,
        multiline,
        inner_trivia,
        scope_stack: Vec::new(),
    })
}

pub fn lower_list(node: Node<'_>, source: &[u8]) -> Result<NixList, ManipulatorError> {
    let multiline = Multiline::from_source(node_text(node, source).contains('\n'));
    let content: Vec<Node<'_>> = children(node)
        .into_iter()
        .filter(|child| !matches!(child.kind(), "[" | "]"))
        .collect();

    let mut elements: Vec<Expr> = Vec::new();
    let mut before: Vec<Trivia> = Vec::new();
    let mut inner_trivia: Vec<Trivia> = Vec::new();
    let mut prev: Option<Node<'_>> = None;

    if let (Some(open), Some(first)) = (find_token(node, "["), content.first()) {
        if gap_has_blank_line(source, open.end_byte(), first.start_byte()) {
            before.push(Trivia::BlankLine);
        }
    }

    for child in &content {
        let child = *child;
        if child.kind() == "comment" {
            let inline = prev.map_or(false, |p| same_row(child, p)) && !elements.is_empty();
            if inline {
                let owner = elements.last_mut().expect("non-empty elements");
                owner.after.push(lower_comment(child, source, true));
            } else {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                before.push(lower_comment(child, source, false));
            }
        } else {
            if let Some(p) = prev {
                push_gap(&mut before, source, p.end_byte(), child.start_byte());
            }
            let mut element = lower_expr(child, source)?;
            if !before.is_empty() {
                before.append(&mut element.before);
                element.before = std::mem::take(&mut before);
            }
            elements.push(element);
        }
        prev = Some(child);
    }

    if !before.is_empty() {
        match elements.last_mut() {
            Some(element) => element.after.append(&mut before),
            None => inner_trivia = before,
        }
    }

    if let (Some(last), Some(close)) = (content.last(), find_token(node, "]")) {
        if gap_has_blank_line(source, last.end_byte(), close.start_byte()) {
            match elements.last_mut() {
                Some(element) => element.after.push(Trivia::BlankLine),
                None => inner_trivia.push(Trivia::BlankLine),
            }
        }
    }
    if content.is_empty() {
        if let (Some(open), Some(close)) = (find_token(node, "["), find_token(node, "]")) {
            if gap_has_blank_line(source, open.end_byte(), close.start_byte()) {
                inner_trivia.push(Trivia::BlankLine);
            }
        }
    }

    Ok(NixList {
        elements,
        multiline,
        inner_trivia,
    })
}

pub fn lower_binding(
    node: Node<'_>,
    source: &[u8],
    before: Vec<Trivia>,
) -> Result<Binding, ManipulatorError> {
    let mut name: Option<String> = None;
    let mut attrpath_node: Option<Node<'_>> = None;
    let mut value: Option<Expr> = None;
    let mut value_node: Option<Node<'_>> = None;
    let mut equals: Option<Node<'_>> = None;
    let mut before_value: Vec<Trivia> = Vec::new();
    let mut prev: Option<Node<'_>> = None;

    for child in children(node) {
        match child.kind() {
            "=" => {
                equals = Some(child);
                prev = Some(child);
            }
            ";" => {
                prev = Some(child);
            }
            "attrpath" => {
                name = Some(node_text(child, source).to_string());
                attrpath_node = Some(child);
                prev = Some(child);
            }
            "comment" => {
                let trails_value = match (value_node, prev) {
                    (Some(v), Some(p)) => p.id() == v.id() && same_row(child, v),
                    _ => false,
                };
                if trails_value {
                    let owner = value.as_mut().expect("value parsed before its comment");
                    owner.after.push(lower_comment(child, source, true));
                } else {
                    if let Some(p) = prev {
                        push_gap(&mut before_value, source, p.end_byte(), child.start_byte());
                    }
                    before_value.push(lower_comment(child, source, false));
                }
                prev = Some(child);
            }
            _ => {
                if let Some(p) = prev {
                    push_gap(&mut before_value, source, p.end_byte(), child.start_byte());
                }
                let mut lowered = lower_expr(child, source)?;
                if !before_value.is_empty() {
                    before_value.append(&mut lowered.before);
                    lowered.before = std::mem::take(&mut before_value);
                }
                value_node = Some(child);
                value = Some(lowered);
                prev = Some(child);
            }
        }
    }

    let name = name.ok_or_else(|| parse_err(node, "binding without attrpath"))?;
    let mut value = value.ok_or_else(|| parse_err(node, "binding without value"))?;
    if !before_value.is_empty() {
        // Comments between the value and the semicolon trail the value.
        value.after.append(&mut before_value);
    }

    let value_on_newline = match (equals, value_node) {
        (Some(eq), Some(v)) => gap_has_newline(source, eq.end_byte(), v.start_byte()),
        _ => false,
    };

    let path = split_attrpath(&name).map_err(|msg| parse_err(node, msg))?;

    // An attrpath with an interior comment keeps its source text so the
    // comment survives rebuilds that leave the path untouched.
    let raw_path = attrpath_node
        .filter(|attrpath| {
            children(*attrpath)
                .iter()
                .any(|child| child.kind() == "comment")
        })
        .map(|_| name.clone());

    Ok(Binding {
        path,
        raw_path,
        value,
        value_on_newline,
        before,
        after: Vec::new(),
    })
}

pub fn lower_inherit(
    node: Node<'_>,
    source: &[u8],
    before: Vec<Trivia>,
) -> Result<Inherit, ManipulatorError> {
    let mut names: Vec<String> = Vec::new();
    let mut from_expr: Option<Box<Expr>> = None;

    for child in children(node) {
        match child.kind() {
            "inherited_attrs" => {
                let mut cursor = child.walk();
                for attr in child.named_children(&mut cursor) {
                    if attr.kind() == "comment" {
                        return Err(trivia_err(attr, "comment inside inherit names"));
                    }
                    names.push(node_text(attr, source).to_string());
                }
            }
            "parenthesized_expression" => {
                let mut inner: Option<Expr> = None;
                for grandchild in children(child) {
                    if !matches!(grandchild.kind(), "(" | ")" | "comment") {
                        inner = Some(lower_expr(grandchild, source)?);
                    }
                }
                from_expr = inner.map(Box::new);
            }
            _ => {}
        }
    }

    if from_expr.is_none() {
        if let Some(expression) = node.child_by_field_name("expression") {
            from_expr = Some(Box::new(lower_expr(expression, source)?));
        }
    }

    Ok(Inherit {
        names,
        from_expr,
        before,
        after: Vec::new(),
    })
}

/// Lower a `let … in …`. A multiline `let` whose body is (or folds into)
/// an attribute set becomes a scope layer on that set, so the mapping and
/// edit layers can treat the wrapper as an outer scope; anything else
/// stays a `Let` expression.
pub fn lower_let(node: Node<'_>, source: &[u8]) -> Result<Expr, ManipulatorError> {
    let multiline = node_text(node, source).contains('\n');
    let kids = children(node);

    let binding_set = kids
        .iter()
        .find(|child| child.kind() == "binding_set")
        .copied();
    let in_token = find_token(node, "in")
        .ok_or_else(|| parse_err(node, "let expression without `in`"))?;
    let body_node = kids
        .iter()
        .rev()
        .find(|child| {
            !matches!(child.kind(), "let" | "in" | "binding_set" | "comment")
                && child.start_byte() >= in_token.end_byte()
        })
        .copied()
        .ok_or_else(|| parse_err(node, "let expression without body"))?;

    let content: Vec<Node<'_>> = match binding_set {
        Some(set) => {
            let mut cursor = set.walk();
            set.named_children(&mut cursor).collect()
        }
        None => Vec::new(),
    };
    let (bindings, _inner) = lower_item_sequence(source, &content, Vec::new())?;

    // Trivia between `in` and the body.
    let mut in_trivia: Vec<Trivia> = Vec::new();
    let mut prev_end = in_token.end_byte();
    for child in &kids {
        if child.kind() == "comment"
            && child.start_byte() >= in_token.end_byte()
            && child.end_byte() <= body_node.start_byte()
        {
            push_gap(&mut in_trivia, source, prev_end, child.start_byte());
            in_trivia.push(lower_comment(*child, source, false));
            prev_end = child.end_byte();
        }
    }
    if gap_has_blank_line(source, prev_end, body_node.start_byte()) {
        in_trivia.push(Trivia::BlankLine);
    }
    in_trivia.retain(|t| *t != Trivia::LineBreak);

    let mut body = lower_expr(body_node, source)?;

    if multiline && !bindings.is_empty() {
        if let ExprKind::AttrSet(set) = &mut body.kind {
            set.scope_stack.insert(
                0,
                ScopeLayer {
                    bindings,
                    body_before: in_trivia,
                },
            );
            return Ok(body);
        }
    }

    if !in_trivia.is_empty() {
        in_trivia.append(&mut body.before);
        body.before = in_trivia;
    }
    Ok(Expr::new(ExprKind::Let(LetExpression {
        bindings,
        body: Box::new(body),
        multiline: Multiline::from_source(multiline),
    })))
}

pub fn lower_lambda(
    node: Node<'_>,
    source: &[u8],
) -> Result<FunctionDefinition, ManipulatorError> {
    let body_node = node
        .child_by_field_name("body")
        .ok_or_else(|| parse_err(node, "function definition has no body"))?;

    let signature: Vec<Node<'_>> = children(node)
        .into_iter()
        .take_while(|child| child.kind() != ":")
        .filter(|child| child.kind() != "comment")
        .collect();

    let param = match signature.as_slice() {
        [only] if only.kind() == "identifier" => {
            Param::Identifier(node_text(*only, source).to_string())
        }
        [ident, at, formals]
            if ident.kind() == "identifier" && at.kind() == "@" && formals.kind() == "formals" =>
        {
            let (formals, multiline) = lower_formals(*formals, source)?;
            Param::Formals {
                formals,
                multiline,
                binding: Some(FormalsBinding {
                    name: node_text(*ident, source).to_string(),
                    before_formals: true,
                }),
            }
        }
        [formals, at, ident]
            if formals.kind() == "formals" && at.kind() == "@" && ident.kind() == "identifier" =>
        {
            let (formals, multiline) = lower_formals(*formals, source)?;
            Param::Formals {
                formals,
                multiline,
                binding: Some(FormalsBinding {
                    name: node_text(*ident, source).to_string(),
                    before_formals: false,
                }),
            }
        }
        [only] if only.kind() == "formals" => {
            let (formals, multiline) = lower_formals(*only, source)?;
            Param::Formals {
                formals,
                multiline,
                binding: None,
            }
        }
        _ => return Err(parse_err(node, "unsupported function signature")),
    };

    let colon = find_token(node, ":")
        .ok_or_else(|| parse_err(node, "function definition without `:`"))?;
    let body_on_newline = gap_has_newline(source, colon.end_byte(), body_node.start_byte());

    let mut body = lower_expr(body_node, source)?;
    let mut colon_trivia: Vec<Trivia> = Vec::new();
    let mut prev_end = colon.end_byte();
    for child in children(node) {
        if child.kind() == "comment"
            && child.start_byte() >= colon.end_byte()
            && child.end_byte() <= body_node.start_byte()
        {
            push_gap(&mut colon_trivia, source, prev_end, child.start_byte());
            colon_trivia.push(lower_comment(child, source, false));
            prev_end = child.end_byte();
        }
    }
    if gap_has_blank_line(source, prev_end, body_node.start_byte()) {
        colon_trivia.push(Trivia::BlankLine);
    }
    colon_trivia.retain(|t| *t != Trivia::LineBreak);
    if !colon_trivia.is_empty() {
        colon_trivia.append(&mut body.before);
        body.before = colon_trivia;
    }

    Ok(FunctionDefinition {
        param,
        body: Box::new(body),
        body_on_newline,
    })
}

fn lower_formals(
    node: Node<'_>,
    source: &[u8],
) -> Result<(Vec<Formal>, Multiline), ManipulatorError> {
    let multiline = Multiline::from_source(node_text(node, source).contains('\n'));
    let mut formals: Vec<Formal> = Vec::new();
    let mut before: Vec<Trivia> = Vec::new();
    let mut prev: Option<Node<'_>> = None;

    for child in children(node) {
        match child.kind() {
            "{" | "}" | "," => {
                prev = Some(child);
            }
            "comment" => {
                let inline = prev.map_or(false, |p| same_row(child, p)) && !formals.is_empty();
                if inline {
                    let owner = formals.last_mut().expect("non-empty formals");
                    owner.after.push(lower_comment(child, source, true));
                } else {
                    if let Some(p) = prev {
                        push_gap(&mut before, source, p.end_byte(), child.start_byte());
                    }
                    before.push(lower_comment(child, source, false));
                }
                prev = Some(child);
            }
            "formal" => {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                formals.push(lower_formal(child, source, std::mem::take(&mut before))?);
                prev = Some(child);
            }
            "ellipses" => {
                if let Some(p) = prev {
                    push_gap(&mut before, source, p.end_byte(), child.start_byte());
                }
                formals.push(Formal {
                    name: "...".to_string(),
                    default: None,
                    before: std::mem::take(&mut before),
                    after: Vec::new(),
                });
                prev = Some(child);
            }
            other => return Err(parse_err(child, format!("unexpected formal item: {other}"))),
        }
    }

    if !before.is_empty() {
        match formals.last_mut() {
            Some(last) => last.after.append(&mut before),
            None => return Err(trivia_err(node, "dangling trivia in empty formals")),
        }
    }

    Ok((formals, multiline))
}

fn lower_formal(
    node: Node<'_>,
    source: &[u8],
    before: Vec<Trivia>,
) -> Result<Formal, ManipulatorError> {
    let mut name: Option<String> = None;
    let mut default: Option<Expr> = None;

    for child in children(node) {
        match child.kind() {
            "identifier" => {
                let text = node_text(child, source);
                if !text.is_empty() && name.is_none() {
                    name = Some(text.to_string());
                }
            }
            "?" | "comment" => {}
            _ => default = Some(lower_expr(child, source)?),
        }
    }

    let name = name.ok_or_else(|| parse_err(node, "formal without identifier"))?;
    Ok(Formal {
        name,
        default,
        before,
        after: Vec::new(),
    })
}

/// Split an attrpath into its segments, respecting quoted segments and
/// `${…}` interpolations. Comments between segments are skipped; segments
/// keep their source spelling.
pub fn split_attrpath(text: &str) -> Result<Vec<String>, String> {
    let mut segments: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut in_quotes = false;
    let mut escape = false;
    let mut interp_depth = 0usize;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if interp_depth > 0 {
            buffer.push(ch);
            match ch {
                '{' => interp_depth += 1,
                '}' => interp_depth -= 1,
                _ => {}
            }
            continue;
        }
        if in_quotes {
            buffer.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_quotes = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_quotes = true;
                buffer.push(ch);
            }
            '$' if chars.peek() == Some(&'{') => {
                buffer.push(ch);
                buffer.push(chars.next().expect("peeked opening brace"));
                interp_depth = 1;
            }
            '#' => {
                // Line comment inside the attrpath; not part of a segment.
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev_star = false;
                for next in chars.by_ref() {
                    if prev_star && next == '/' {
                        break;
                    }
                    prev_star = next == '*';
                }
            }
            '.' => {
                let segment = buffer.trim().to_string();
                if segment.is_empty() {
                    return Err("empty attrpath segment".to_string());
                }
                segments.push(segment);
                buffer = String::new();
            }
            _ => buffer.push(ch),
        }
    }

    if in_quotes {
        return Err("unterminated quoted attrpath segment".to_string());
    }
    if interp_depth > 0 {
        return Err("unterminated attrpath interpolation".to_string());
    }
    let segment = buffer.trim().to_string();
    if segment.is_empty() {
        return Err("empty attrpath segment".to_string());
    }
    segments.push(segment);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::split_attrpath;

    #[test]
    fn splits_plain_attrpaths() {
        assert_eq!(split_attrpath("foo.bar").unwrap(), vec!["foo", "bar"]);
    }

    #[test]
    fn quoted_segments_keep_their_dots() {
        assert_eq!(
            split_attrpath("foo.\"bar.baz\"").unwrap(),
            vec!["foo", "\"bar.baz\""]
        );
    }

    #[test]
    fn interpolated_segments_stay_whole() {
        assert_eq!(
            split_attrpath("foo.${name}").unwrap(),
            vec!["foo", "${name}"]
        );
    }

    #[test]
    fn interior_comments_are_not_segment_text() {
        assert_eq!(
            split_attrpath("foo. # c\n  bar").unwrap(),
            vec!["foo", "bar"]
        );
        assert_eq!(
            split_attrpath("foo./* c */bar").unwrap(),
            vec!["foo", "bar"]
        );
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(split_attrpath("foo..bar").is_err());
        assert!(split_attrpath(".foo").is_err());
    }
}
