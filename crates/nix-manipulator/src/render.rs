//! The rebuilder. Every variant serializes itself here.
//!
//! Contracts: rebuilding an unedited parse reproduces the input
//! byte-for-byte (modulo alignment-only whitespace), rebuilding a rebuilt
//! tree is idempotent, and containers choose inline vs multiline layout
//! from their tri-state flag, falling back to structural heuristics.

use log::debug;

use crate::expr::{
    AttributeSet, Binding, Expr, ExprKind, Formal, FunctionDefinition, Inherit, LetExpression,
    Multiline, NixList, Param, Primitive, SetItem, SourceFile,
};
use crate::lower::bindings::split_attrpath;
use crate::trivia::{apply_trailing, format_trivia, trim_layout_newline, Trivia};

/// Inline lists longer than this are rendered multiline under `Auto`.
const LIST_INLINE_LIMIT: usize = 3;

fn pad(indent: usize) -> String {
    " ".repeat(indent)
}

/// Escape string content so rebuilds emit valid Nix. Used only for
/// constructed strings; parsed strings keep their source bytes.
pub fn escape_nix_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                escaped.push_str("\\${");
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

impl SourceFile {
    /// Reassemble the whole document. Never fails on a well-formed tree.
    pub fn rebuild(&self) -> String {
        let rebuilt = match &self.expr {
            Some(expr) => render_expr(expr, 0, false),
            None => String::new(),
        };

        let scoped = matches!(
            &self.expr,
            Some(expr) if matches!(&expr.kind, ExprKind::AttrSet(set) if !set.scope_stack.is_empty())
        );

        let mut out = if self.trailing.is_empty() {
            rebuilt
        } else {
            let trailing_str =
                trim_layout_newline(&self.trailing, format_trivia(&self.trailing, 0));
            if !trailing_str.is_empty() {
                let prefix = if rebuilt.is_empty() { "" } else { "\n" };
                format!("{rebuilt}{prefix}{trailing_str}")
            } else if matches!(self.trailing.last(), Some(t) if t.is_layout())
                && !rebuilt.ends_with('\n')
            {
                rebuilt + "\n"
            } else {
                rebuilt
            }
        };

        // A scope-wrapped document always ends with a line break.
        if scoped && !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

impl Expr {
    /// Render this expression alone, without document context.
    pub fn rebuild(&self) -> String {
        render_expr(self, 0, true)
    }
}

pub(crate) fn render_expr(expr: &Expr, indent: usize, inline: bool) -> String {
    render_expr_opts(expr, indent, inline, true)
}

fn render_expr_opts(expr: &Expr, indent: usize, inline: bool, with_after: bool) -> String {
    if let ExprKind::AttrSet(set) = &expr.kind {
        if !set.scope_stack.is_empty() {
            return render_scoped_set(expr, set, indent, with_after);
        }
    }

    let before_str = format_trivia(&expr.before, indent);
    let indentation = if inline { String::new() } else { pad(indent) };
    let core = render_kind(&expr.kind, indent, inline);
    let base = format!("{before_str}{indentation}{core}");
    if with_after {
        apply_trailing(&base, &expr.after, indent)
    } else {
        base
    }
}

fn render_kind(kind: &ExprKind, indent: usize, inline: bool) -> String {
    match kind {
        ExprKind::Primitive(primitive) => render_primitive(primitive),
        ExprKind::Identifier(name) => name.clone(),
        ExprKind::Path(path) => path.clone(),
        ExprKind::List(list) => render_list(list, indent),
        ExprKind::AttrSet(set) => render_set(set, indent),
        ExprKind::Let(let_expr) => render_let(let_expr, indent),
        ExprKind::With(with) => {
            let environment = render_expr(&with.environment, indent, true);
            let body = render_body(&with.body, indent, with.body_on_newline);
            format!("with {environment};{body}")
        }
        ExprKind::If(if_expr) => {
            let multiline = match if_expr.multiline {
                Multiline::On => true,
                Multiline::Off => false,
                Multiline::Auto => {
                    render_expr(&if_expr.consequence, 0, true).contains('\n')
                        || render_expr(&if_expr.alternative, 0, true).contains('\n')
                }
            };
            let condition = render_expr(&if_expr.condition, indent, true);
            if multiline {
                format!(
                    "if {condition} then\n{}\n{}else\n{}",
                    render_expr(&if_expr.consequence, indent + 2, false),
                    pad(indent),
                    render_expr(&if_expr.alternative, indent + 2, false),
                )
            } else {
                format!(
                    "if {condition} then {} else {}",
                    render_expr(&if_expr.consequence, indent, true),
                    render_expr(&if_expr.alternative, indent, true),
                )
            }
        }
        ExprKind::Select(select) => {
            let expression = render_expr(&select.expression, indent, true);
            match &select.default {
                Some(default) => format!(
                    "{expression}.{} or {}",
                    select.attrpath,
                    render_expr(default, indent, true)
                ),
                None => format!("{expression}.{}", select.attrpath),
            }
        }
        ExprKind::Lambda(lambda) => render_lambda(lambda, indent),
        ExprKind::Apply(call) => {
            let function = render_expr(&call.function, indent, true);
            let arg_below = call
                .argument
                .before
                .iter()
                .any(|t| t.is_layout() || t.is_comment());
            if arg_below {
                format!(
                    "{function}\n{}",
                    render_expr(&call.argument, indent + 2, false)
                )
            } else {
                format!("{function} {}", render_expr(&call.argument, indent, true))
            }
        }
        ExprKind::BinaryOp(binary) => format!(
            "{} {} {}",
            render_expr(&binary.left, indent, true),
            binary.operator,
            render_expr(&binary.right, indent, true),
        ),
        ExprKind::UnaryOp(unary) => format!(
            "{}{}",
            unary.operator,
            render_expr(&unary.operand, indent, true)
        ),
        ExprKind::Assert(assertion) => {
            let condition = render_expr(&assertion.condition, indent, true);
            let body = render_body(&assertion.body, indent, assertion.body_on_newline);
            format!("assert {condition};{body}")
        }
        ExprKind::Paren(inner) => format!("({})", render_expr(inner, indent, true)),
    }
}

/// Body of `with`/`assert`/lambda: either on the same line or below at the
/// same indent, with the body's own `before` trivia in between.
fn render_body(body: &Expr, indent: usize, on_newline: bool) -> String {
    let forced = on_newline || body.before.iter().any(|t| t.is_comment() || t.is_layout());
    if forced {
        format!("\n{}", render_expr(body, indent, false))
    } else {
        format!(" {}", render_expr(body, indent, true))
    }
}

fn render_primitive(primitive: &Primitive) -> String {
    match primitive {
        Primitive::String { value, raw } => {
            if *raw {
                format!("\"{value}\"")
            } else {
                format!("\"{}\"", escape_nix_string(value))
            }
        }
        Primitive::Indented { value } => format!("''{value}''"),
        Primitive::Int(value) => value.to_string(),
        Primitive::Float(text) => text.clone(),
        Primitive::Bool(value) => if *value { "true" } else { "false" }.to_string(),
        Primitive::Null => "null".to_string(),
    }
}

/// Attrpath text for a binding. A captured verbatim attrpath (one with an
/// interior comment) is emitted as long as it still splits to the same
/// segments; once the path has been edited, the comment is dropped with a
/// diagnostic.
fn binding_name(binding: &Binding) -> String {
    match &binding.raw_path {
        Some(raw) if split_attrpath(raw).ok().as_deref() == Some(&binding.path[..]) => raw.clone(),
        Some(raw) => {
            debug!("dropping interior attrpath comment: {raw:?} no longer matches the binding path");
            binding.path.join(".")
        }
        None => binding.path.join("."),
    }
}

fn item_trivia(item: &SetItem) -> (&[Trivia], &[Trivia]) {
    match item {
        SetItem::Binding(binding) => (&binding.before, &binding.after),
        SetItem::Inherit(inherit) => (&inherit.before, &inherit.after),
    }
}

pub(crate) fn set_is_multiline(set: &AttributeSet) -> bool {
    match set.multiline {
        Multiline::On => true,
        Multiline::Off => false,
        Multiline::Auto => {
            if set.values.len() > 1 || !set.inner_trivia.is_empty() {
                return true;
            }
            set.values.iter().any(|item| {
                let (before, after) = item_trivia(item);
                before.iter().any(Trivia::is_comment)
                    || after.iter().any(Trivia::is_comment)
                    || render_item(item, 0, true).contains('\n')
            })
        }
    }
}

fn render_item(item: &SetItem, indent: usize, inline: bool) -> String {
    match item {
        SetItem::Binding(binding) => render_binding(binding, indent, inline),
        SetItem::Inherit(inherit) => render_inherit(inherit, indent, inline),
    }
}

fn render_set(set: &AttributeSet, indent: usize) -> String {
    let prefix = if set.recursive { "rec " } else { "" };

    if set.values.is_empty() {
        if set.inner_trivia.is_empty() {
            return format!("{prefix}{{ }}");
        }
        let inner = format_trivia(&set.inner_trivia, indent + 2);
        let closing_sep = if inner.ends_with('\n') { "" } else { "\n" };
        return format!("{prefix}{{\n{inner}{closing_sep}{}}}", pad(indent));
    }

    if set_is_multiline(set) {
        let items: Vec<String> = set
            .values
            .iter()
            .map(|item| render_item(item, indent + 2, false))
            .collect();
        let items_str = items.join("\n");
        let closing_sep = if items_str.ends_with('\n') { "" } else { "\n" };
        format!("{prefix}{{\n{items_str}{closing_sep}{}}}", pad(indent))
    } else {
        let items: Vec<String> = set
            .values
            .iter()
            .map(|item| render_item(item, indent + 2, true))
            .collect();
        format!("{prefix}{{ {} }}", items.join(" "))
    }
}

/// Render the `let … in` layers wrapped around an attribute set, outermost
/// first, then the set itself.
fn render_scoped_set(expr: &Expr, set: &AttributeSet, indent: usize, with_after: bool) -> String {
    let mut out = format_trivia(&expr.before, indent);
    for layer in &set.scope_stack {
        debug_assert!(!layer.bindings.is_empty(), "empty scope layers are pruned");
        if layer.bindings.is_empty() {
            continue;
        }
        let bindings: Vec<String> = layer
            .bindings
            .iter()
            .map(|item| render_item(item, indent + 2, false))
            .collect();
        out.push_str(&pad(indent));
        out.push_str("let\n");
        out.push_str(&bindings.join("\n"));
        out.push('\n');
        out.push_str(&pad(indent));
        out.push_str("in\n");
        out.push_str(&format_trivia(&layer.body_before, indent));
    }
    out.push_str(&pad(indent));
    out.push_str(&render_set(set, indent));
    if with_after {
        apply_trailing(&out, &expr.after, indent)
    } else {
        out
    }
}

fn render_binding(binding: &Binding, indent: usize, inline: bool) -> String {
    let before_str = format_trivia(&binding.before, indent);
    let indentation = if inline { String::new() } else { pad(indent) };
    let name = binding_name(binding);

    let value_below =
        binding.value_on_newline || binding.value.before.iter().any(Trivia::is_comment);
    let (sep, value_str) = if value_below {
        ("\n", render_expr_opts(&binding.value, indent + 2, false, false))
    } else {
        (" ", render_expr_opts(&binding.value, indent, true, false))
    };
    let mut core = format!("{name} ={sep}{value_str}");

    if binding.value.after.is_empty() {
        core.push(';');
    } else {
        // A trailing comment on the value pushes the semicolon onto the
        // next line (RFC-0166).
        core = apply_trailing(&core, &binding.value.after, indent);
        core.push('\n');
        core.push_str(&pad(indent));
        core.push(';');
    }

    let rendered = format!("{before_str}{indentation}{core}");
    apply_trailing(&rendered, &binding.after, indent)
}

fn render_inherit(inherit: &Inherit, indent: usize, inline: bool) -> String {
    let before_str = format_trivia(&inherit.before, indent);
    let indentation = if inline { String::new() } else { pad(indent) };
    let mut core = String::from("inherit");
    if let Some(from_expr) = &inherit.from_expr {
        core.push_str(&format!(" ({})", render_expr(from_expr, indent, true)));
    }
    for name in &inherit.names {
        core.push(' ');
        core.push_str(name);
    }
    core.push(';');
    let rendered = format!("{before_str}{indentation}{core}");
    apply_trailing(&rendered, &inherit.after, indent)
}

fn list_is_multiline(list: &NixList) -> bool {
    match list.multiline {
        Multiline::On => true,
        Multiline::Off => false,
        Multiline::Auto => {
            if list.elements.len() > LIST_INLINE_LIMIT || !list.inner_trivia.is_empty() {
                return true;
            }
            list.elements.iter().any(|element| {
                element.before.iter().any(Trivia::is_comment)
                    || element.after.iter().any(Trivia::is_comment)
                    || render_expr(element, 0, true).contains('\n')
            })
        }
    }
}

fn render_list(list: &NixList, indent: usize) -> String {
    if list.elements.is_empty() {
        if list.inner_trivia.is_empty() {
            return "[ ]".to_string();
        }
        let inner = format_trivia(&list.inner_trivia, indent + 2);
        let closing_sep = if inner.ends_with('\n') { "" } else { "\n" };
        return format!("[\n{inner}{closing_sep}{}]", pad(indent));
    }

    if list_is_multiline(list) {
        let items: Vec<String> = list
            .elements
            .iter()
            .map(|element| render_expr(element, indent + 2, false))
            .collect();
        let items_str = items.join("\n");
        let closing_sep = if items_str.ends_with('\n') { "" } else { "\n" };
        format!("[\n{items_str}{closing_sep}{}]", pad(indent))
    } else {
        let items: Vec<String> = list
            .elements
            .iter()
            .map(|element| render_expr(element, indent, true))
            .collect();
        format!("[ {} ]", items.join(" "))
    }
}

fn let_is_multiline(let_expr: &LetExpression) -> bool {
    match let_expr.multiline {
        Multiline::On => true,
        Multiline::Off => false,
        Multiline::Auto => {
            let_expr.bindings.len() > 1
                || let_expr
                    .bindings
                    .iter()
                    .any(|item| render_item(item, 0, true).contains('\n'))
        }
    }
}

fn render_let(let_expr: &LetExpression, indent: usize) -> String {
    if let_is_multiline(let_expr) {
        let bindings: Vec<String> = let_expr
            .bindings
            .iter()
            .map(|item| render_item(item, indent + 2, false))
            .collect();
        format!(
            "let\n{}\n{}in\n{}",
            bindings.join("\n"),
            pad(indent),
            render_expr(&let_expr.body, indent, false),
        )
    } else {
        let bindings: Vec<String> = let_expr
            .bindings
            .iter()
            .map(|item| render_item(item, indent, true))
            .collect();
        format!(
            "let {} in {}",
            bindings.join(" "),
            render_expr(&let_expr.body, indent, true),
        )
    }
}

fn render_lambda(lambda: &FunctionDefinition, indent: usize) -> String {
    let param = match &lambda.param {
        Param::Identifier(name) => name.clone(),
        Param::Formals {
            formals,
            multiline,
            binding,
        } => {
            let formals_str = render_formals(formals, *multiline, indent);
            match binding {
                Some(b) if b.before_formals => format!("{}@{formals_str}", b.name),
                Some(b) => format!("{formals_str}@{}", b.name),
                None => formals_str,
            }
        }
    };
    let body = render_body(&lambda.body, indent, lambda.body_on_newline);
    format!("{param}:{body}")
}

fn formals_are_multiline(formals: &[Formal], multiline: Multiline) -> bool {
    match multiline {
        Multiline::On => true,
        Multiline::Off => false,
        Multiline::Auto => {
            formals.len() > LIST_INLINE_LIMIT
                || formals.iter().any(|formal| {
                    formal.before.iter().any(Trivia::is_comment)
                        || formal.after.iter().any(Trivia::is_comment)
                })
        }
    }
}

fn render_formals(formals: &[Formal], multiline: Multiline, indent: usize) -> String {
    if formals.is_empty() {
        return "{ }".to_string();
    }

    let render_one = |formal: &Formal, formal_indent: usize| -> String {
        let mut core = formal.name.clone();
        if let Some(default) = &formal.default {
            core.push_str(" ? ");
            core.push_str(&render_expr(default, formal_indent, true));
        }
        core
    };

    if formals_are_multiline(formals, multiline) {
        let mut lines: Vec<String> = Vec::new();
        for (index, formal) in formals.iter().enumerate() {
            let before_str = format_trivia(&formal.before, indent + 2);
            let mut line = format!(
                "{before_str}{}{}",
                pad(indent + 2),
                render_one(formal, indent + 2)
            );
            if index + 1 < formals.len() {
                line.push(',');
            }
            line = apply_trailing(&line, &formal.after, indent + 2);
            lines.push(line);
        }
        format!("{{\n{}\n{}}}", lines.join("\n"), pad(indent))
    } else {
        let parts: Vec<String> = formals
            .iter()
            .map(|formal| render_one(formal, indent))
            .collect();
        format!("{{ {} }}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{AttributeSet, Binding, Expr, ExprKind, Multiline, NixList, SetItem};

    fn ident_list(names: &[&str]) -> NixList {
        NixList::new(names.iter().map(|name| Expr::ident(*name)).collect())
    }

    #[test]
    fn short_lists_stay_inline() {
        let list = Expr::new(ExprKind::List(ident_list(&["foo", "bar"])));
        assert_eq!(list.rebuild(), "[ foo bar ]");
    }

    #[test]
    fn long_lists_go_multiline() {
        let list = Expr::new(ExprKind::List(ident_list(&["a", "b", "c", "d"])));
        assert_eq!(list.rebuild(), "[\n  a\n  b\n  c\n  d\n]");
    }

    #[test]
    fn explicit_multiline_overrides_the_heuristic() {
        let mut inner = ident_list(&["foo", "bar"]);
        inner.multiline = Multiline::On;
        let list = Expr::new(ExprKind::List(inner));
        assert_eq!(list.rebuild(), "[\n  foo\n  bar\n]");
    }

    #[test]
    fn single_binding_sets_stay_inline() {
        let set = AttributeSet::from_pairs(vec![("foo".to_string(), Expr::from(1))]);
        let expr = Expr::new(ExprKind::AttrSet(set));
        assert_eq!(expr.rebuild(), "{ foo = 1; }");
    }

    #[test]
    fn multi_binding_sets_go_multiline() {
        let set = AttributeSet::from_pairs(vec![
            ("a".to_string(), Expr::from(1)),
            ("b".to_string(), Expr::from(2)),
        ]);
        let expr = Expr::new(ExprKind::AttrSet(set));
        assert_eq!(expr.rebuild(), "{\n  a = 1;\n  b = 2;\n}");
    }

    #[test]
    fn constructed_strings_are_escaped() {
        let expr = Expr::string("a\"b\\c\nd");
        assert_eq!(expr.rebuild(), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn interpolation_is_escaped_in_constructed_strings() {
        let expr = Expr::string("v${x}");
        assert_eq!(expr.rebuild(), "\"v\\${x}\"");
    }

    #[test]
    fn attrpath_bindings_render_dotted() {
        let binding = Binding::with_path(
            vec!["foo".to_string(), "bar".to_string()],
            Expr::from(1),
        );
        let set = AttributeSet::new(vec![SetItem::Binding(binding)]);
        let expr = Expr::new(ExprKind::AttrSet(set));
        assert_eq!(expr.rebuild(), "{ foo.bar = 1; }");
    }
}
