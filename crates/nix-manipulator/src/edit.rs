//! The edit API: `set_value` / `remove_value` over a parsed document.
//!
//! A path spec is `(@+)? segment ("." segment)*` where a segment is a bare
//! identifier or a double-quoted string. Leading `@`s select a `let … in`
//! scope layer instead of the attribute-set body: one `@` is the innermost
//! layer, each further `@` walks outward once.

use std::collections::HashSet;
use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::expr::{
    AttributeSet, Expr, ExprKind, Multiline, ScopeLayer, SetItem, SourceFile,
};
use crate::render::escape_nix_string;
use crate::ManipulatorError;

const TOP_LEVEL_SHAPE: &str =
    "top-level expression must be an attribute set or a function returning one";

fn shape_err() -> ManipulatorError {
    ManipulatorError::Shape(TOP_LEVEL_SHAPE.to_string())
}

// ---------------------------------------------------------------------------
// NPATH grammar

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NPathSegment {
    pub name: String,
    pub quoted: bool,
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_'-]*$").expect("static pattern"))
}

/// Count leading `@` scope selectors.
pub(crate) fn split_scope_prefix(npath: &str) -> Result<(usize, &str), ManipulatorError> {
    let depth = npath.chars().take_while(|ch| *ch == '@').count();
    let remainder = &npath[depth..];
    if depth > 0 && remainder.is_empty() {
        return Err(ManipulatorError::InvalidSegment(
            "scope path is missing a binding name".to_string(),
        ));
    }
    Ok((depth, remainder))
}

/// Parse a dot-delimited NPATH with optional quoted segments.
pub(crate) fn parse_npath(npath: &str) -> Result<Vec<NPathSegment>, ManipulatorError> {
    if npath.is_empty() {
        return Err(ManipulatorError::InvalidSegment(
            "path cannot be empty".to_string(),
        ));
    }

    let mut segments: Vec<NPathSegment> = Vec::new();
    let mut buffer = String::new();
    let mut in_quotes = false;
    let mut quoted_segment = false;
    let mut escape = false;

    let finalize = |buffer: &mut String,
                    quoted_segment: &mut bool,
                    segments: &mut Vec<NPathSegment>|
     -> Result<(), ManipulatorError> {
        let name = std::mem::take(buffer);
        if !*quoted_segment {
            if name.is_empty() {
                return Err(ManipulatorError::InvalidSegment(
                    "path contains an empty segment".to_string(),
                ));
            }
            if !ident_re().is_match(&name) {
                return Err(ManipulatorError::InvalidSegment(format!(
                    "not a valid identifier: {name}"
                )));
            }
        }
        segments.push(NPathSegment {
            name,
            quoted: *quoted_segment,
        });
        *quoted_segment = false;
        Ok(())
    };

    for ch in npath.chars() {
        if in_quotes {
            if escape {
                match ch {
                    'n' => buffer.push('\n'),
                    'r' => buffer.push('\r'),
                    't' => buffer.push('\t'),
                    '"' | '\\' => buffer.push(ch),
                    other => {
                        buffer.push('\\');
                        buffer.push(other);
                    }
                }
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => {
                    in_quotes = false;
                    quoted_segment = true;
                }
                other => buffer.push(other),
            }
            continue;
        }

        match ch {
            '.' => finalize(&mut buffer, &mut quoted_segment, &mut segments)?,
            '"' => {
                if !buffer.is_empty() {
                    return Err(ManipulatorError::InvalidSegment(
                        "quoted segments must start at a segment boundary".to_string(),
                    ));
                }
                in_quotes = true;
            }
            other => buffer.push(other),
        }
    }

    if escape {
        return Err(ManipulatorError::InvalidSegment(
            "dangling escape sequence".to_string(),
        ));
    }
    if in_quotes {
        return Err(ManipulatorError::InvalidSegment(
            "unterminated quoted segment".to_string(),
        ));
    }
    finalize(&mut buffer, &mut quoted_segment, &mut segments)?;
    Ok(segments)
}

/// Format a segment as a binding name, quoting when needed.
fn format_segment(segment: &NPathSegment) -> String {
    if segment.quoted || !ident_re().is_match(&segment.name) {
        format!("\"{}\"", escape_nix_string(&segment.name))
    } else {
        segment.name.clone()
    }
}

pub(crate) fn format_npath_segments(npath: &str) -> Result<Vec<String>, ManipulatorError> {
    Ok(parse_npath(npath)?.iter().map(format_segment).collect())
}

// ---------------------------------------------------------------------------
// Editable-target resolution

/// One navigation step from an expression towards the editable set.
#[derive(Debug, Clone, Copy)]
enum Step {
    AssertBody,
    LetBody,
    LambdaBody,
    WithBody,
    WithEnv,
    Paren,
    ApplyArg,
    LetBinding(usize),
    SetBinding(usize),
}

struct SpineFrame<'a> {
    prefix: Vec<Step>,
    items: &'a [SetItem],
    in_let: bool,
}

impl SpineFrame<'_> {
    fn step(&self, index: usize) -> Step {
        if self.in_let {
            Step::LetBinding(index)
        } else {
            Step::SetBinding(index)
        }
    }
}

fn lookup_frames<'a>(frames: &[SpineFrame<'a>], name: &str) -> Option<(&'a Expr, Vec<Step>)> {
    for frame in frames.iter().rev() {
        for (index, item) in frame.items.iter().enumerate() {
            if let SetItem::Binding(binding) = item {
                if binding.path.len() == 1 && binding.name() == name {
                    let mut path = frame.prefix.clone();
                    path.push(frame.step(index));
                    return Some((&binding.value, path));
                }
            }
        }
    }
    None
}

const SPINE_LIMIT: usize = 256;

/// Walk from the top-level expression to the attribute set that edits
/// apply to, recording the steps so the same spot can be reached mutably.
fn find_target_path(root: &Expr) -> Result<Vec<Step>, ManipulatorError> {
    let mut path: Vec<Step> = Vec::new();
    let mut frames: Vec<SpineFrame<'_>> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current: &Expr = root;

    for _ in 0..SPINE_LIMIT {
        match &current.kind {
            ExprKind::AttrSet(_) => return Ok(path),
            ExprKind::Assert(assertion) => {
                path.push(Step::AssertBody);
                current = &assertion.body;
            }
            ExprKind::Let(let_expr) => {
                frames.push(SpineFrame {
                    prefix: path.clone(),
                    items: &let_expr.bindings,
                    in_let: true,
                });
                path.push(Step::LetBody);
                current = &let_expr.body;
            }
            ExprKind::Lambda(lambda) => {
                path.push(Step::LambdaBody);
                current = &lambda.body;
            }
            ExprKind::With(with) => {
                let mut env: &Expr = &with.environment;
                let mut env_path = path.clone();
                env_path.push(Step::WithEnv);
                while let ExprKind::Paren(inner) = &env.kind {
                    env_path.push(Step::Paren);
                    env = inner;
                }
                match &env.kind {
                    ExprKind::AttrSet(set) => frames.push(SpineFrame {
                        prefix: env_path,
                        items: &set.values,
                        in_let: false,
                    }),
                    ExprKind::Identifier(name) => {
                        if let Some((resolved, resolved_path)) = lookup_frames(&frames, name) {
                            if let ExprKind::AttrSet(set) = &resolved.kind {
                                frames.push(SpineFrame {
                                    prefix: resolved_path,
                                    items: &set.values,
                                    in_let: false,
                                });
                            }
                        }
                    }
                    _ => {}
                }
                path.push(Step::WithBody);
                current = &with.body;
            }
            ExprKind::Paren(inner) => {
                path.push(Step::Paren);
                current = inner;
            }
            ExprKind::Apply(call) => {
                let mut callee: &Expr = &call.function;
                while let ExprKind::Paren(inner) = &callee.kind {
                    callee = inner;
                }
                let editable_callee = matches!(
                    &callee.kind,
                    ExprKind::Lambda(_)
                        | ExprKind::Identifier(_)
                        | ExprKind::Select(_)
                        | ExprKind::Apply(_)
                );
                let mut argument: &Expr = &call.argument;
                let mut arg_path = path.clone();
                arg_path.push(Step::ApplyArg);
                while let ExprKind::Paren(inner) = &argument.kind {
                    arg_path.push(Step::Paren);
                    argument = inner;
                }
                if !editable_callee || !matches!(&argument.kind, ExprKind::AttrSet(_)) {
                    return Err(shape_err());
                }
                path = arg_path;
                current = argument;
            }
            ExprKind::Identifier(name) => {
                if !visited.insert(name.clone()) {
                    return Err(shape_err());
                }
                match lookup_frames(&frames, name) {
                    Some((resolved, resolved_path)) => {
                        path = resolved_path;
                        current = resolved;
                    }
                    None => return Err(shape_err()),
                }
            }
            _ => return Err(shape_err()),
        }
    }
    Err(shape_err())
}

fn step_ref<'a>(expr: &'a Expr, step: Step) -> Result<&'a Expr, ManipulatorError> {
    let next = match (step, &expr.kind) {
        (Step::AssertBody, ExprKind::Assert(assertion)) => Some(&*assertion.body),
        (Step::LetBody, ExprKind::Let(let_expr)) => Some(&*let_expr.body),
        (Step::LambdaBody, ExprKind::Lambda(lambda)) => Some(&*lambda.body),
        (Step::WithBody, ExprKind::With(with)) => Some(&*with.body),
        (Step::WithEnv, ExprKind::With(with)) => Some(&*with.environment),
        (Step::Paren, ExprKind::Paren(inner)) => Some(&**inner),
        (Step::ApplyArg, ExprKind::Apply(call)) => Some(&*call.argument),
        (Step::LetBinding(index), ExprKind::Let(let_expr)) => let_expr
            .bindings
            .get(index)
            .and_then(SetItem::as_binding)
            .map(|binding| &binding.value),
        (Step::SetBinding(index), ExprKind::AttrSet(set)) => set
            .values
            .get(index)
            .and_then(SetItem::as_binding)
            .map(|binding| &binding.value),
        _ => None,
    };
    next.ok_or_else(shape_err)
}

fn step_mut<'a>(expr: &'a mut Expr, step: Step) -> Result<&'a mut Expr, ManipulatorError> {
    let next = match (step, &mut expr.kind) {
        (Step::AssertBody, ExprKind::Assert(assertion)) => Some(&mut *assertion.body),
        (Step::LetBody, ExprKind::Let(let_expr)) => Some(&mut *let_expr.body),
        (Step::LambdaBody, ExprKind::Lambda(lambda)) => Some(&mut *lambda.body),
        (Step::WithBody, ExprKind::With(with)) => Some(&mut *with.body),
        (Step::WithEnv, ExprKind::With(with)) => Some(&mut *with.environment),
        (Step::Paren, ExprKind::Paren(inner)) => Some(&mut **inner),
        (Step::ApplyArg, ExprKind::Apply(call)) => Some(&mut *call.argument),
        (Step::LetBinding(index), ExprKind::Let(let_expr)) => let_expr
            .bindings
            .get_mut(index)
            .and_then(SetItem::as_binding_mut)
            .map(|binding| &mut binding.value),
        (Step::SetBinding(index), ExprKind::AttrSet(set)) => set
            .values
            .get_mut(index)
            .and_then(SetItem::as_binding_mut)
            .map(|binding| &mut binding.value),
        _ => None,
    };
    next.ok_or_else(shape_err)
}

fn target_ref<'a>(root: &'a Expr, path: &[Step]) -> Result<&'a Expr, ManipulatorError> {
    let mut current = root;
    for step in path {
        current = step_ref(current, *step)?;
    }
    Ok(current)
}

fn target_mut<'a>(root: &'a mut Expr, path: &[Step]) -> Result<&'a mut Expr, ManipulatorError> {
    let mut current = root;
    for step in path {
        current = step_mut(current, *step)?;
    }
    Ok(current)
}

fn target_set_mut(root: &mut Expr) -> Result<&mut AttributeSet, ManipulatorError> {
    let path = find_target_path(root)?;
    let target = target_mut(root, &path)?;
    target.as_attr_set_mut().ok_or_else(shape_err)
}

// ---------------------------------------------------------------------------
// Assignment with identifier write-through

/// When the binding addressed by `segments` currently holds a bare
/// identifier, assignment follows the reference to the defining binding
/// (innermost scope layer first, then a sibling binding) and writes there.
fn set_in_set(
    set: &mut AttributeSet,
    segments: &[String],
    value: Expr,
) -> Result<(), ManipulatorError> {
    let referenced = set.values.iter().find_map(|item| match item {
        SetItem::Binding(binding) if binding.path == segments => match &binding.value.kind {
            ExprKind::Identifier(name) => Some(name.clone()),
            _ => None,
        },
        _ => None,
    });

    if let Some(name) = referenced {
        for layer in set.scope_stack.iter_mut().rev() {
            if let Some(binding) = layer
                .bindings
                .iter_mut()
                .filter_map(SetItem::as_binding_mut)
                .find(|binding| binding.path.len() == 1 && binding.name() == name)
            {
                debug!("assignment follows identifier {name} into a scope layer");
                binding.value = value;
                return Ok(());
            }
        }
        if segments.len() == 1 && segments[0] != name {
            if let Some(binding) = set
                .values
                .iter_mut()
                .filter_map(SetItem::as_binding_mut)
                .find(|binding| binding.path.len() == 1 && binding.name() == name)
            {
                debug!("assignment follows identifier {name} to a sibling binding");
                binding.value = value;
                return Ok(());
            }
        }
    }

    set.set_path(segments, value)
}

// ---------------------------------------------------------------------------
// Public edit operations

fn parse_value(value_source: &str) -> Result<Expr, ManipulatorError> {
    let parsed = crate::parse(value_source)?;
    parsed.expr.ok_or_else(|| ManipulatorError::Parse {
        message: "value contains no expression".to_string(),
        line: 1,
        column: 1,
    })
}

/// Set `path_spec` to the expression parsed from `value_source` and return
/// the rebuilt document.
pub fn set_value(
    source: &mut SourceFile,
    path_spec: &str,
    value_source: &str,
) -> Result<String, ManipulatorError> {
    let value = parse_value(value_source)?;
    let (depth, npath) = split_scope_prefix(path_spec)?;
    let segments = format_npath_segments(npath)?;

    let root = source
        .expr
        .as_mut()
        .ok_or_else(|| ManipulatorError::Shape("source contains no expression".to_string()))?;
    let set = target_set_mut(root)?;

    if depth > 0 {
        if set.scope_stack.is_empty() && depth == 1 {
            // Editing an existing binding through `@` does not create a
            // scope; the innermost scope is only auto-created for new names.
            if set.has_concrete_path(&segments) {
                set_in_set(set, &segments, value)?;
                return Ok(source.rebuild());
            }
            debug!("creating the innermost scope layer");
            set.scope_stack.push(ScopeLayer::new());
        }
        if depth > set.scope_stack.len() {
            return Err(ManipulatorError::ScopeMissing(depth));
        }
        let index = set.scope_stack.len() - depth;
        let mut layer_set = AttributeSet::new(std::mem::take(&mut set.scope_stack[index].bindings));
        layer_set.multiline = Multiline::On;
        let result = layer_set.set_path(&segments, value);
        set.scope_stack[index].bindings = layer_set.values;
        result?;
        return Ok(source.rebuild());
    }

    set_in_set(set, &segments, value)?;
    Ok(source.rebuild())
}

/// Remove `path_spec` and return the rebuilt document. Scope layers left
/// empty by the removal are pruned.
pub fn remove_value(
    source: &mut SourceFile,
    path_spec: &str,
) -> Result<String, ManipulatorError> {
    let (depth, npath) = split_scope_prefix(path_spec)?;
    let segments = format_npath_segments(npath)?;

    let root = source
        .expr
        .as_mut()
        .ok_or_else(|| ManipulatorError::Shape("source contains no expression".to_string()))?;
    let set = target_set_mut(root)?;

    if depth > 0 {
        if depth > set.scope_stack.len() {
            return Err(ManipulatorError::ScopeMissing(depth));
        }
        let index = set.scope_stack.len() - depth;
        let mut layer_set = AttributeSet::new(std::mem::take(&mut set.scope_stack[index].bindings));
        layer_set.multiline = Multiline::On;
        let result = layer_set.remove_path(&segments);
        set.scope_stack[index].bindings = layer_set.values;
        result?;
        if set.scope_stack[index].bindings.is_empty() {
            debug!("pruning empty scope layer {index}");
            set.scope_stack.remove(index);
        }
        return Ok(source.rebuild());
    }

    set.remove_path(&segments)?;
    Ok(source.rebuild())
}

// ---------------------------------------------------------------------------
// Mapping-style access on the document root

impl SourceFile {
    fn target_set(&self) -> Result<&AttributeSet, ManipulatorError> {
        let root = self
            .expr
            .as_ref()
            .ok_or_else(|| ManipulatorError::Shape("source contains no expression".to_string()))?;
        let path = find_target_path(root)?;
        let target = target_ref(root, &path)?;
        target.as_attr_set().ok_or_else(shape_err)
    }

    fn target_set_mut(&mut self) -> Result<&mut AttributeSet, ManipulatorError> {
        let root = self
            .expr
            .as_mut()
            .ok_or_else(|| ManipulatorError::Shape("source contains no expression".to_string()))?;
        target_set_mut(root)
    }

    /// Read a binding of the top-level attribute set. Returns a detached
    /// expression, as [`AttributeSet::get`] does.
    pub fn get(&self, key: &str) -> Result<Expr, ManipulatorError> {
        self.target_set()?.get(key)
    }

    /// Set a binding of the top-level attribute set.
    pub fn set(&mut self, key: &str, value: impl Into<Expr>) -> Result<(), ManipulatorError> {
        self.target_set_mut()?.set(key, value)
    }

    /// Remove a binding of the top-level attribute set.
    pub fn remove(&mut self, key: &str) -> Result<(), ManipulatorError> {
        self.target_set_mut()?.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::{format_npath_segments, parse_npath, split_scope_prefix};

    #[test]
    fn plain_paths_split_on_dots() {
        let segments = format_npath_segments("foo.bar").unwrap();
        assert_eq!(segments, vec!["foo", "bar"]);
    }

    #[test]
    fn hyphens_are_allowed_inside_identifiers() {
        let segments = format_npath_segments("foo-bar").unwrap();
        assert_eq!(segments, vec!["foo-bar"]);
    }

    #[test]
    fn quoted_segments_keep_dots_and_get_requoted() {
        let segments = format_npath_segments("foo.\"bar.baz\"").unwrap();
        assert_eq!(segments, vec!["foo", "\"bar.baz\""]);
    }

    #[test]
    fn scope_prefixes_are_counted() {
        assert_eq!(split_scope_prefix("@@a.b").unwrap(), (2, "a.b"));
        assert_eq!(split_scope_prefix("a").unwrap(), (0, "a"));
        assert!(split_scope_prefix("@@").is_err());
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(parse_npath("").is_err());
        assert!(parse_npath("foo..bar").is_err());
        assert!(parse_npath("foo.\"unterminated").is_err());
        assert!(parse_npath("-leading").is_err());
        assert!(parse_npath("foo\"bar\"").is_err());
    }
}
