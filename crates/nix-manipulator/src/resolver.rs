//! Identifier resolution across lexical scopes.
//!
//! The resolver rebuilds the scope chain from the document root on demand:
//! a reference is a (container, name) lookup rather than a stored pointer,
//! so the owning graph stays strictly tree-shaped. Lookup walks the chain
//! innermost-first through the target set's own bindings, `let` layers,
//! `rec` sets, inherits, `with` environments, and attribute-set call
//! arguments, then chases identifier chains with a visited set. Attrpath
//! bindings are visible under their root name: `foo.bar = 1;` resolves
//! `foo` to its nested-set equivalent.

use std::collections::HashSet;

use log::trace;

use crate::expr::{AttributeSet, Binding, Expr, ExprKind, SetItem, SourceFile};
use crate::ManipulatorError;

#[derive(Clone, Copy)]
enum Frame<'a> {
    Items(&'a [SetItem]),
    /// A `with` whose environment cannot be resolved without evaluation.
    /// Its names are unknown; lookup falls through.
    Unknown,
}

/// A lookup result: a reference into the document tree, or a nested-set
/// view synthesized for an attrpath root.
enum Found<'a> {
    Tree(&'a Expr),
    View(Expr),
}

/// Resolve `name` in the scope visible at the document's editable target
/// set. Returns a detached expression: bound values are cloned, and an
/// attrpath root yields its merged nested-set view. Deterministic for
/// acyclic programs.
pub fn resolve(source: &SourceFile, name: &str) -> Result<Expr, ManipulatorError> {
    let expr = source
        .expr
        .as_ref()
        .ok_or_else(|| ManipulatorError::Shape("source contains no expression".to_string()))?;
    resolve_at(expr, name)
}

/// Resolve `name` in the scope chain collected along the spine of `expr`.
pub fn resolve_at(expr: &Expr, name: &str) -> Result<Expr, ManipulatorError> {
    let mut frames: Vec<Frame<'_>> = Vec::new();
    collect_frames(expr, &mut frames, 0);
    trace!("resolving {name} across {} scope frames", frames.len());
    match lookup_impl(&frames, name, true)? {
        Found::Tree(found) => Ok(found.clone()),
        Found::View(found) => Ok(found),
    }
}

/// Reference-only lookup used while frames are still being built. Attrpath
/// roots have no backing node to borrow, so they resolve to an error here.
fn lookup_ref<'a>(frames: &[Frame<'a>], name: &str) -> Result<&'a Expr, ManipulatorError> {
    match lookup_impl(frames, name, false)? {
        Found::Tree(found) => Ok(found),
        Found::View(_) => Err(ManipulatorError::UnboundIdentifier(name.to_string())),
    }
}

const SPINE_DEPTH_LIMIT: usize = 128;

/// Collect scope frames along the spine, outermost first.
fn collect_frames<'a>(expr: &'a Expr, frames: &mut Vec<Frame<'a>>, depth: usize) {
    if depth >= SPINE_DEPTH_LIMIT {
        return;
    }
    match &expr.kind {
        ExprKind::Assert(assertion) => collect_frames(&assertion.body, frames, depth + 1),
        ExprKind::Paren(inner) => collect_frames(inner, frames, depth + 1),
        ExprKind::Lambda(lambda) => collect_frames(&lambda.body, frames, depth + 1),
        ExprKind::Let(let_expr) => {
            frames.push(Frame::Items(&let_expr.bindings));
            collect_frames(&let_expr.body, frames, depth + 1);
        }
        ExprKind::With(with) => {
            let frame = with_frame(&with.environment, frames.as_slice());
            frames.push(frame);
            collect_frames(&with.body, frames, depth + 1);
        }
        ExprKind::Apply(call) => {
            // The callee sees an attribute-set literal argument in scope.
            let mut argument: &Expr = &call.argument;
            while let ExprKind::Paren(inner) = &argument.kind {
                argument = inner;
            }
            if let ExprKind::AttrSet(set) = &argument.kind {
                for layer in &set.scope_stack {
                    frames.push(Frame::Items(&layer.bindings));
                }
                frames.push(Frame::Items(&set.values));
            }
        }
        ExprKind::AttrSet(set) => {
            for layer in &set.scope_stack {
                frames.push(Frame::Items(&layer.bindings));
            }
            frames.push(Frame::Items(&set.values));
        }
        ExprKind::Identifier(name) => {
            // Follow the spine through an identifier when it resolves to
            // something with scopes of its own.
            if let Ok(resolved) = lookup_ref(frames.as_slice(), name) {
                if let ExprKind::AttrSet(set) = &resolved.kind {
                    for layer in &set.scope_stack {
                        frames.push(Frame::Items(&layer.bindings));
                    }
                    frames.push(Frame::Items(&set.values));
                }
            }
        }
        _ => {}
    }
}

/// A `with` environment extends the chain only when it is an attribute-set
/// literal or an identifier pointing at one reachable without evaluation.
fn with_frame<'a>(environment: &'a Expr, outer: &[Frame<'a>]) -> Frame<'a> {
    let mut env: &Expr = environment;
    while let ExprKind::Paren(inner) = &env.kind {
        env = inner;
    }
    match &env.kind {
        ExprKind::AttrSet(set) => Frame::Items(&set.values),
        ExprKind::Identifier(name) => match lookup_ref(outer, name) {
            Ok(resolved) => match &resolved.kind {
                ExprKind::AttrSet(set) => Frame::Items(&set.values),
                _ => Frame::Unknown,
            },
            Err(_) => Frame::Unknown,
        },
        _ => Frame::Unknown,
    }
}

enum ItemHit<'a> {
    Value(&'a Expr),
    /// Attrpath bindings sharing the looked-up root name.
    Root(Vec<&'a Binding>),
    InheritFrom(&'a Expr),
    InheritOuter,
}

fn find_in_items<'a>(items: &'a [SetItem], name: &str) -> Option<ItemHit<'a>> {
    let mut roots: Vec<&'a Binding> = Vec::new();
    for item in items {
        match item {
            SetItem::Binding(binding) => {
                if binding.path.len() == 1 && binding.name() == name {
                    return Some(ItemHit::Value(&binding.value));
                }
                if binding.nested() && binding.name() == name {
                    roots.push(binding);
                }
            }
            SetItem::Inherit(inherit) => {
                if inherit.contains(name) {
                    return Some(match &inherit.from_expr {
                        Some(from) => ItemHit::InheritFrom(from),
                        None => ItemHit::InheritOuter,
                    });
                }
            }
        }
    }
    if roots.is_empty() {
        None
    } else {
        Some(ItemHit::Root(roots))
    }
}

/// Merge attrpath bindings under one root into their nested-set view,
/// root segment stripped.
fn synthesize_root(roots: &[&Binding]) -> Expr {
    let values = roots
        .iter()
        .map(|binding| {
            SetItem::Binding(Binding::with_path(
                binding.path[1..].to_vec(),
                binding.value.clone(),
            ))
        })
        .collect();
    Expr::new(ExprKind::AttrSet(AttributeSet::new(values)))
}

fn lookup_impl<'a>(
    frames: &[Frame<'a>],
    name: &str,
    allow_roots: bool,
) -> Result<Found<'a>, ManipulatorError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = name.to_string();

    'chase: loop {
        if !visited.insert(current.clone()) {
            return Err(ManipulatorError::ResolutionCycle(current));
        }

        let mut found: Option<Found<'a>> = None;
        let mut start = frames.len();
        'frames: while start > 0 {
            start -= 1;
            match frames[start] {
                Frame::Unknown => continue 'frames,
                Frame::Items(items) => match find_in_items(items, &current) {
                    None => continue 'frames,
                    Some(ItemHit::Value(expr)) => {
                        found = Some(Found::Tree(expr));
                        break 'frames;
                    }
                    Some(ItemHit::Root(roots)) => {
                        if !allow_roots {
                            return Err(ManipulatorError::UnboundIdentifier(current));
                        }
                        found = Some(Found::View(synthesize_root(&roots)));
                        break 'frames;
                    }
                    Some(ItemHit::InheritOuter) => {
                        // `inherit x;` imports `x` from the enclosing
                        // scope: keep searching outward.
                        continue 'frames;
                    }
                    Some(ItemHit::InheritFrom(from)) => {
                        found = Some(resolve_attr_of(frames, start, from, &current, allow_roots)?);
                        break 'frames;
                    }
                },
            }
        }

        match found {
            Some(Found::Tree(expr)) => {
                if let ExprKind::Identifier(next) = &expr.kind {
                    current = next.clone();
                    continue 'chase;
                }
                return Ok(Found::Tree(expr));
            }
            Some(view) => return Ok(view),
            None => return Err(ManipulatorError::UnboundIdentifier(current)),
        }
    }
}

fn attr_of_set<'a>(
    set: &'a AttributeSet,
    name: &str,
    allow_roots: bool,
) -> Result<Found<'a>, ManipulatorError> {
    match find_in_items(&set.values, name) {
        Some(ItemHit::Value(expr)) => Ok(Found::Tree(expr)),
        Some(ItemHit::Root(roots)) if allow_roots => Ok(Found::View(synthesize_root(&roots))),
        _ => Err(ManipulatorError::UnboundIdentifier(name.to_string())),
    }
}

/// Resolve `name` out of the source expression of `inherit (source) name;`.
fn resolve_attr_of<'a>(
    frames: &[Frame<'a>],
    frame_index: usize,
    from: &'a Expr,
    name: &str,
    allow_roots: bool,
) -> Result<Found<'a>, ManipulatorError> {
    let mut source: &'a Expr = from;
    while let ExprKind::Paren(inner) = &source.kind {
        source = inner;
    }
    if let ExprKind::Identifier(source_name) = &source.kind {
        match lookup_impl(&frames[..frame_index], source_name, allow_roots)? {
            Found::Tree(resolved) => source = resolved,
            Found::View(view) => {
                // The source set only exists as a synthesized view; pull
                // the attribute out of it by value.
                if let ExprKind::AttrSet(set) = &view.kind {
                    return match attr_of_set(set, name, allow_roots)? {
                        Found::Tree(expr) => Ok(Found::View(expr.clone())),
                        Found::View(owned) => Ok(Found::View(owned)),
                    };
                }
                return Err(ManipulatorError::UnboundIdentifier(name.to_string()));
            }
        }
    }
    match &source.kind {
        ExprKind::AttrSet(set) => attr_of_set(set, name, allow_roots),
        _ => Err(ManipulatorError::UnboundIdentifier(name.to_string())),
    }
}
