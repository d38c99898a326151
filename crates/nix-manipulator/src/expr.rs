//! The typed, mutable document model.
//!
//! Every expression is an [`Expr`]: a closed kind union plus the two trivia
//! sequences it owns. Mutation edits nodes in place and leaves their trivia
//! attached; rebuilding lives in [`crate::render`].

use serde::Serialize;

use crate::trivia::Trivia;

/// Layout tri-state for containers. Lowering pins `On`/`Off` from the
/// source so round-trips are deterministic; `Auto` lets the renderer pick
/// from content for programmatically built nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Multiline {
    Auto,
    On,
    Off,
}

impl Multiline {
    pub fn from_source(is_multiline: bool) -> Self {
        if is_multiline {
            Multiline::On
        } else {
            Multiline::Off
        }
    }
}

impl Default for Multiline {
    fn default() -> Self {
        Multiline::Auto
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub before: Vec<Trivia>,
    pub after: Vec<Trivia>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            before: Vec::new(),
            after: Vec::new(),
            kind,
        }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::new(ExprKind::Identifier(name.into()))
    }

    pub fn null() -> Self {
        Expr::new(ExprKind::Primitive(Primitive::Null))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::new(ExprKind::Primitive(Primitive::String {
            value: value.into(),
            raw: false,
        }))
    }

    pub fn as_attr_set(&self) -> Option<&AttributeSet> {
        match &self.kind {
            ExprKind::AttrSet(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_attr_set_mut(&mut self) -> Option<&mut AttributeSet> {
        match &mut self.kind {
            ExprKind::AttrSet(set) => Some(set),
            _ => None,
        }
    }
}

/// Closed union of expression variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Primitive(Primitive),
    Identifier(String),
    /// Filesystem path, home path, search path or URI, rendered verbatim.
    Path(String),
    List(NixList),
    AttrSet(AttributeSet),
    Let(LetExpression),
    With(WithStatement),
    If(IfExpression),
    Select(Select),
    Lambda(FunctionDefinition),
    Apply(FunctionCall),
    BinaryOp(BinaryExpression),
    UnaryOp(UnaryExpression),
    Assert(Assertion),
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Primitive {
    /// Double-quoted string. `raw` strings hold the source text between the
    /// quotes verbatim (escapes and interpolations included); constructed
    /// strings are escaped on rebuild.
    String { value: String, raw: bool },
    /// Two-single-quote indented string, inner text verbatim. Preserved if
    /// parsed, never synthesized.
    Indented { value: String },
    Int(i64),
    /// Float literals keep their source spelling.
    Float(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NixList {
    pub elements: Vec<Expr>,
    pub multiline: Multiline,
    /// Trivia inside the brackets of an otherwise empty list.
    pub inner_trivia: Vec<Trivia>,
}

impl NixList {
    pub fn new(elements: Vec<Expr>) -> Self {
        NixList {
            elements,
            multiline: Multiline::Auto,
            inner_trivia: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SetItem {
    Binding(Binding),
    Inherit(Inherit),
}

impl SetItem {
    pub fn as_binding(&self) -> Option<&Binding> {
        match self {
            SetItem::Binding(binding) => Some(binding),
            SetItem::Inherit(_) => None,
        }
    }

    pub fn as_binding_mut(&mut self) -> Option<&mut Binding> {
        match self {
            SetItem::Binding(binding) => Some(binding),
            SetItem::Inherit(_) => None,
        }
    }
}

/// A `name = value;` binding. The attrpath is kept as its formatted
/// segments: `foo.bar = 1;` has `path == ["foo", "bar"]`, and a quoted
/// segment keeps its quotes (`["foo", "\"x.y\""]`). `path.len() > 1` is the
/// attrpath form; it is never normalized to brace nesting or back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub path: Vec<String>,
    /// Verbatim attrpath source text, captured when the attrpath carries an
    /// interior comment (`foo. # c` followed by `bar = 1;`). The rebuilder
    /// emits it as long as it still agrees with `path` and drops it (with a
    /// diagnostic) once the segments have been edited.
    pub raw_path: Option<String>,
    pub value: Expr,
    /// The value sits on its own line after `=`.
    pub value_on_newline: bool,
    pub before: Vec<Trivia>,
    pub after: Vec<Trivia>,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: Expr) -> Self {
        Binding {
            path: vec![name.into()],
            raw_path: None,
            value,
            value_on_newline: false,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn with_path(path: Vec<String>, value: Expr) -> Self {
        Binding {
            path,
            raw_path: None,
            value,
            value_on_newline: false,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// First attrpath segment; the key the mapping layer matches on.
    pub fn name(&self) -> &str {
        &self.path[0]
    }

    /// True for attrpath-form bindings (`a.b = …;`).
    pub fn nested(&self) -> bool {
        self.path.len() > 1
    }
}

/// `inherit a b;` or `inherit (expr) a b;`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inherit {
    pub names: Vec<String>,
    pub from_expr: Option<Box<Expr>>,
    pub before: Vec<Trivia>,
    pub after: Vec<Trivia>,
}

impl Inherit {
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// One `let … in` layer wrapped around an attribute set when rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeLayer {
    pub bindings: Vec<SetItem>,
    /// Trivia between this layer's `in` and whatever follows it (the next
    /// layer's `let`, or the attribute set itself).
    pub body_before: Vec<Trivia>,
}

impl ScopeLayer {
    pub fn new() -> Self {
        ScopeLayer {
            bindings: Vec::new(),
            body_before: Vec::new(),
        }
    }
}

impl Default for ScopeLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSet {
    pub values: Vec<SetItem>,
    pub recursive: bool,
    pub multiline: Multiline,
    /// Trivia inside the braces of an otherwise empty set.
    pub inner_trivia: Vec<Trivia>,
    /// `let … in` layers around this set, outermost first. Empty layers are
    /// forbidden at render time; the edit layer prunes them.
    pub scope_stack: Vec<ScopeLayer>,
}

impl AttributeSet {
    pub fn new(values: Vec<SetItem>) -> Self {
        AttributeSet {
            values,
            recursive: false,
            multiline: Multiline::Auto,
            inner_trivia: Vec::new(),
            scope_stack: Vec::new(),
        }
    }

    /// Build a set from key/value pairs, in order.
    pub fn from_pairs(pairs: Vec<(String, Expr)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(name, value)| SetItem::Binding(Binding::new(name, value)))
            .collect();
        AttributeSet::new(values)
    }

    /// The innermost `let … in` layer wrapping this set, if any.
    pub fn scope(&self) -> Option<&ScopeLayer> {
        self.scope_stack.last()
    }

    pub fn scope_mut(&mut self) -> Option<&mut ScopeLayer> {
        self.scope_stack.last_mut()
    }
}

/// `let bindings in body` that did not fold into a scope stack (inline
/// lets and lets whose body is not an attribute set).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetExpression {
    pub bindings: Vec<SetItem>,
    pub body: Box<Expr>,
    pub multiline: Multiline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithStatement {
    pub environment: Box<Expr>,
    pub body: Box<Expr>,
    pub body_on_newline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IfExpression {
    pub condition: Box<Expr>,
    pub consequence: Box<Expr>,
    pub alternative: Box<Expr>,
    pub multiline: Multiline,
}

/// `expr.attrpath` with an optional `or` default. The attrpath keeps its
/// source spelling (it may be compound or quoted).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Select {
    pub expression: Box<Expr>,
    pub attrpath: String,
    pub default: Option<Box<Expr>>,
}

/// Lambda parameter: a plain identifier or a formals set, optionally bound
/// with an `@`-pattern on either side. An ellipsis is a formal whose name
/// is `...`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Param {
    Identifier(String),
    Formals {
        formals: Vec<Formal>,
        multiline: Multiline,
        /// `args@{ … }` (binding before formals) or `{ … }@args`.
        binding: Option<FormalsBinding>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormalsBinding {
    pub name: String,
    pub before_formals: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formal {
    pub name: String,
    pub default: Option<Expr>,
    pub before: Vec<Trivia>,
    pub after: Vec<Trivia>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub param: Param,
    pub body: Box<Expr>,
    pub body_on_newline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub function: Box<Expr>,
    pub argument: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryExpression {
    pub left: Box<Expr>,
    pub operator: String,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnaryExpression {
    pub operator: String,
    pub operand: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assertion {
    pub condition: Box<Expr>,
    pub body: Box<Expr>,
    pub body_on_newline: bool,
}

/// A whole source file: at most one top-level expression plus the trivia
/// after it. File-leading trivia lives on the expression's `before`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub expr: Option<Expr>,
    pub trailing: Vec<Trivia>,
}

impl SourceFile {
    pub fn empty() -> Self {
        SourceFile {
            expr: None,
            trailing: Vec::new(),
        }
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::string(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::string(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::new(ExprKind::Primitive(Primitive::Bool(value)))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::new(ExprKind::Primitive(Primitive::Int(value)))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::from(i64::from(value))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        let text = if value.fract() == 0.0 && value.is_finite() {
            format!("{value:.1}")
        } else {
            value.to_string()
        };
        Expr::new(ExprKind::Primitive(Primitive::Float(text)))
    }
}

impl From<Vec<(String, Expr)>> for Expr {
    fn from(pairs: Vec<(String, Expr)>) -> Self {
        Expr::new(ExprKind::AttrSet(AttributeSet::from_pairs(pairs)))
    }
}
