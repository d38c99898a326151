//! Structural editing of Nix source code with formatting preservation.
//!
//! Parsing is delegated to the third-party `tree-sitter-nix` grammar; this
//! crate owns everything above it: a typed, mutable document model whose
//! `rebuild` reproduces the input byte-for-byte when nothing was edited,
//! mapping-style mutation of attribute sets and `let … in` scopes, and
//! identifier resolution across lexical scopes.

use std::fs;
use std::path::Path;

pub mod cst;
pub mod edit;
pub mod expr;
pub mod lower;
pub mod mapping;
pub mod render;
pub mod resolver;
pub mod trivia;

pub use edit::{remove_value, set_value};
pub use expr::{
    Assertion, AttributeSet, BinaryExpression, Binding, Expr, ExprKind, Formal, FormalsBinding,
    FunctionCall, FunctionDefinition, IfExpression, Inherit, LetExpression, Multiline, NixList,
    Param, Primitive, ScopeLayer, Select, SetItem, SourceFile, UnaryExpression, WithStatement,
};
pub use trivia::Trivia;

#[derive(Debug)]
pub enum ManipulatorError {
    Io(std::io::Error),
    /// Invalid Nix syntax in the input or in a provided value.
    Parse {
        message: String,
        line: usize,
        column: usize,
    },
    /// The top-level expression cannot be edited (not an attribute set or
    /// something resolving to one).
    Shape(String),
    KeyMissing(String),
    AttrPathConflict(String),
    InvalidSegment(String),
    /// An outer scope referenced with `@@…` does not exist.
    ScopeMissing(usize),
    UnboundIdentifier(String),
    ResolutionCycle(String),
    /// A trivia unit could not be attributed to an owner. Indicates a
    /// parser mismatch and is fatal.
    TriviaUnowned(String),
}

impl std::fmt::Display for ManipulatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManipulatorError::Io(err) => write!(f, "IO error: {err}"),
            ManipulatorError::Parse {
                message,
                line,
                column,
            } => {
                write!(f, "parse error at {line}:{column}: {message}")
            }
            ManipulatorError::Shape(msg) => write!(f, "unsupported document shape: {msg}"),
            ManipulatorError::KeyMissing(key) => write!(f, "binding not found: {key}"),
            ManipulatorError::AttrPathConflict(msg) => write!(f, "attrpath conflict: {msg}"),
            ManipulatorError::InvalidSegment(msg) => write!(f, "invalid path segment: {msg}"),
            ManipulatorError::ScopeMissing(depth) => {
                write!(f, "scope layer {depth} does not exist")
            }
            ManipulatorError::UnboundIdentifier(name) => {
                write!(f, "unbound identifier: {name}")
            }
            ManipulatorError::ResolutionCycle(name) => {
                write!(f, "identifier resolution cycle through: {name}")
            }
            ManipulatorError::TriviaUnowned(msg) => {
                write!(f, "trivia could not be attached: {msg}")
            }
        }
    }
}

impl std::error::Error for ManipulatorError {}

impl From<std::io::Error> for ManipulatorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Parse Nix source text into a mutable document.
pub fn parse(text: &str) -> Result<SourceFile, ManipulatorError> {
    let tree = cst::parse_tree(text)?;
    lower::lower_source(tree.root_node(), text.as_bytes())
}

/// Parse a Nix file from disk. The file is read fully into memory and
/// closed before this returns; the document owns all of its strings.
pub fn parse_file(path: &Path) -> Result<SourceFile, ManipulatorError> {
    let content = fs::read_to_string(path)?;
    parse(&content)
}
