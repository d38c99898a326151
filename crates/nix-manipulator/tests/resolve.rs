//! Identifier resolution across lexical scopes.

use nix_manipulator::resolver::resolve;
use nix_manipulator::{parse, ManipulatorError};

#[test]
fn resolves_let_bindings() {
    let source = parse("let\n  a = 1;\nin\n{ b = a; }\n").unwrap();
    assert_eq!(resolve(&source, "a").unwrap().rebuild(), "1");
}

#[test]
fn resolution_is_deterministic() {
    let source = parse("let\n  a = 1;\nin\n{ b = a; }\n").unwrap();
    let first = resolve(&source, "a").unwrap().rebuild();
    let second = resolve(&source, "a").unwrap().rebuild();
    assert_eq!(first, second);
}

#[test]
fn inner_scopes_shadow_outer_ones() {
    let source = parse("let\n  a = 1;\nin\nlet\n  a = 2;\nin\n{ b = a; }\n").unwrap();
    assert_eq!(resolve(&source, "a").unwrap().rebuild(), "2");
}

#[test]
fn identifier_chains_are_followed() {
    let source = parse("let\n  a = 1;\n  b = a;\nin\n{ c = b; }\n").unwrap();
    assert_eq!(resolve(&source, "b").unwrap().rebuild(), "1");
}

#[test]
fn cycles_are_detected() {
    let source = parse("let\n  a = b;\n  b = a;\nin\n{ c = a; }\n").unwrap();
    let err = resolve(&source, "a").unwrap_err();
    assert!(matches!(err, ManipulatorError::ResolutionCycle(_)));
}

#[test]
fn unbound_names_are_reported() {
    let source = parse("let\n  a = 1;\nin\n{ b = a; }\n").unwrap();
    let err = resolve(&source, "zzz").unwrap_err();
    assert!(matches!(err, ManipulatorError::UnboundIdentifier(_)));
}

#[test]
fn rec_sets_bring_their_own_bindings_into_scope() {
    let source = parse("rec {\n  a = 1;\n  b = a;\n}\n").unwrap();
    assert_eq!(resolve(&source, "a").unwrap().rebuild(), "1");
}

#[test]
fn the_target_sets_bindings_are_visible_at_its_scope() {
    let source = parse("{\n  a = 1;\n  b = a;\n}\n").unwrap();
    assert_eq!(resolve(&source, "b").unwrap().rebuild(), "1");
}

#[test]
fn attrpath_roots_resolve_to_their_nested_view() {
    let source = parse("{ foo.bar = 1; x = foo; }").unwrap();
    assert_eq!(resolve(&source, "foo").unwrap().rebuild(), "{ bar = 1; }");
    assert_eq!(resolve(&source, "x").unwrap().rebuild(), "{ bar = 1; }");
}

#[test]
fn attrpath_roots_merge_all_their_bindings() {
    let source = parse("{\n  foo.bar = 1;\n  foo.baz = 2;\n}\n").unwrap();
    assert_eq!(
        resolve(&source, "foo").unwrap().rebuild(),
        "{\n  bar = 1;\n  baz = 2;\n}"
    );
}

#[test]
fn attrpath_roots_in_scope_layers_resolve() {
    let source = parse("let\n  cfg.a = 1;\nin\n{ x = cfg; }\n").unwrap();
    assert_eq!(resolve(&source, "cfg").unwrap().rebuild(), "{ a = 1; }");
}

#[test]
fn with_environments_extend_the_scope_when_literal() {
    let source = parse("with { x = 1; };\n{ y = x; }\n").unwrap();
    assert_eq!(resolve(&source, "x").unwrap().rebuild(), "1");
}

#[test]
fn with_environments_resolve_through_identifiers() {
    let source = parse("let\n  env = { x = 1; };\nin\nwith env; { y = x; }").unwrap();
    assert_eq!(resolve(&source, "x").unwrap().rebuild(), "1");
}

#[test]
fn unresolvable_with_environments_fall_through() {
    let source = parse("with pkgs;\n{ y = x; }\n").unwrap();
    let err = resolve(&source, "x").unwrap_err();
    assert!(matches!(err, ManipulatorError::UnboundIdentifier(_)));
}

#[test]
fn sourced_inherits_resolve_their_names() {
    let source = parse("let\n  inherit ({ foo = 1; }) foo;\nin\n{ x = foo; }\n").unwrap();
    assert_eq!(resolve(&source, "foo").unwrap().rebuild(), "1");
}

#[test]
fn plain_inherits_defer_to_the_outer_scope() {
    let source =
        parse("let\n  a = 1;\nin\nlet\n  inherit a;\nin\n{ x = a; }\n").unwrap();
    assert_eq!(resolve(&source, "a").unwrap().rebuild(), "1");
}

#[test]
fn call_arguments_are_visible_to_the_callee() {
    let source = parse("({ x }: x) { x = 1; }").unwrap();
    assert_eq!(resolve(&source, "x").unwrap().rebuild(), "1");
}
