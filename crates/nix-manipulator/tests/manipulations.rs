//! Edit-API behavior: dotted paths, attrpath style preservation, scope
//! selectors, and error signaling.

use nix_manipulator::{parse, remove_value, set_value, ManipulatorError};

fn edited(source: &str, npath: &str, value: &str) -> String {
    let mut parsed = parse(source).unwrap();
    set_value(&mut parsed, npath, value).unwrap()
}

fn removed(source: &str, npath: &str) -> String {
    let mut parsed = parse(source).unwrap();
    remove_value(&mut parsed, npath).unwrap()
}

#[test]
fn replaces_a_top_level_value() {
    assert_eq!(
        edited("{ version = \"0.1.0\"; }", "version", "\"1.2.3\""),
        "{ version = \"1.2.3\"; }"
    );
}

#[test]
fn replacement_touches_nothing_else() {
    let source = "{\n  keep = [ 1 2 ]; # pinned\n  version = \"0.1.0\";\n}\n";
    assert_eq!(
        edited(source, "version", "\"1.2.3\""),
        "{\n  keep = [ 1 2 ]; # pinned\n  version = \"1.2.3\";\n}\n"
    );
}

#[test]
fn appends_a_new_binding_at_the_end() {
    assert_eq!(
        edited("{\n  a = 1;\n}\n", "b", "2"),
        "{\n  a = 1;\n  b = 2;\n}\n"
    );
}

#[test]
fn scope_assignment_creates_the_innermost_layer() {
    assert_eq!(
        edited("{ foo = 1; }", "@bar", "2"),
        "let\n  bar = 2;\nin\n{ foo = 1; }\n"
    );
}

#[test]
fn removing_the_last_scope_binding_prunes_the_wrapper() {
    assert_eq!(
        removed("let\n  bar = 2;\nin\n{ foo = 1; }\n", "@bar"),
        "{ foo = 1; }\n"
    );
}

#[test]
fn quoted_segments_reach_quoted_attr_names() {
    assert_eq!(
        edited("{ foo = { \"bar.baz\" = 1; }; }", "foo.\"bar.baz\"", "2"),
        "{ foo = { \"bar.baz\" = 2; }; }"
    );
}

#[test]
fn outer_scope_layers_are_addressed_by_extra_ats() {
    assert_eq!(
        edited(
            "let\n  a = 1;\nin\nlet\n  b = 2;\nin\n{ c = a + b; }\n",
            "@@a",
            "10"
        ),
        "let\n  a = 10;\nin\nlet\n  b = 2;\nin\n{ c = a + b; }\n"
    );
}

#[test]
fn attrpath_style_is_preserved_when_extending() {
    assert_eq!(
        edited("{ foo.bar = 1; }", "foo.baz", "2"),
        "{ foo.bar = 1; foo.baz = 2; }"
    );
}

#[test]
fn attrpath_extension_stays_multiline_in_multiline_sets() {
    assert_eq!(
        edited("{\n  foo.bar = 1;\n}\n", "foo.baz", "2"),
        "{\n  foo.bar = 1;\n  foo.baz = 2;\n}\n"
    );
}

#[test]
fn attrpath_interior_comments_survive_value_edits() {
    assert_eq!(
        edited("{\n  foo. # c\n  bar = 1;\n}\n", "foo.bar", "2"),
        "{\n  foo. # c\n  bar = 2;\n}\n"
    );
}

#[test]
fn nested_paths_update_brace_nested_sets() {
    assert_eq!(
        edited("{ foo = { bar = 1; }; }", "foo.bar", "2"),
        "{ foo = { bar = 2; }; }"
    );
}

#[test]
fn missing_intermediate_sets_are_created_in_brace_style() {
    assert_eq!(edited("{ }", "foo.bar", "1"), "{ foo = { bar = 1; }; }");
}

#[test]
fn explicit_attrpath_leaves_win_over_nested_branches() {
    assert_eq!(
        edited("{ a.b.c = 1; a.b = { d = 2; }; }", "a.b", "{ d = 3; }"),
        "{ a.b.c = 1; a.b = { d = 3; }; }"
    );
}

#[test]
fn edits_reach_through_function_shapes() {
    assert_eq!(
        edited("{ pkgs }:\n\n{\n  foo = 1;\n}\n", "foo", "2"),
        "{ pkgs }:\n\n{\n  foo = 2;\n}\n"
    );
}

#[test]
fn edits_reach_through_call_arguments() {
    assert_eq!(
        edited(
            "pkgs.mkShell {\n  packages = [ ];\n}\n",
            "packages",
            "[ pkgs.hello ]"
        ),
        "pkgs.mkShell {\n  packages = [ pkgs.hello ];\n}\n"
    );
}

#[test]
fn edits_follow_identifiers_through_with_bodies() {
    assert_eq!(
        edited("with { body = { foo = 1; }; };\nbody\n", "foo", "2"),
        "with { body = { foo = 2; }; };\nbody\n"
    );
}

#[test]
fn scope_selector_edits_an_existing_body_instead_of_wrapping() {
    assert_eq!(
        edited("with { body = { foo = 1; }; };\nbody\n", "@foo", "2"),
        "with { body = { foo = 2; }; };\nbody\n"
    );
}

#[test]
fn assignment_follows_an_identifier_to_its_scope_binding() {
    assert_eq!(
        edited(
            "let\n  v = \"0.1.0\";\nin\n{ version = v; }\n",
            "version",
            "\"1.2.3\""
        ),
        "let\n  v = \"1.2.3\";\nin\n{ version = v; }\n"
    );
}

#[test]
fn removing_nested_bindings_keeps_siblings() {
    assert_eq!(
        removed("{ foo = { bar = 1; baz = 2; }; }", "foo.bar"),
        "{ foo = { baz = 2; }; }"
    );
}

#[test]
fn removing_an_attrpath_leaf_removes_the_whole_line() {
    assert_eq!(
        removed("{\n  foo.bar = 1;\n  qux = 2;\n}\n", "foo.bar"),
        "{\n  qux = 2;\n}\n"
    );
}

#[test]
fn empty_values_are_rejected() {
    let mut source = parse("{ foo = 1; }").unwrap();
    let err = set_value(&mut source, "foo", "").unwrap_err();
    assert!(matches!(err, ManipulatorError::Parse { .. }));
}

#[test]
fn malformed_values_are_rejected() {
    let mut source = parse("{ foo = 1; }").unwrap();
    let err = set_value(&mut source, "foo", "{ a = 1; } }").unwrap_err();
    assert!(matches!(err, ManipulatorError::Parse { .. }));
}

#[test]
fn juxtaposed_sets_are_not_an_editable_document() {
    let mut source = parse("{ foo = 1; }\n{ bar = 2; }").unwrap();
    let err = set_value(&mut source, "foo", "2").unwrap_err();
    assert!(matches!(err, ManipulatorError::Shape(_)));
}

#[test]
fn removing_a_missing_key_fails() {
    let mut source = parse("{ foo = 1; }").unwrap();
    let err = remove_value(&mut source, "bar").unwrap_err();
    assert!(matches!(err, ManipulatorError::KeyMissing(_)));
}

#[test]
fn editing_an_empty_document_fails() {
    let mut source = parse("").unwrap();
    let err = remove_value(&mut source, "foo").unwrap_err();
    assert!(matches!(err, ManipulatorError::Shape(_)));
}

#[test]
fn traversing_a_non_attrset_value_fails() {
    let mut source = parse("{ foo = 1; }").unwrap();
    let err = set_value(&mut source, "foo.bar", "2").unwrap_err();
    assert!(matches!(err, ManipulatorError::AttrPathConflict(_)));
}

#[test]
fn overwriting_an_attrpath_root_fails() {
    let mut source = parse("{ foo.bar = 1; }").unwrap();
    let err = set_value(&mut source, "foo", "2").unwrap_err();
    assert!(matches!(err, ManipulatorError::AttrPathConflict(_)));
}

#[test]
fn assigning_under_a_longer_attrpath_fails() {
    let mut source = parse("{ a.b.c = 1; }").unwrap();
    let err = set_value(&mut source, "a.b", "2").unwrap_err();
    assert!(matches!(err, ManipulatorError::AttrPathConflict(_)));
}

#[test]
fn removing_an_attrpath_root_by_name_fails() {
    let mut source = parse("{ foo.bar = 1; }").unwrap();
    let err = remove_value(&mut source, "foo").unwrap_err();
    assert!(matches!(err, ManipulatorError::KeyMissing(_)));
}

#[test]
fn missing_outer_scopes_are_reported() {
    let mut source = parse("let\n  a = 1;\nin\n{ b = 2; }\n").unwrap();
    let err = set_value(&mut source, "@@@x", "1").unwrap_err();
    assert!(matches!(err, ManipulatorError::ScopeMissing(3)));
}

#[test]
fn invalid_segments_are_reported() {
    let mut source = parse("{ foo = 1; }").unwrap();
    for bad in ["", "foo..bar", "@", "1leading", "foo.\"open"] {
        let err = set_value(&mut source, bad, "1").unwrap_err();
        assert!(
            matches!(err, ManipulatorError::InvalidSegment(_)),
            "expected InvalidSegment for {bad:?}"
        );
    }
}

#[test]
fn mapping_access_on_the_document_root() {
    let mut source = parse("{ foo = 1; }").unwrap();
    assert_eq!(source.get("foo").unwrap().rebuild(), "1");
    source.set("bar", 2).unwrap();
    assert_eq!(source.rebuild(), "{ foo = 1; bar = 2; }");
    source.remove("foo").unwrap();
    assert_eq!(source.rebuild(), "{ bar = 2; }");
}
