//! Parse-then-rebuild fidelity over representative sources.

use nix_manipulator::parse;

/// Inputs that must survive a parse/rebuild cycle byte-for-byte.
const ROUNDTRIP_CORPUS: &[&str] = &[
    "{ version = \"0.1.0\"; }",
    "{ }",
    "{\n  foo = 1;\n  bar = 2;\n}\n",
    "{\n  a = 1;\n\n  b = 2;\n}\n",
    "{\n  # leading comment\n  foo = 1; # trailing\n  bar = 2;\n}\n",
    "{\n  a = 1;\n\n  # section\n  b = 2;\n}\n",
    "{\n  # note\n}\n",
    "{\n\n}\n",
    "{ foo.bar = 1; }",
    "{ foo = { \"bar.baz\" = 1; }; }",
    "{\n  foo.bar.baz = 1;\n  foo.qux = 2;\n}\n",
    "{\n  foo. # c\n  bar = 1;\n}\n",
    "let\n  bar = 2;\nin\n{ foo = 1; }\n",
    "let\n  a = 1;\nin\nlet\n  b = 2;\nin\n{ c = a + b; }\n",
    "let\n  inherit ({ foo = 1; }) foo;\nin\n{ x = foo; }\n",
    "rec {\n  a = 1;\n  b = a;\n}\n",
    "{\n  inherit lib pkgs;\n  inherit (pkgs) stdenv fetchurl;\n}\n",
    "{ pkgs }: { foo = pkgs; }",
    "{ pkgs }:\n\n{\n  foo = 1;\n}\n",
    "{\n  pkgs,\n  lib,\n  ...\n}:\npkgs.mkShell { }\n",
    "args@{ pkgs, ... }: { inherit args; }",
    "{ pkgs ? import <nixpkgs> { } }: pkgs",
    "with pkgs; [ foo bar ]",
    "with pkgs;\n{\n  x = 1;\n}\n",
    "assert x != null; { y = x; }",
    "{ x = if a then 1 else 2; }",
    "{ x = a.b or 1; }",
    "{ x = -1; }",
    "{ x = !flag; }",
    "{ x = a ? b; }",
    "{ src = ./foo.nix; }",
    "{ pi = 3.14; }",
    "{ url = \"https://${host}/index.html\"; }",
    "{\n  script = ''\n    echo hi\n  '';\n}\n",
    "{ xs = [ ]; }",
    "{\n  xs = [\n    a\n    b\n  ];\n}\n",
    "{\n  foo =\n    1;\n}\n",
    "{ x = (a + b); }",
    "{ foo = 1; } # done\n",
    "# header\n\n{ foo = 1; }\n",
    "#!/usr/bin/env nix\n{ foo = 1; }\n",
    "{\n  /* block\n     comment */\n  foo = 1;\n}\n",
    "{ f = x: x; }",
    "{ g = { a, b }: a; }",
];

#[test]
fn corpus_roundtrips_byte_for_byte() {
    for source in ROUNDTRIP_CORPUS {
        let parsed =
            parse(source).unwrap_or_else(|err| panic!("parse failed for {source:?}: {err}"));
        assert_eq!(&parsed.rebuild(), source, "round-trip mismatch for {source:?}");
    }
}

#[test]
fn rebuild_is_idempotent() {
    for source in ROUNDTRIP_CORPUS {
        let first = parse(source).unwrap().rebuild();
        let second = parse(&first)
            .unwrap_or_else(|err| panic!("reparse failed for {first:?}: {err}"))
            .rebuild();
        assert_eq!(second, first, "rebuild not idempotent for {source:?}");
    }
}

#[test]
fn package_file_roundtrips() {
    let source = "{\n  lib,\n  stdenv,\n  fetchFromGitHub,\n  ...\n}:\n\nstdenv.mkDerivation rec {\n  pname = \"example\";\n  version = \"1.2.3\";\n\n  src = fetchFromGitHub {\n    owner = \"example\";\n    repo = \"example\";\n    rev = \"v${version}\";\n    hash = \"sha256-AAAA\";\n  };\n\n  # Upstream ships no tests.\n  doCheck = false;\n\n  meta = {\n    description = \"An example package\";\n    homepage = \"https://example.org\";\n    license = lib.licenses.mit;\n    maintainers = [ ];\n  };\n}\n";
    let parsed = parse(source).unwrap();
    assert_eq!(parsed.rebuild(), source);
}

#[test]
fn invalid_syntax_is_rejected_with_position() {
    let err = parse("{ foo = ; }").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("parse error"), "unexpected error: {message}");
}

#[test]
fn empty_input_parses_to_an_empty_document() {
    let source = parse("").unwrap();
    assert!(source.expr.is_none());
    assert_eq!(source.rebuild(), "");
}

#[test]
fn parse_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.nix");
    std::fs::write(&path, "{ foo = 1; }\n").unwrap();
    let source = nix_manipulator::parse_file(&path).unwrap();
    assert_eq!(source.rebuild(), "{ foo = 1; }\n");
}
