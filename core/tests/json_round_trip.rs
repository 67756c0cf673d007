//! Integration test for §8 scenario (e): `from_json(to_json(A))` reproduces
//! `A` byte-for-byte through a second `to_json` pass.

use pscal_core::json_ast::{from_json, to_json};
use pscal_core::{compile, Ast};

fn round_trips(src: &str) {
    let compiled = compile(src).unwrap();
    let original = to_json(&compiled.ast, compiled.root);

    let mut reloaded_ast = Ast::new();
    let reloaded_root = from_json(&mut reloaded_ast, &original).unwrap();
    let reloaded = to_json(&reloaded_ast, reloaded_root);

    assert_eq!(original, reloaded);
}

#[test]
fn hello_world_round_trips() {
    round_trips("program Hi; begin writeln('hello, world') end.");
}

#[test]
fn enum_and_assignment_round_trips() {
    round_trips(
        "program Hi; type color = (red, green, blue); var c: color; begin c := green end.",
    );
}

#[test]
fn procedure_with_params_round_trips() {
    round_trips(
        "program Hi; procedure Add(a, b: integer); begin end; begin Add(1, 2) end.",
    );
}
