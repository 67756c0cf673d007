//! Integration tests that expect `compile` to surface semantic errors.
//! Covers §8 scenario (d) and the undeclared-identifier/assignment-to-
//! constant diagnostics named in the error taxonomy.

use pscal_core::{compile, CompileError};

#[test]
fn undeclared_identifier_is_reported() {
    let err = compile("program Hi; begin y := 1 end.").unwrap_err();
    match err {
        CompileError::Semantic(with_source) => {
            assert_eq!(with_source.errors().len(), 1);
        }
        other => panic!("expected a semantic error, got {:?}", other),
    }
}

#[test]
fn assignment_to_a_constant_is_rejected() {
    let err = compile("program Hi; const N = 10; begin N := 20 end.").unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn procedure_pointer_param_type_mismatch_is_one_semantic_error() {
    let src = "
        program Hi;
        type P = procedure(x: integer);
        procedure Q(x: real);
        begin
        end;
        var f: P;
        begin
            f := @Q
        end.
    ";
    let err = compile(src).unwrap_err();
    match err {
        CompileError::Semantic(with_source) => {
            assert_eq!(with_source.errors().len(), 1);
            let message = with_source.errors()[0].to_string();
            assert!(
                message.contains("proc pointer param 1 type mismatch for 'Q' (expected INTEGER, got REAL)"),
                "unexpected diagnostic text: {}",
                message
            );
        }
        other => panic!("expected a semantic error, got {:?}", other),
    }
}

#[test]
fn procedure_pointer_param_passing_convention_mismatch_is_reported() {
    let src = "
        program Hi;
        type P = procedure(var x: integer);
        procedure Q(x: integer);
        begin
        end;
        var f: P;
        begin
            f := @Q
        end.
    ";
    let err = compile(src).unwrap_err();
    match err {
        CompileError::Semantic(with_source) => {
            assert_eq!(with_source.errors().len(), 1);
            let message = with_source.errors()[0].to_string();
            assert!(
                message.contains(
                    "proc pointer param 1 passing convention mismatch for 'Q' (expected VAR/OUT, got value)"
                ),
                "unexpected diagnostic text: {}",
                message
            );
        }
        other => panic!("expected a semantic error, got {:?}", other),
    }
}

#[test]
fn matching_procedure_pointer_signature_compiles_cleanly() {
    let src = "
        program Hi;
        type P = procedure(x: integer);
        procedure Q(x: integer);
        begin
        end;
        var f: P;
        begin
            f := @Q
        end.
    ";
    assert!(compile(src).is_ok());
}
