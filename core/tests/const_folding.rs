//! Integration test for §8 scenario (c): an array bound expressed in terms
//! of a `const` folds to literal `Number` nodes at parse time.

use pscal_core::{compile, AstKind};

#[test]
fn array_bound_folds_const_expression_to_literals() {
    let src = "
        program Hi;
        const N = 10;
        type A = array [1 .. N*2] of integer;
        var a: A;
        begin
        end.
    ";
    let compiled = compile(src).unwrap();

    let program = compiled.ast.node(compiled.root);
    let block = compiled.ast.node(program.right.unwrap());
    let decls = compiled.ast.node(block.children[0]);

    let type_decl = decls
        .children
        .iter()
        .map(|&c| compiled.ast.node(c))
        .find(|n| n.kind == AstKind::TypeDecl)
        .expect("type declaration for A");
    let array_type = compiled.ast.node(type_decl.right.unwrap());
    assert_eq!(array_type.kind, AstKind::ArrayType);

    let subrange = compiled.ast.node(array_type.children[0]);
    assert_eq!(subrange.kind, AstKind::Subrange);

    let low = compiled.ast.node(subrange.left.unwrap());
    let high = compiled.ast.node(subrange.right.unwrap());
    assert_eq!(low.kind, AstKind::Number);
    assert_eq!(low.i_val, 1);
    assert_eq!(high.kind, AstKind::Number);
    assert_eq!(high.i_val, 20);

    assert_eq!(
        compiled.ctx.const_table.get("n").and_then(|v| v.as_ordinal()),
        Some(10)
    );
}
