//! Integration tests that expect `compile` to succeed and the resulting
//! AST to have the shape the annotator is supposed to produce. Covers §8
//! scenarios (a), (b), and (f).

use pscal_core::{compile, AstKind};

#[test]
fn hello_world_program_shape() {
    let compiled = compile("program Hi; begin writeln('hello, world') end.").unwrap();
    let program = compiled.ast.node(compiled.root);
    assert_eq!(program.kind, AstKind::Program);

    let name = compiled.ast.node(program.left.unwrap());
    assert_eq!(name.kind, AstKind::Variable);
    assert_eq!(name.token.as_ref().unwrap().lexeme, "hi");

    let block = compiled.ast.node(program.right.unwrap());
    assert_eq!(block.kind, AstKind::Block);
    let decls = compiled.ast.node(block.children[0]);
    assert_eq!(decls.kind, AstKind::Compound);
    assert!(decls.children.is_empty());

    let body = compiled.ast.node(block.children[1]);
    assert_eq!(body.kind, AstKind::Compound);
    assert_eq!(body.children.len(), 1);

    let writeln_stmt = compiled.ast.node(body.children[0]);
    assert_eq!(writeln_stmt.kind, AstKind::Writeln);
    let arg = compiled.ast.node(writeln_stmt.children[0]);
    assert_eq!(arg.kind, AstKind::StringLit);
    assert_eq!(arg.token.as_ref().unwrap().lexeme, "hello, world");
}

#[test]
fn enum_member_assignment_resolves_ordinal() {
    let compiled = compile(
        "program Hi; type color = (red, green, blue); var c: color; begin c := green end.",
    )
    .unwrap();

    let program = compiled.ast.node(compiled.root);
    let block = compiled.ast.node(program.right.unwrap());
    let body = compiled.ast.node(block.children[1]);
    let assign = compiled.ast.node(body.children[0]);
    assert_eq!(assign.kind, AstKind::Assign);

    let lhs = compiled.ast.node(assign.left.unwrap());
    assert_eq!(lhs.var_type, pscal_core::VarType::Enum);

    let rhs = compiled.ast.node(assign.right.unwrap());
    assert_eq!(rhs.var_type, pscal_core::VarType::Enum);
    assert_eq!(rhs.i_val, 1);

    assert!(compiled.ctx.global.lookup("red").is_some());
    assert!(compiled.ctx.global.lookup("green").is_some());
    assert!(compiled.ctx.global.lookup("blue").is_some());
}

#[test]
fn break_inside_while_loop_is_not_an_error() {
    let compiled = compile("program Hi; begin while true do begin break end end.").unwrap();
    let program = compiled.ast.node(compiled.root);
    let block = compiled.ast.node(program.right.unwrap());
    let body = compiled.ast.node(block.children[1]);
    let while_stmt = compiled.ast.node(body.children[0]);
    assert_eq!(while_stmt.kind, AstKind::While);

    let loop_body = compiled.ast.node(while_stmt.right.unwrap());
    assert_eq!(loop_body.kind, AstKind::Compound);
    let break_stmt = compiled.ast.node(loop_body.children[0]);
    assert_eq!(break_stmt.kind, AstKind::Break);
}

#[test]
fn case_statement_normalizes_single_and_multi_label_branches() {
    let compiled = compile(
        "program Hi; var x: integer; begin \
         case x of \
         1: x := 10; \
         2, 3: x := 20; \
         end \
         end.",
    )
    .unwrap();

    let program = compiled.ast.node(compiled.root);
    let block = compiled.ast.node(program.right.unwrap());
    let body = compiled.ast.node(block.children[1]);
    let case_stmt = compiled.ast.node(body.children[0]);
    assert_eq!(case_stmt.kind, AstKind::Case);

    let single_branch = case_stmt.children[0];
    let single_labels = compiled.ast.case_labels(single_branch);
    assert_eq!(single_labels.len(), 1);

    let multi_branch = case_stmt.children[1];
    let multi_labels = compiled.ast.case_labels(multi_branch);
    assert_eq!(multi_labels.len(), 2);
}

#[test]
fn declaring_a_routine_named_like_a_builtin_warns_unless_overridden() {
    let warned = compile("program Hi; procedure Length; begin end; begin end.").unwrap();
    assert!(warned.warnings.iter().any(|w| w.contains("Length")));

    let silenced = compile(
        "program Hi; {$OVERRIDE-BUILTIN Length} procedure Length; begin end; begin end.",
    )
    .unwrap();
    assert!(silenced.warnings.iter().all(|w| !w.contains("Length")));
}

#[test]
fn record_method_prototype_is_implemented_with_myself_and_called_qualified() {
    let compiled = compile(
        "program Hi; \
         type TPoint = record \
         x: integer; \
         procedure Show; \
         end; \
         var p: TPoint; \
         procedure TPoint.Show; \
         begin writeln(myself.x) end; \
         begin \
         p.x := 5; \
         TPoint.Show \
         end.",
    )
    .unwrap();

    assert!(compiled
        .ctx
        .procedures
        .iter()
        .any(|table| table.lookup("tpoint.show").is_some()));

    let program = compiled.ast.node(compiled.root);
    let block = compiled.ast.node(program.right.unwrap());
    let body = compiled.ast.node(block.children[1]);
    let call_stmt = compiled.ast.node(body.children[1]);
    assert_eq!(call_stmt.kind, AstKind::ProcedureCall);
    assert_eq!(
        call_stmt.token.as_ref().unwrap().lexeme.to_ascii_lowercase(),
        "tpoint.show"
    );
}
