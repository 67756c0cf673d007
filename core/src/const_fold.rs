//! C5: the constant folder. Evaluates a restricted AST expression to a
//! [`Value`] at parse time, used for constant declarations and array-bound
//! resolution. Non-foldable input yields [`Value::Void`] rather than an
//! error — callers decide whether that's acceptable (array bounds require a
//! fold; a general const-decl initializer does not).

use crate::ast::{Ast, AstKind, NodeId};
use crate::symbol::Context;
use crate::token::TokenKind;
use crate::value::Value;

/// Attempts to fold the expression rooted at `id` to a compile-time
/// [`Value`], resolving bare identifiers against `ctx`'s compile-time
/// constant table and global/const-global symbol tables.
pub fn fold(ast: &Ast, ctx: &Context, id: NodeId) -> Value {
    let node = ast.node(id);
    match node.kind {
        AstKind::Number => fold_number(node),
        AstKind::StringLit => fold_string(node),
        AstKind::Boolean => fold_boolean(node),
        AstKind::Nil => Value::Nil,
        AstKind::EnumValue => Value::Enum {
            type_name: node.token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default(),
            name: node.token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default(),
            ordinal: node.i_val,
        },
        AstKind::Variable => fold_identifier(ast, ctx, node),
        AstKind::UnaryOp => fold_unary(ast, ctx, id, node),
        AstKind::BinaryOp => fold_binary(ast, ctx, id, node),
        AstKind::ProcedureCall => fold_builtin_call(ast, ctx, id, node),
        _ => Value::Void,
    }
}

fn fold_number(node: &crate::ast::AstNode) -> Value {
    let lexeme = node.token.as_ref().map(|t| t.lexeme.as_str()).unwrap_or("0");
    match node.token.as_ref().map(|t| t.kind) {
        Some(TokenKind::RealConst) => lexeme.parse::<f64>().map(Value::real).unwrap_or(Value::Void),
        Some(TokenKind::HexConst) => i64::from_str_radix(lexeme, 16).map(Value::int).unwrap_or(Value::Void),
        _ => lexeme.parse::<i64>().map(Value::int).unwrap_or(Value::Void),
    }
}

fn fold_string(node: &crate::ast::AstNode) -> Value {
    let lexeme = node.token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
    let is_char_code = node.token.as_ref().map(|t| t.is_char_code).unwrap_or(false);
    if is_char_code && lexeme.chars().count() == 1 {
        Value::Char(lexeme.chars().next().unwrap())
    } else {
        Value::Str { value: lexeme, max_len: None }
    }
}

fn fold_boolean(node: &crate::ast::AstNode) -> Value {
    let lexeme = node.token.as_ref().map(|t| t.lexeme.as_str()).unwrap_or("false");
    Value::Boolean(lexeme.eq_ignore_ascii_case("true"))
}

fn fold_identifier(ast: &Ast, ctx: &Context, node: &crate::ast::AstNode) -> Value {
    let name = match &node.token {
        Some(t) => t.lexeme.to_ascii_lowercase(),
        None => return Value::Void,
    };
    if let Some(v) = ctx.const_table.get(&name) {
        return v.clone();
    }
    if let Some(sym) = ctx.const_global.lookup(&name).or_else(|| ctx.global.lookup(&name)) {
        return sym.value.borrow().clone();
    }
    let _ = ast;
    Value::Void
}

fn fold_unary(ast: &Ast, ctx: &Context, id: NodeId, node: &crate::ast::AstNode) -> Value {
    let operand = match node.left {
        Some(left) => fold(ast, ctx, left),
        None => return Value::Void,
    };
    let op = node.token.as_ref().map(|t| t.kind);
    match (op, &operand) {
        (Some(TokenKind::Minus), Value::Integer { width, value }) => {
            Value::Integer { width: *width, value: -value }
        }
        (Some(TokenKind::Minus), Value::Real { width, value }) => {
            Value::Real { width: *width, value: -value }
        }
        (Some(TokenKind::Plus), _) => operand,
        (Some(TokenKind::Not), Value::Boolean(b)) => Value::Boolean(!b),
        _ => {
            let _ = id;
            Value::Void
        }
    }
}

fn fold_binary(ast: &Ast, ctx: &Context, _id: NodeId, node: &crate::ast::AstNode) -> Value {
    let (lhs, rhs) = match (node.left, node.right) {
        (Some(l), Some(r)) => (fold(ast, ctx, l), fold(ast, ctx, r)),
        _ => return Value::Void,
    };
    let op = match node.token.as_ref().map(|t| t.kind) {
        Some(op) => op,
        None => return Value::Void,
    };

    if let (Some(a), Some(b)) = (as_f64(&lhs), as_f64(&rhs)) {
        if matches!(lhs, Value::Real { .. }) || matches!(rhs, Value::Real { .. }) || op == TokenKind::Slash {
            return match op {
                TokenKind::Plus => Value::real(a + b),
                TokenKind::Minus => Value::real(a - b),
                TokenKind::Mul => Value::real(a * b),
                TokenKind::Slash => Value::real(a / b),
                TokenKind::Equal => Value::Boolean(a == b),
                TokenKind::NotEqual => Value::Boolean(a != b),
                TokenKind::Less => Value::Boolean(a < b),
                TokenKind::LessEqual => Value::Boolean(a <= b),
                TokenKind::Greater => Value::Boolean(a > b),
                TokenKind::GreaterEqual => Value::Boolean(a >= b),
                _ => Value::Void,
            };
        }
    }

    if let (Some(a), Some(b)) = (lhs.as_ordinal(), rhs.as_ordinal()) {
        return match op {
            TokenKind::Plus => Value::int(a + b),
            TokenKind::Minus => Value::int(a - b),
            TokenKind::Mul => Value::int(a * b),
            TokenKind::Div => if b != 0 { Value::int(a / b) } else { Value::Void },
            TokenKind::Mod => if b != 0 { Value::int(a % b) } else { Value::Void },
            TokenKind::And => Value::int(a & b),
            TokenKind::Or => Value::int(a | b),
            TokenKind::Xor => Value::int(a ^ b),
            TokenKind::Shl => Value::int(a << b),
            TokenKind::Shr => Value::int(a >> b),
            TokenKind::Equal => Value::Boolean(a == b),
            TokenKind::NotEqual => Value::Boolean(a != b),
            TokenKind::Less => Value::Boolean(a < b),
            TokenKind::LessEqual => Value::Boolean(a <= b),
            TokenKind::Greater => Value::Boolean(a > b),
            TokenKind::GreaterEqual => Value::Boolean(a >= b),
            _ => Value::Void,
        };
    }

    match (op, &lhs, &rhs) {
        (TokenKind::And, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(*a && *b),
        (TokenKind::Or, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(*a || *b),
        (TokenKind::Xor, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(*a != *b),
        (TokenKind::Plus, Value::Str { value: a, .. }, Value::Str { value: b, .. }) => {
            Value::Str { value: format!("{}{}", a, b), max_len: None }
        }
        (TokenKind::Plus, Value::Str { value: a, .. }, Value::Char(c)) => {
            Value::Str { value: format!("{}{}", a, c), max_len: None }
        }
        (TokenKind::Plus, Value::Char(c), Value::Str { value: b, .. }) => {
            Value::Str { value: format!("{}{}", c, b), max_len: None }
        }
        _ => Value::Void,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Real { value, .. } => Some(*value),
        Value::Integer { value, .. } => Some(*value as f64),
        _ => None,
    }
}

/// `chr`, `ord`, `length`, `sizeof`, `low`, `high`, `succ`, `pred` when
/// their arguments are themselves foldable.
fn fold_builtin_call(ast: &Ast, ctx: &Context, _id: NodeId, node: &crate::ast::AstNode) -> Value {
    let name = match &node.token {
        Some(t) => t.lexeme.to_ascii_lowercase(),
        None => return Value::Void,
    };
    let args: Vec<Value> = node.children.iter().map(|&c| fold(ast, ctx, c)).collect();
    let first = args.first();

    match (name.as_str(), first) {
        ("chr", Some(v)) => v.as_ordinal().map(|o| Value::Char((o as u8) as char)).unwrap_or(Value::Void),
        ("ord", Some(v)) => v.as_ordinal().map(Value::int).unwrap_or(Value::Void),
        ("length", Some(Value::Str { value, .. })) => Value::int(value.chars().count() as i64),
        ("sizeof", Some(v)) => Value::int(size_of_value(v)),
        ("succ", Some(v)) => bump_ordinal(v, 1),
        ("pred", Some(v)) => bump_ordinal(v, -1),
        ("low", Some(Value::Array { bounds, .. })) => {
            bounds.first().map(|b| Value::int(b.low)).unwrap_or(Value::Void)
        }
        ("high", Some(Value::Array { bounds, .. })) => {
            bounds.first().map(|b| Value::int(b.high)).unwrap_or(Value::Void)
        }
        _ => Value::Void,
    }
}

fn size_of_value(v: &Value) -> i64 {
    match v {
        Value::Byte(_) | Value::Boolean(_) | Value::Char(_) => 1,
        Value::Word(_) => 2,
        Value::Integer { .. } => 8,
        Value::Real { .. } => 8,
        _ => 0,
    }
}

fn bump_ordinal(v: &Value, delta: i64) -> Value {
    match v {
        Value::Integer { width, value } => Value::Integer { width: *width, value: value + delta },
        Value::Char(c) => Value::Char((((*c as i64) + delta) as u8) as char),
        Value::Enum { type_name, name, ordinal } => Value::Enum {
            type_name: type_name.clone(),
            name: name.clone(),
            ordinal: ordinal + delta,
        },
        _ => Value::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;
    use crate::token::Token;

    fn number_node(ast: &mut Ast, lexeme: &str, kind: TokenKind) -> NodeId {
        let n = ast.new_node(AstKind::Number, Some(Token::new(kind, lexeme, 1, 1)), Span::point(1, 1));
        if kind == TokenKind::IntegerConst {
            ast.node_mut(n).i_val = lexeme.parse().unwrap_or(0);
        }
        n
    }

    #[test]
    fn folds_integer_addition() {
        let mut ast = Ast::new();
        let ctx = Context::new();
        let a = number_node(&mut ast, "2", TokenKind::IntegerConst);
        let b = number_node(&mut ast, "3", TokenKind::IntegerConst);
        let plus = ast.new_node(AstKind::BinaryOp, Some(Token::new(TokenKind::Plus, "+", 1, 1)), Span::point(1, 1));
        ast.set_left(plus, a);
        ast.set_right(plus, b);

        let v = fold(&ast, &ctx, plus);
        assert!(matches!(v, Value::Integer { value: 5, .. }));
    }

    #[test]
    fn non_foldable_expression_yields_void() {
        let mut ast = Ast::new();
        let ctx = Context::new();
        let call = ast.new_node(AstKind::ProcedureCall, Some(Token::new(TokenKind::Identifier, "readln", 1, 1)), Span::point(1, 1));
        assert!(fold(&ast, &ctx, call).is_void());
    }

    #[test]
    fn succ_and_pred_on_char() {
        let mut ast = Ast::new();
        let mut ctx = Context::new();
        ctx.const_table.insert("c".into(), Value::Char('a'));
        let var = ast.new_node(AstKind::Variable, Some(Token::new(TokenKind::Identifier, "c", 1, 1)), Span::point(1, 1));
        let call = ast.new_node(AstKind::ProcedureCall, Some(Token::new(TokenKind::Identifier, "succ", 1, 1)), Span::point(1, 1));
        ast.add_child(call, var);
        assert!(matches!(fold(&ast, &ctx, call), Value::Char('b')));
    }
}
