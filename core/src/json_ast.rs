//! C9: AST JSON I/O. `to_json` writes exactly the field order and shape
//! `dumpASTJSONRecursive` in the original emits (so output is byte-stable
//! and round-trips through other tooling); `from_json` is a lenient reader
//! that skips unknown fields rather than rejecting them, grounded on
//! `tools/ast_json_loader.c`.

use crate::ast::{Ast, AstKind, NodeId};
use crate::token::{Token, TokenKind};
use crate::value::VarType;
use serde_json::{Map, Value as Json};

fn kind_token_type(kind: TokenKind) -> &'static str {
    kind.keyword().unwrap_or(match kind {
        TokenKind::Identifier => "IDENTIFIER",
        TokenKind::IntegerConst => "INTEGER_CONST",
        TokenKind::HexConst => "HEX_CONST",
        TokenKind::RealConst => "REAL_CONST",
        TokenKind::StringConst => "STRING_CONST",
        TokenKind::Eof => "EOF",
        _ => "UNKNOWN",
    })
}

fn var_type_str(vt: VarType) -> String {
    format!("{}", vt).to_uppercase()
}

fn token_to_json(token: &Token) -> Json {
    let mut map = Map::new();
    map.insert("type".into(), Json::String(kind_token_type(token.kind).to_string()));
    map.insert("value".into(), Json::String(token.lexeme.clone()));
    Json::Object(map)
}

/// Serialises the subtree rooted at `id` to a `serde_json::Value`, matching
/// `dumpASTJSONRecursive`'s field order: `node_type`, `token`,
/// `var_type_annotated`, conditional `by_ref`/`i_val`/`is_inline`, then the
/// node-specific children (special-cased for `Program`/`Block`/`UsesClause`,
/// else the generic `left`/`right`/`extra`/`children`).
pub fn to_json(ast: &Ast, id: NodeId) -> Json {
    let node = ast.node(id);
    let mut map = Map::new();

    map.insert("node_type".into(), Json::String(node.kind.as_str().to_string()));

    if let Some(token) = &node.token {
        map.insert("token".into(), token_to_json(token));
    }

    map.insert(
        "var_type_annotated".into(),
        Json::String(var_type_str(node.var_type)),
    );

    if node.kind == AstKind::VarDecl {
        if let Some(parent) = node.parent {
            let parent_kind = ast.node(parent).kind;
            if parent_kind == AstKind::ProcedureDecl || parent_kind == AstKind::FunctionDecl {
                map.insert("by_ref".into(), Json::Bool(node.flags.by_ref));
            }
        }
    }

    if node.kind == AstKind::EnumValue || node.kind == AstKind::Number {
        map.insert("i_val".into(), Json::Number(node.i_val.into()));
    }

    if node.kind == AstKind::ProcedureDecl || node.kind == AstKind::FunctionDecl {
        map.insert("is_inline".into(), Json::Bool(node.flags.is_inline));
    }

    match node.kind {
        AstKind::Program => {
            if let Some(left) = node.left {
                map.insert("program_name_node".into(), to_json(ast, left));
            }
            if let Some(right) = node.right {
                map.insert("main_block".into(), to_json(ast, right));
            }
            if !node.children.is_empty() {
                map.insert(
                    "uses_clauses".into(),
                    Json::Array(node.children.iter().map(|&c| to_json(ast, c)).collect()),
                );
            }
        }
        AstKind::Block => {
            map.insert("is_global_scope".into(), Json::Bool(node.flags.is_global_scope));
            let decl = node.children.first().copied();
            map.insert(
                "declarations".into(),
                decl.map(|id| to_json(ast, id)).unwrap_or(Json::Null),
            );
            let body = node.children.get(1).copied();
            map.insert(
                "body".into(),
                body.map(|id| to_json(ast, id)).unwrap_or(Json::Null),
            );
        }
        AstKind::UsesClause => {
            if !node.unit_list.is_empty() {
                map.insert(
                    "unit_list".into(),
                    Json::Array(node.unit_list.iter().cloned().map(Json::String).collect()),
                );
            }
        }
        _ => {
            if let Some(left) = node.left {
                map.insert("left".into(), to_json(ast, left));
            }
            if let Some(right) = node.right {
                map.insert("right".into(), to_json(ast, right));
            }
            if let Some(extra) = node.extra {
                map.insert("extra".into(), to_json(ast, extra));
            }
            if !node.children.is_empty() {
                map.insert(
                    "children".into(),
                    Json::Array(node.children.iter().map(|&c| to_json(ast, c)).collect()),
                );
            }
        }
    }

    Json::Object(map)
}

/// Errors raised while reading an AST back from JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonAstError {
    NotAnObject,
    MissingNodeType,
    UnknownNodeType(String),
}

impl std::fmt::Display for JsonAstError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonAstError::NotAnObject => write!(f, "expected a JSON object for an AST node"),
            JsonAstError::MissingNodeType => write!(f, "AST node is missing \"node_type\""),
            JsonAstError::UnknownNodeType(s) => write!(f, "unrecognised node_type \"{}\"", s),
        }
    }
}

fn kind_from_str(s: &str) -> Option<AstKind> {
    use AstKind::*;
    Some(match s {
        "AST_PROGRAM" => Program,
        "AST_BLOCK" => Block,
        "AST_COMPOUND" => Compound,
        "AST_VAR_DECL" => VarDecl,
        "AST_CONST_DECL" => ConstDecl,
        "AST_TYPE_DECL" => TypeDecl,
        "AST_RECORD_TYPE" => RecordType,
        "AST_ARRAY_TYPE" => ArrayType,
        "AST_SET_TYPE" => SetType,
        "AST_ENUM_TYPE" => EnumType,
        "AST_ENUM_VALUE" => EnumValue,
        "AST_INTERFACE" => Interface,
        "AST_POINTER_TYPE" => PointerType,
        "AST_PROC_PTR_TYPE" => ProcPtrType,
        "AST_PROCEDURE_DECL" => ProcedureDecl,
        "AST_FUNCTION_DECL" => FunctionDecl,
        "AST_PROCEDURE_CALL" => ProcedureCall,
        "AST_VARIABLE" => Variable,
        "AST_FIELD_ACCESS" => FieldAccess,
        "AST_ARRAY_ACCESS" => ArrayAccess,
        "AST_DEREFERENCE" => Dereference,
        "AST_NUMBER" => Number,
        "AST_STRING" => StringLit,
        "AST_BOOLEAN" => Boolean,
        "AST_NIL" => Nil,
        "AST_BINARY_OP" => BinaryOp,
        "AST_UNARY_OP" => UnaryOp,
        "AST_TERNARY" => Ternary,
        "AST_ADDR_OF" => AddrOf,
        "AST_TYPE_ASSERT" => TypeAssert,
        "AST_ASSIGN" => Assign,
        "AST_IF" => If,
        "AST_WHILE" => While,
        "AST_FOR_TO" => ForTo,
        "AST_FOR_DOWNTO" => ForDownto,
        "AST_REPEAT" => Repeat,
        "AST_CASE" => Case,
        "AST_CASE_BRANCH" => CaseBranch,
        "AST_BREAK" => Break,
        "AST_GOTO" => Goto,
        "AST_LABEL" => Label,
        "AST_LABEL_DECL" => LabelDecl,
        "AST_READ" => Read,
        "AST_READLN" => Readln,
        "AST_WRITE" => Write,
        "AST_WRITELN" => Writeln,
        "AST_THREAD_SPAWN" => ThreadSpawn,
        "AST_THREAD_JOIN" => ThreadJoin,
        "AST_USES_CLAUSE" => UsesClause,
        "AST_UNIT" => Unit,
        "AST_SUBRANGE" => Subrange,
        "AST_ARRAY_LITERAL" => ArrayLiteral,
        "AST_SET" => Set,
        "AST_FORMATTED_EXPR" => FormattedExpr,
        "AST_TYPE_REFERENCE" => TypeReference,
        "AST_LIST" => List,
        "AST_NOOP" => Noop,
        "AST_NEW" => New,
        _ => return None,
    })
}

fn var_type_from_str(s: &str) -> VarType {
    use VarType::*;
    match s {
        "INT8" => Int8,
        "INT16" => Int16,
        "INT32" => Int32,
        "INT64" => Int64,
        "UINT8" => UInt8,
        "UINT16" => UInt16,
        "UINT32" => UInt32,
        "UINT64" => UInt64,
        "FLOAT32" => Float32,
        "FLOAT64" => Float64,
        "FLOAT80" => Float80,
        "CHAR" => Char,
        "STRING" => String,
        "BOOLEAN" => Boolean,
        "BYTE" => Byte,
        "WORD" => Word,
        "ENUM" => Enum,
        "SET" => Set,
        "RECORD" => Record,
        "ARRAY" => Array,
        "FILE" => File,
        "MEMORYSTREAM" => MemoryStream,
        "POINTER" => Pointer,
        "NIL" => Nil,
        "VOID" => Void,
        "THREAD" => Thread,
        "INTERFACE" => Interface,
        _ => Unknown,
    }
}

fn token_kind_from_str(s: &str) -> TokenKind {
    TokenKind::from_keyword(&s.to_ascii_lowercase()).unwrap_or(match s {
        "IDENTIFIER" => TokenKind::Identifier,
        "INTEGER_CONST" => TokenKind::IntegerConst,
        "HEX_CONST" => TokenKind::HexConst,
        "REAL_CONST" => TokenKind::RealConst,
        "STRING_CONST" => TokenKind::StringConst,
        "EOF" => TokenKind::Eof,
        _ => TokenKind::Unknown,
    })
}

/// Reads one node (and, recursively, its subtree) out of `json`, appending
/// new nodes into `ast`. Unknown object keys are ignored; missing/null
/// booleans and integers default to `false`/`0`.
pub fn from_json(ast: &mut Ast, json: &Json) -> Result<NodeId, JsonAstError> {
    let obj = json.as_object().ok_or(JsonAstError::NotAnObject)?;

    let node_type = obj
        .get("node_type")
        .and_then(Json::as_str)
        .ok_or(JsonAstError::MissingNodeType)?;
    let kind = kind_from_str(node_type)
        .ok_or_else(|| JsonAstError::UnknownNodeType(node_type.to_string()))?;

    let token = obj.get("token").and_then(|t| t.as_object()).map(|t| {
        let kind_str = t.get("type").and_then(Json::as_str).unwrap_or("UNKNOWN");
        let value = t.get("value").and_then(Json::as_str).unwrap_or("").to_string();
        Token::new(token_kind_from_str(kind_str), value, 0, 0)
    });

    let id = ast.new_node(kind, token, crate::lexer::Span::point(0, 0));

    if let Some(vt) = obj.get("var_type_annotated").and_then(Json::as_str) {
        ast.node_mut(id).var_type = var_type_from_str(vt);
    }
    if let Some(b) = obj.get("by_ref").and_then(Json::as_bool) {
        ast.node_mut(id).flags.by_ref = b;
    }
    if let Some(i) = obj.get("i_val").and_then(Json::as_i64) {
        ast.node_mut(id).i_val = i;
    }
    if let Some(b) = obj.get("is_inline").and_then(Json::as_bool) {
        ast.node_mut(id).flags.is_inline = b;
    }
    if let Some(b) = obj.get("is_global_scope").and_then(Json::as_bool) {
        ast.node_mut(id).flags.is_global_scope = b;
    }

    if let Some(prog_name) = obj.get("program_name_node") {
        if !prog_name.is_null() {
            let child = from_json(ast, prog_name)?;
            ast.set_left(id, child);
        }
    }
    if let Some(main_block) = obj.get("main_block") {
        if !main_block.is_null() {
            let child = from_json(ast, main_block)?;
            ast.set_right(id, child);
        }
    }
    if let Some(uses) = obj.get("uses_clauses").and_then(Json::as_array) {
        for item in uses {
            let child = from_json(ast, item)?;
            ast.add_child(id, child);
        }
    }

    if let Some(unit_list) = obj.get("unit_list").and_then(Json::as_array) {
        let names: Vec<String> = unit_list
            .iter()
            .filter_map(Json::as_str)
            .map(str::to_string)
            .collect();
        ast.node_mut(id).unit_list = names;
    }

    // `declarations`/`body` install at positional child indices 0 and 1.
    if let Some(decl) = obj.get("declarations") {
        if !decl.is_null() {
            let child = from_json(ast, decl)?;
            ast.add_child(id, child);
        } else if obj.contains_key("body") {
            // Keep index 0 free so `body` lands at index 1.
            let placeholder = ast.new_node(AstKind::Noop, None, crate::lexer::Span::point(0, 0));
            ast.add_child(id, placeholder);
        }
    }
    if let Some(body) = obj.get("body") {
        if !body.is_null() {
            let child = from_json(ast, body)?;
            ast.add_child(id, child);
        }
    }

    if let Some(left) = obj.get("left") {
        if !left.is_null() {
            let child = from_json(ast, left)?;
            ast.set_left(id, child);
        }
    }
    if let Some(right) = obj.get("right") {
        if !right.is_null() {
            let child = from_json(ast, right)?;
            ast.set_right(id, child);
        }
    }
    if let Some(extra) = obj.get("extra") {
        if !extra.is_null() {
            let child = from_json(ast, extra)?;
            ast.set_extra(id, child);
        }
    }
    if let Some(children) = obj.get("children").and_then(Json::as_array) {
        for item in children {
            let child = from_json(ast, item)?;
            ast.add_child(id, child);
        }
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;

    #[test]
    fn round_trips_a_binary_expression() {
        let mut ast = Ast::new();
        let left = ast.new_node(AstKind::Number, Some(Token::new(TokenKind::IntegerConst, "1", 1, 1)), Span::point(1, 1));
        ast.node_mut(left).i_val = 1;
        let right = ast.new_node(AstKind::Number, Some(Token::new(TokenKind::IntegerConst, "2", 1, 5)), Span::point(1, 5));
        ast.node_mut(right).i_val = 2;
        let root = ast.new_node(AstKind::BinaryOp, Some(Token::new(TokenKind::Plus, "+", 1, 3)), Span::point(1, 3));
        ast.set_left(root, left);
        ast.set_right(root, right);

        let json = to_json(&ast, root);
        let mut ast2 = Ast::new();
        let reloaded = from_json(&mut ast2, &json).unwrap();

        assert_eq!(ast2.node(reloaded).kind, AstKind::BinaryOp);
        let reloaded_left = ast2.node(reloaded).left.unwrap();
        assert_eq!(ast2.node(reloaded_left).i_val, 1);
    }

    #[test]
    fn unknown_fields_are_ignored_not_rejected() {
        let json = serde_json::json!({
            "node_type": "AST_NIL",
            "var_type_annotated": "NIL",
            "totally_unexpected_field": { "nested": [1, 2, 3] }
        });
        let mut ast = Ast::new();
        let id = from_json(&mut ast, &json).unwrap();
        assert_eq!(ast.node(id).kind, AstKind::Nil);
    }

    #[test]
    fn block_round_trip_preserves_declarations_and_body_positions() {
        let mut ast = Ast::new();
        let decls = ast.new_node(AstKind::Compound, None, Span::point(1, 1));
        let body = ast.new_node(AstKind::Compound, None, Span::point(2, 1));
        let block = ast.new_node(AstKind::Block, None, Span::point(1, 1));
        ast.add_child(block, decls);
        ast.add_child(block, body);

        let json = to_json(&ast, block);
        let mut ast2 = Ast::new();
        let reloaded = from_json(&mut ast2, &json).unwrap();
        assert_eq!(ast2.node(reloaded).children.len(), 2);
    }

    #[test]
    fn missing_node_type_is_an_error() {
        let json = serde_json::json!({ "var_type_annotated": "VOID" });
        let mut ast = Ast::new();
        assert_eq!(from_json(&mut ast, &json), Err(JsonAstError::MissingNodeType));
    }
}
