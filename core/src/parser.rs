//! C6: the recursive-descent parser. Consumes a [`Lexer`] token-by-token and
//! builds an [`Ast`], registering types, constants, and procedure symbols as
//! it goes (§4.6). Grounded on `Pascal/parser.c`'s grammar, reworked per
//! §9's "return `Result`, don't call the exit handler" redesign note.

use crate::ast::{Ast, AstKind, NodeId};
use crate::const_fold;
use crate::error::{ParseError, SourceErrorWrapper, WithSource};
use crate::lexer::{LexError, Lexer, LexerState, Span};
use crate::semant::is_builtin_name;
use crate::symbol::Context;
use crate::token::{Token, TokenKind};
use crate::value::VarType;

type PResult<T> = Result<T, ParseError>;

/// Owns the token cursor and the `Ast` being built. `parse_program` is the
/// entry point; every other method is a single grammar production.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a str,
    current: Token,
    pub ast: Ast,
    errors: Vec<SourceErrorWrapper<ParseError>>,
    /// Non-fatal diagnostics (currently just "declaration shadows a
    /// built-in" per §4.6) collected alongside the hard parse errors.
    pub warnings: Vec<String>,
}

fn span_for(token: &Token) -> Span {
    Span {
        offset: 0,
        length: token.lexeme.len(),
        start_line: token.line as usize,
        start_col: token.column as usize,
        end_line: token.line as usize,
        end_col: (token.column as usize) + token.lexeme.len().max(1),
    }
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, LexError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next()?;
        Ok(Parser {
            lexer,
            source,
            current,
            ast: Ast::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        })
    }

    fn record_error(&mut self, ctx: &mut Context, err: ParseError) {
        ctx.parse_error_count += 1;
        let span = span_for(&self.current);
        self.errors.push(SourceErrorWrapper::new(err, span, self.source));
    }

    fn advance(&mut self) -> PResult<Token> {
        let next = self.lexer.next().map_err(|e| ParseError::LexError(e.to_string()))?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.current.kind != kind {
            return Err(ParseError::UnexpectedToken {
                found: self.current.lexeme.clone(),
                expected: format!("{:?}", kind),
            });
        }
        self.advance()
    }

    fn snapshot(&self) -> (LexerState, Token) {
        (self.lexer.snapshot(), self.current.clone())
    }

    fn restore(&mut self, (state, token): (LexerState, Token)) {
        self.lexer.restore(state);
        self.current = token;
    }

    fn new_node(&mut self, kind: AstKind, token: Option<Token>) -> NodeId {
        let span = token.as_ref().map(span_for).unwrap_or_else(|| span_for(&self.current));
        self.ast.new_node(kind, token, span)
    }

    // --- program ---------------------------------------------------------

    /// `program`: `PROGRAM name [ '(' ident-list ')' ] ';' [uses-clause] block '.'`
    pub fn parse_program(&mut self, ctx: &mut Context) -> Result<NodeId, WithSource<ParseError>> {
        match self.parse_program_inner(ctx) {
            Ok(id) if self.errors.is_empty() => Ok(id),
            Ok(_) => Err(WithSource::new(std::mem::take(&mut self.errors), self.source.to_string())),
            Err(e) => {
                self.record_error(ctx, e);
                Err(WithSource::new(std::mem::take(&mut self.errors), self.source.to_string()))
            }
        }
    }

    fn parse_program_inner(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        self.eat(TokenKind::Program)?;
        let name_tok = self.eat(TokenKind::Identifier)?;
        let name_node = self.new_node(AstKind::Variable, Some(name_tok));

        if self.check(TokenKind::LParen) {
            self.advance()?;
            self.eat(TokenKind::Identifier)?;
            while self.check(TokenKind::Comma) {
                self.advance()?;
                self.eat(TokenKind::Identifier)?;
            }
            self.eat(TokenKind::RParen)?;
        }
        self.eat(TokenKind::Semicolon)?;

        let program = self.new_node(AstKind::Program, None);
        self.ast.set_left(program, name_node);

        if self.check(TokenKind::Uses) {
            let uses = self.parse_uses_clause(ctx)?;
            self.ast.add_child(program, uses);
        }

        let block = self.parse_block(ctx)?;
        self.ast.set_right(program, block);

        self.eat(TokenKind::Period)?;
        Ok(program)
    }

    /// `uses-clause`: `USES ident { ',' ident } ';'`
    fn parse_uses_clause(&mut self, _ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Uses)?;
        let node = self.new_node(AstKind::UsesClause, Some(tok));
        let mut names = Vec::new();
        let first = self.eat(TokenKind::Identifier)?;
        names.push(first.lexeme);
        while self.check(TokenKind::Comma) {
            self.advance()?;
            let next = self.eat(TokenKind::Identifier)?;
            names.push(next.lexeme);
        }
        self.eat(TokenKind::Semicolon)?;
        self.ast.node_mut(node).unit_list = names;
        Ok(node)
    }

    /// `unit`: `UNIT name ';' [uses-clause] INTERFACE declarations
    /// IMPLEMENTATION declarations [ BEGIN compound-statement END ] '.'`.
    /// Mirrors `parse_program_inner`'s shape: `left` is the unit's name,
    /// `right` is the interface section (a `Block` with only a decls
    /// child), `extra` is the implementation section (a `Block` with decls
    /// and, if present, an initialization body).
    pub fn parse_unit(&mut self, ctx: &mut Context) -> Result<NodeId, WithSource<ParseError>> {
        match self.parse_unit_inner(ctx) {
            Ok(id) if self.errors.is_empty() => Ok(id),
            Ok(_) => Err(WithSource::new(std::mem::take(&mut self.errors), self.source.to_string())),
            Err(e) => {
                self.record_error(ctx, e);
                Err(WithSource::new(std::mem::take(&mut self.errors), self.source.to_string()))
            }
        }
    }

    fn parse_unit_inner(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        self.eat(TokenKind::Unit)?;
        let name_tok = self.eat(TokenKind::Identifier)?;
        let name_node = self.new_node(AstKind::Variable, Some(name_tok));
        self.eat(TokenKind::Semicolon)?;

        let unit = self.new_node(AstKind::Unit, None);
        self.ast.set_left(unit, name_node);

        if self.check(TokenKind::Uses) {
            let uses = self.parse_uses_clause(ctx)?;
            self.ast.add_child(unit, uses);
        }

        self.eat(TokenKind::Interface)?;
        let interface_decls = self.parse_interface_declarations(ctx)?;
        let interface_block = self.new_node(AstKind::Block, None);
        self.ast.add_child(interface_block, interface_decls);
        self.ast.set_right(unit, interface_block);

        self.eat(TokenKind::Implementation)?;
        let impl_decls = self.parse_declarations(ctx)?;
        let impl_block = self.new_node(AstKind::Block, None);
        self.ast.add_child(impl_block, impl_decls);
        if self.check(TokenKind::Begin) {
            let body = self.parse_compound_statement(ctx)?;
            self.ast.add_child(impl_block, body);
        } else {
            self.eat(TokenKind::End)?;
        }
        self.ast.set_extra(unit, impl_block);

        self.eat(TokenKind::Period)?;
        Ok(unit)
    }

    /// `block`: `declarations compound-statement`.
    fn parse_block(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let block = self.new_node(AstKind::Block, None);
        let decls = self.parse_declarations(ctx)?;
        self.ast.add_child(block, decls);
        let body = self.parse_compound_statement(ctx)?;
        self.ast.add_child(block, body);
        Ok(block)
    }

    /// `declarations`: `{ const-block | type-block | var-block | routine-decl }*`
    fn parse_declarations(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let decls = self.new_node(AstKind::Compound, None);
        loop {
            match self.current.kind {
                TokenKind::Const => {
                    let items = self.parse_const_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Type => {
                    let items = self.parse_type_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Var => {
                    let items = self.parse_var_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Procedure | TokenKind::Function => {
                    let routine = self.parse_routine_decl(ctx, false)?;
                    self.ast.add_child(decls, routine);
                }
                _ => break,
            }
        }
        Ok(decls)
    }

    /// Like `parse_declarations`, but every routine is signature-only: a
    /// unit's `interface` section declares what the implementation and any
    /// importing program can see, never a body (§4.8). Mirrors
    /// `parse_declarations` apart from that one difference.
    fn parse_interface_declarations(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let decls = self.new_node(AstKind::Compound, None);
        loop {
            match self.current.kind {
                TokenKind::Const => {
                    let items = self.parse_const_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Type => {
                    let items = self.parse_type_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Var => {
                    let items = self.parse_var_block(ctx)?;
                    for item in items {
                        self.ast.add_child(decls, item);
                    }
                }
                TokenKind::Procedure | TokenKind::Function => {
                    let routine = self.parse_routine_decl(ctx, true)?;
                    self.ast.add_child(decls, routine);
                }
                _ => break,
            }
        }
        Ok(decls)
    }

    /// `CONST name = expr ';' { name = expr ';' }`
    fn parse_const_block(&mut self, ctx: &mut Context) -> PResult<Vec<NodeId>> {
        self.eat(TokenKind::Const)?;
        let mut out = Vec::new();
        while self.check(TokenKind::Identifier) {
            let name_tok = self.eat(TokenKind::Identifier)?;
            self.eat(TokenKind::Equal)?;
            let expr = self.parse_expression(ctx)?;
            self.eat(TokenKind::Semicolon)?;

            let value = const_fold::fold(&self.ast, ctx, expr);
            ctx.const_table.insert(name_tok.lexeme.to_ascii_lowercase(), value);

            let decl = self.new_node(AstKind::ConstDecl, Some(name_tok));
            self.ast.set_right(decl, expr);
            out.push(decl);
        }
        Ok(out)
    }

    /// `TYPE name = type-spec ';' { name = type-spec ';' }`
    fn parse_type_block(&mut self, ctx: &mut Context) -> PResult<Vec<NodeId>> {
        self.eat(TokenKind::Type)?;
        let mut out = Vec::new();
        while self.check(TokenKind::Identifier) {
            let name_tok = self.eat(TokenKind::Identifier)?;
            self.eat(TokenKind::Equal)?;
            ctx.types.reserve_placeholder(&name_tok.lexeme, VarType::Unknown);
            let type_node = self.parse_type_spec(ctx)?;
            self.eat(TokenKind::Semicolon)?;
            ctx.types.insert(&name_tok.lexeme, &self.ast, type_node);

            let decl = self.new_node(AstKind::TypeDecl, Some(name_tok));
            self.ast.set_right(decl, type_node);
            out.push(decl);
        }
        Ok(out)
    }

    /// `VAR ident-list ':' type-spec [ '=' expr ] ';' { ... }`
    fn parse_var_block(&mut self, ctx: &mut Context) -> PResult<Vec<NodeId>> {
        self.eat(TokenKind::Var)?;
        let mut out = Vec::new();
        while self.check(TokenKind::Identifier) {
            let mut names = vec![self.eat(TokenKind::Identifier)?];
            while self.check(TokenKind::Comma) {
                self.advance()?;
                names.push(self.eat(TokenKind::Identifier)?);
            }
            self.eat(TokenKind::Colon)?;
            let type_node = self.parse_type_spec(ctx)?;

            let mut initializer = None;
            if self.check(TokenKind::Equal) {
                self.advance()?;
                initializer = Some(self.parse_expression(ctx)?);
            }
            self.eat(TokenKind::Semicolon)?;

            for name_tok in names {
                let decl = self.new_node(AstKind::VarDecl, Some(name_tok));
                let type_copy = self.ast.copy(type_node);
                self.ast.set_right(decl, type_copy);
                if let Some(init) = initializer {
                    let init_copy = self.ast.copy(init);
                    self.ast.set_extra(decl, init_copy);
                }
                out.push(decl);
            }
        }
        Ok(out)
    }

    /// Type specifiers: identifiers (type references), `array[...] of T`,
    /// `record ... end`, `^T`, `(a, b, c)` enum literals, `set of T`,
    /// `procedure(...)`/`function(...): T` pointer types.
    fn parse_type_spec(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        match self.current.kind {
            TokenKind::Array => self.parse_array_type(ctx),
            TokenKind::Record => self.parse_record_type(ctx),
            TokenKind::Procedure | TokenKind::Function => self.parse_proc_ptr_type(ctx),
            TokenKind::Caret => {
                let tok = self.advance()?;
                let node = self.new_node(AstKind::PointerType, Some(tok));
                let base = self.parse_type_spec(ctx)?;
                self.ast.set_right(node, base);
                Ok(node)
            }
            TokenKind::Set => {
                let tok = self.advance()?;
                self.eat(TokenKind::Of)?;
                let node = self.new_node(AstKind::SetType, Some(tok));
                let base = self.parse_type_spec(ctx)?;
                self.ast.set_right(node, base);
                Ok(node)
            }
            TokenKind::LParen => {
                let tok = self.advance()?;
                let node = self.new_node(AstKind::EnumType, Some(tok));
                let mut ordinal = 0i64;
                loop {
                    let member_tok = self.eat(TokenKind::Identifier)?;
                    let member = self.new_node(AstKind::EnumValue, Some(member_tok));
                    self.ast.node_mut(member).i_val = ordinal;
                    self.ast.node_mut(member).var_type = VarType::Enum;
                    self.ast.add_child(node, member);
                    ordinal += 1;
                    if self.check(TokenKind::Comma) {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.eat(TokenKind::RParen)?;
                self.ast.node_mut(node).var_type = VarType::Enum;
                Ok(node)
            }
            TokenKind::Identifier => {
                let tok = self.advance()?;
                let node = self.new_node(AstKind::TypeReference, Some(tok.clone()));
                if let Some(type_id) = ctx.types.lookup(&tok.lexeme) {
                    self.ast.node_mut(node).type_ref = Some(type_id);
                }
                Ok(node)
            }
            _ => Err(ParseError::InvalidTypeSpecifier {
                found: self.current.lexeme.clone(),
            }),
        }
    }

    /// `array '[' subrange {',' subrange} ']' of type-spec` — or `array of
    /// type-spec` for an open-array parameter (no bounds).
    fn parse_array_type(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Array)?;
        let node = self.new_node(AstKind::ArrayType, Some(tok));
        if self.check(TokenKind::LBracket) {
            self.advance()?;
            loop {
                let bound = self.parse_subrange(ctx)?;
                self.ast.add_child(node, bound);
                if self.check(TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
            self.eat(TokenKind::RBracket)?;
        }
        self.eat(TokenKind::Of)?;
        let elem = self.parse_type_spec(ctx)?;
        self.ast.set_right(node, elem);
        self.ast.node_mut(node).var_type = VarType::Array;
        Ok(node)
    }

    /// `low '..' high`, each side must fold to an integer constant (§4.6
    /// array types; non-constant bounds are a hard parse error). The
    /// folded value replaces the original expression with a literal
    /// `Number` node, so a downstream consumer never has to re-fold a
    /// bound expressed as e.g. `N*2`.
    fn parse_subrange(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let low = self.parse_expression(ctx)?;
        self.eat(TokenKind::DotDot)?;
        let high = self.parse_expression(ctx)?;

        let low_val = const_fold::fold(&self.ast, ctx, low).as_ordinal();
        let high_val = const_fold::fold(&self.ast, ctx, high).as_ordinal();
        let (low_val, high_val) = match (low_val, high_val) {
            (Some(l), Some(h)) => (l, h),
            _ => return Err(ParseError::NonConstantArrayBound),
        };

        let node = self.new_node(AstKind::Subrange, None);
        let low_node = self.new_node(AstKind::Number, None);
        self.ast.node_mut(low_node).i_val = low_val;
        self.ast.node_mut(low_node).var_type = VarType::Int64;
        let high_node = self.new_node(AstKind::Number, None);
        self.ast.node_mut(high_node).i_val = high_val;
        self.ast.node_mut(high_node).var_type = VarType::Int64;
        self.ast.set_left(node, low_node);
        self.ast.set_right(node, high_node);
        Ok(node)
    }

    /// `record field-list end`
    fn parse_record_type(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Record)?;
        let node = self.new_node(AstKind::RecordType, Some(tok));
        self.ast.node_mut(node).var_type = VarType::Record;
        while !self.check(TokenKind::End) {
            if self.check(TokenKind::Procedure) || self.check(TokenKind::Function) {
                // `registerRecordMethodPrototype`'s grammar: a method signature
                // with no body, just like a `forward` routine declaration.
                let method = self.parse_routine_decl(ctx, true)?;
                self.ast.add_child(node, method);
                continue;
            }
            let mut names = vec![self.eat(TokenKind::Identifier)?];
            while self.check(TokenKind::Comma) {
                self.advance()?;
                names.push(self.eat(TokenKind::Identifier)?);
            }
            self.eat(TokenKind::Colon)?;
            let field_type = self.parse_type_spec(ctx)?;
            self.eat(TokenKind::Semicolon)?;
            for name_tok in names {
                let field = self.new_node(AstKind::VarDecl, Some(name_tok));
                let type_copy = self.ast.copy(field_type);
                self.ast.set_right(field, type_copy);
                self.ast.add_child(node, field);
            }
        }
        self.eat(TokenKind::End)?;
        Ok(node)
    }

    /// `(PROCEDURE|FUNCTION) '(' [ ident-list ':' type-spec {';' ...} ] ')' [':' type-spec]`.
    /// Params are stored as `VarDecl` children (name discarded by the
    /// annotator's signature check, only `right` matters); `right` on the
    /// node itself holds the return type, absent for a bare `procedure`.
    fn parse_proc_ptr_type(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let is_function = self.check(TokenKind::Function);
        let tok = self.advance()?;
        let node = self.new_node(AstKind::ProcPtrType, Some(tok));
        self.ast.node_mut(node).var_type = VarType::Pointer;

        if self.check(TokenKind::LParen) {
            self.advance()?;
            if !self.check(TokenKind::RParen) {
                loop {
                    let mut by_ref = false;
                    if self.check(TokenKind::Var) || self.check(TokenKind::Out) {
                        by_ref = true;
                        self.advance()?;
                    } else if self.check(TokenKind::Const) {
                        self.advance()?;
                    }
                    let mut names = vec![self.eat(TokenKind::Identifier)?];
                    while self.check(TokenKind::Comma) {
                        self.advance()?;
                        names.push(self.eat(TokenKind::Identifier)?);
                    }
                    self.eat(TokenKind::Colon)?;
                    let param_type = self.parse_type_spec(ctx)?;
                    for name_tok in names {
                        let param = self.new_node(AstKind::VarDecl, Some(name_tok));
                        self.ast.node_mut(param).flags.by_ref = by_ref;
                        let type_copy = self.ast.copy(param_type);
                        self.ast.set_right(param, type_copy);
                        self.ast.add_child(node, param);
                    }
                    if self.check(TokenKind::Semicolon) {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
            }
            self.eat(TokenKind::RParen)?;
        }

        if is_function {
            self.eat(TokenKind::Colon)?;
            let ret = self.parse_type_spec(ctx)?;
            self.ast.set_right(node, ret);
        }
        Ok(node)
    }

    /// `(PROCEDURE|FUNCTION) name param-list [':' type] ';' [directives] (body ';' | FORWARD ';')`.
    /// `forward_only` is set inside a unit's `interface` section, where a
    /// routine decl is always a signature with no body, `FORWARD` or not.
    fn parse_routine_decl(&mut self, ctx: &mut Context, forward_only: bool) -> PResult<NodeId> {
        let is_function = self.check(TokenKind::Function);
        let kw = self.advance()?;
        let mut name_tok = self.eat(TokenKind::Identifier)?;
        let lowered_name = name_tok.lexeme.to_ascii_lowercase();
        if is_builtin_name(&lowered_name) && !self.lexer.overridden_builtins().contains(&lowered_name) {
            self.warnings.push(format!(
                "declaration of '{}' shadows a built-in routine (silence with {{$OVERRIDE-BUILTIN {}}})",
                name_tok.lexeme, name_tok.lexeme
            ));
        }
        // `Class.Method` implements a method prototype a record declared
        // (registerRecordMethodPrototype's qualified key); the enclosing
        // routine's own name is stored as the whole dotted string so
        // `visit_routine_body` can recognize it and bind `myself`.
        while self.check(TokenKind::Period) {
            self.advance()?;
            let part = self.eat(TokenKind::Identifier)?;
            name_tok.lexeme = format!("{}.{}", name_tok.lexeme, part.lexeme);
        }
        let kind = if is_function { AstKind::FunctionDecl } else { AstKind::ProcedureDecl };
        let node = self.new_node(kind, Some(name_tok.clone()));
        let _ = kw;

        let param_list = self.new_node(AstKind::Compound, None);
        if self.check(TokenKind::LParen) {
            self.advance()?;
            if !self.check(TokenKind::RParen) {
                loop {
                    let group = self.parse_param_group(ctx)?;
                    for p in group {
                        self.ast.add_child(param_list, p);
                    }
                    if self.check(TokenKind::Semicolon) {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
            }
            self.eat(TokenKind::RParen)?;
        }
        self.ast.set_left(node, param_list);

        if is_function {
            self.eat(TokenKind::Colon)?;
            let ret = self.parse_type_spec(ctx)?;
            self.ast.set_right(node, ret);
        }
        self.eat(TokenKind::Semicolon)?;

        while self.check(TokenKind::Inline) || self.check(TokenKind::Virtual) {
            if self.check(TokenKind::Inline) {
                self.advance()?;
                self.ast.node_mut(node).flags.is_inline = true;
            } else {
                self.advance()?;
                self.ast.node_mut(node).flags.is_virtual = true;
            }
            self.eat(TokenKind::Semicolon)?;
        }

        if forward_only {
            if self.check(TokenKind::Forward) {
                self.advance()?;
                self.eat(TokenKind::Semicolon)?;
            }
            self.ast.node_mut(node).flags.is_forward_decl = true;
        } else if self.check(TokenKind::Forward) {
            self.advance()?;
            self.eat(TokenKind::Semicolon)?;
            self.ast.node_mut(node).flags.is_forward_decl = true;
        } else {
            ctx.push_local_scope();
            ctx.push_procedure_table();
            let body = self.parse_block(ctx)?;
            ctx.pop_procedure_table(false);
            ctx.pop_local_scope();
            self.ast.set_extra(node, body);
            self.eat(TokenKind::Semicolon)?;
        }

        Ok(node)
    }

    /// `[VAR|OUT|CONST] ident { ',' ident } ':' type`
    fn parse_param_group(&mut self, ctx: &mut Context) -> PResult<Vec<NodeId>> {
        let mut by_ref = false;
        if self.check(TokenKind::Var) || self.check(TokenKind::Out) {
            by_ref = true;
            self.advance()?;
        } else if self.check(TokenKind::Const) {
            self.advance()?;
        }

        let mut names = vec![self.eat(TokenKind::Identifier)?];
        while self.check(TokenKind::Comma) {
            self.advance()?;
            names.push(self.eat(TokenKind::Identifier)?);
        }
        self.eat(TokenKind::Colon)?;
        let type_node = self.parse_type_spec(ctx)?;

        let mut out = Vec::new();
        for name_tok in names {
            let decl = self.new_node(AstKind::VarDecl, Some(name_tok));
            self.ast.node_mut(decl).flags.by_ref = by_ref;
            let type_copy = self.ast.copy(type_node);
            if self.ast.node(type_copy).kind == AstKind::ArrayType {
                self.ast.node_mut(decl).var_type = VarType::Array;
            }
            self.ast.set_right(decl, type_copy);
            out.push(decl);
        }
        Ok(out)
    }

    // --- statements --------------------------------------------------------

    /// `BEGIN statement { ';' statement } END` — the
    /// WantingStatement/HaveStatement/NeedSeparatorOrEnd state machine from
    /// the spec's state-machines summary.
    fn parse_compound_statement(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Begin)?;
        let node = self.new_node(AstKind::Compound, Some(tok));
        if !self.check(TokenKind::End) {
            loop {
                let stmt = self.parse_statement(ctx)?;
                self.ast.add_child(node, stmt);
                if self.check(TokenKind::Semicolon) {
                    self.advance()?;
                    if self.check(TokenKind::End) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::End)?;
        Ok(node)
    }

    fn parse_statement(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        match self.current.kind {
            TokenKind::Begin => self.parse_compound_statement(ctx),
            TokenKind::If => self.parse_if(ctx),
            TokenKind::While => self.parse_while(ctx),
            TokenKind::For => self.parse_for(ctx),
            TokenKind::Repeat => self.parse_repeat(ctx),
            TokenKind::Case => self.parse_case(ctx),
            TokenKind::Break => {
                let tok = self.advance()?;
                Ok(self.new_node(AstKind::Break, Some(tok)))
            }
            TokenKind::Goto => {
                let tok = self.advance()?;
                let label = self.eat(TokenKind::IntegerConst)?;
                let node = self.new_node(AstKind::Goto, Some(tok));
                let label_node = self.new_node(AstKind::Label, Some(label));
                self.ast.set_left(node, label_node);
                Ok(node)
            }
            TokenKind::Write | TokenKind::Writeln => self.parse_write(ctx),
            TokenKind::Read | TokenKind::Readln => self.parse_read(ctx),
            TokenKind::Spawn => self.parse_spawn(ctx),
            TokenKind::Join => self.parse_join(ctx),
            _ => self.parse_simple_statement(ctx),
        }
    }

    fn parse_if(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::If)?;
        let node = self.new_node(AstKind::If, Some(tok));
        let cond = self.parse_expression(ctx)?;
        self.ast.set_left(node, cond);
        self.eat(TokenKind::Then)?;
        let then_branch = self.parse_statement(ctx)?;
        self.ast.set_right(node, then_branch);
        if self.check(TokenKind::Else) {
            self.advance()?;
            let else_branch = self.parse_statement(ctx)?;
            self.ast.set_extra(node, else_branch);
        }
        Ok(node)
    }

    fn parse_while(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::While)?;
        let node = self.new_node(AstKind::While, Some(tok));
        let cond = self.parse_expression(ctx)?;
        self.ast.set_left(node, cond);
        self.eat(TokenKind::Do)?;
        let body = self.parse_statement(ctx)?;
        self.ast.set_right(node, body);
        Ok(node)
    }

    fn parse_for(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::For)?;
        let var_tok = self.eat(TokenKind::Identifier)?;
        let var_node = self.new_node(AstKind::Variable, Some(var_tok));
        self.eat(TokenKind::Assign)?;
        let from = self.parse_expression(ctx)?;

        let downto = self.check(TokenKind::Downto);
        if downto {
            self.advance()?;
        } else {
            self.eat(TokenKind::To)?;
        }
        let to = self.parse_expression(ctx)?;
        self.eat(TokenKind::Do)?;
        let body = self.parse_statement(ctx)?;

        let kind = if downto { AstKind::ForDownto } else { AstKind::ForTo };
        let node = self.new_node(kind, Some(tok));
        self.ast.set_left(node, var_node);
        let range = self.new_node(AstKind::Subrange, None);
        self.ast.set_left(range, from);
        self.ast.set_right(range, to);
        self.ast.set_right(node, range);
        self.ast.set_extra(node, body);
        Ok(node)
    }

    fn parse_repeat(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Repeat)?;
        let node = self.new_node(AstKind::Repeat, Some(tok));
        if !self.check(TokenKind::Until) {
            loop {
                let stmt = self.parse_statement(ctx)?;
                self.ast.add_child(node, stmt);
                if self.check(TokenKind::Semicolon) {
                    self.advance()?;
                    if self.check(TokenKind::Until) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::Until)?;
        let cond = self.parse_expression(ctx)?;
        self.ast.set_right(node, cond);
        Ok(node)
    }

    fn parse_case(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Case)?;
        let node = self.new_node(AstKind::Case, Some(tok));
        let subject = self.parse_expression(ctx)?;
        self.ast.set_left(node, subject);
        self.eat(TokenKind::Of)?;

        while !self.check(TokenKind::End) && !self.check(TokenKind::Else) {
            let branch = self.new_node(AstKind::CaseBranch, None);
            let mut labels = Vec::new();
            loop {
                let label = self.parse_expression(ctx)?;
                if const_fold::fold(&self.ast, ctx, label).is_void() {
                    return Err(ParseError::BadCaseLabel);
                }
                labels.push(label);
                if self.check(TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
            // A single label is stored directly on `left`; two or more are
            // wrapped in a `Compound` so `case_labels` can normalize both
            // shapes for callers that don't want to special-case arity 1.
            if labels.len() == 1 {
                self.ast.set_left(branch, labels[0]);
            } else {
                let wrapper = self.new_node(AstKind::Compound, None);
                for label in labels {
                    self.ast.add_child(wrapper, label);
                }
                self.ast.set_left(branch, wrapper);
            }
            self.eat(TokenKind::Colon)?;
            let body = self.parse_statement(ctx)?;
            self.ast.set_right(branch, body);
            self.ast.add_child(node, branch);
            if self.check(TokenKind::Semicolon) {
                self.advance()?;
            }
        }
        if self.check(TokenKind::Else) {
            self.advance()?;
            let else_body = self.parse_statement(ctx)?;
            self.ast.set_extra(node, else_body);
            if self.check(TokenKind::Semicolon) {
                self.advance()?;
            }
        }
        self.eat(TokenKind::End)?;
        Ok(node)
    }

    fn parse_write(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let is_ln = self.check(TokenKind::Writeln);
        let tok = self.advance()?;
        let kind = if is_ln { AstKind::Writeln } else { AstKind::Write };
        let node = self.new_node(kind, Some(tok));
        if self.check(TokenKind::LParen) {
            self.advance()?;
            if !self.check(TokenKind::RParen) {
                loop {
                    let arg = self.parse_write_arg(ctx)?;
                    self.ast.add_child(node, arg);
                    if self.check(TokenKind::Comma) {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
            }
            self.eat(TokenKind::RParen)?;
        }
        Ok(node)
    }

    /// An argument optionally followed by `:width[:precision]`; the pair is
    /// attached as an `AST_FORMATTED_EXPR` wrapper whose token's lexeme is
    /// `"width,precision"`.
    fn parse_write_arg(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let expr = self.parse_expression(ctx)?;
        if self.check(TokenKind::Colon) {
            self.advance()?;
            let width = self.parse_expression(ctx)?;
            let mut precision = None;
            if self.check(TokenKind::Colon) {
                self.advance()?;
                precision = Some(self.parse_expression(ctx)?);
            }
            let width_val = const_fold::fold(&self.ast, ctx, width);
            let precision_val = precision.map(|p| const_fold::fold(&self.ast, ctx, p));
            let lexeme = match (width_val.as_ordinal(), precision_val.and_then(|v| v.as_ordinal())) {
                (Some(w), Some(p)) => format!("{},{}", w, p),
                (Some(w), None) => format!("{}", w),
                _ => String::new(),
            };
            let wrapper = self.new_node(
                AstKind::FormattedExpr,
                Some(Token::new(TokenKind::Colon, lexeme, 0, 0)),
            );
            self.ast.set_left(wrapper, expr);
            return Ok(wrapper);
        }
        Ok(expr)
    }

    fn parse_read(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let is_ln = self.check(TokenKind::Readln);
        let tok = self.advance()?;
        let kind = if is_ln { AstKind::Readln } else { AstKind::Read };
        let node = self.new_node(kind, Some(tok));
        if self.check(TokenKind::LParen) {
            self.advance()?;
            if !self.check(TokenKind::RParen) {
                loop {
                    let lv = self.parse_lvalue(ctx)?;
                    self.ast.add_child(node, lv);
                    if self.check(TokenKind::Comma) {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
            }
            self.eat(TokenKind::RParen)?;
        }
        Ok(node)
    }

    fn parse_spawn(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Spawn)?;
        let node = self.new_node(AstKind::ThreadSpawn, Some(tok));
        let call = self.parse_expression(ctx)?;
        self.ast.set_left(node, call);
        Ok(node)
    }

    fn parse_join(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::Join)?;
        let node = self.new_node(AstKind::ThreadJoin, Some(tok));
        let handle = self.parse_expression(ctx)?;
        self.ast.set_left(node, handle);
        Ok(node)
    }

    /// An lvalue-led statement: `lvalue := expr`, `lvalue += expr`,
    /// `lvalue -= expr` (desugared to `lhs := lhs op rhs`), or a bare
    /// procedure-call statement.
    fn parse_simple_statement(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let lvalue = self.parse_lvalue(ctx)?;

        match self.current.kind {
            TokenKind::Assign => {
                let tok = self.advance()?;
                let rhs = self.parse_expression(ctx)?;
                let node = self.new_node(AstKind::Assign, Some(tok));
                self.ast.set_left(node, lvalue);
                self.ast.set_right(node, rhs);
                Ok(node)
            }
            TokenKind::PlusEqual | TokenKind::MinusEqual => {
                let op_kind = self.current.kind;
                let tok = self.advance()?;
                let rhs = self.parse_expression(ctx)?;
                let op_str = if op_kind == TokenKind::PlusEqual { "+" } else { "-" };
                let binop_tok = Token::new(
                    if op_kind == TokenKind::PlusEqual { TokenKind::Plus } else { TokenKind::Minus },
                    op_str,
                    tok.line,
                    tok.column,
                );
                let lhs_copy = self.ast.copy(lvalue);
                let binop = self.new_node(AstKind::BinaryOp, Some(binop_tok));
                self.ast.set_left(binop, lhs_copy);
                self.ast.set_right(binop, rhs);

                let assign = self.new_node(AstKind::Assign, Some(Token::new(TokenKind::Assign, ":=", tok.line, tok.column)));
                self.ast.set_left(assign, lvalue);
                self.ast.set_right(assign, binop);
                Ok(assign)
            }
            _ => {
                // A bare identifier (with or without arguments) is a
                // procedure-call statement; rewrite the Variable node in
                // place if no call args were consumed by parse_lvalue.
                if self.ast.node(lvalue).kind == AstKind::Variable {
                    self.ast.node_mut(lvalue).kind = AstKind::ProcedureCall;
                }
                Ok(lvalue)
            }
        }
    }

    /// `ident { '.' ident | '[' expr {',' expr} ']' | '^' | '(' args ')' }`
    fn parse_lvalue(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let name_tok = self.eat(TokenKind::Identifier)?;
        let mut node = self.new_node(AstKind::Variable, Some(name_tok));

        loop {
            match self.current.kind {
                TokenKind::Period => {
                    let tok = self.advance()?;
                    let field_tok = self.eat(TokenKind::Identifier)?;
                    let field = self.new_node(AstKind::FieldAccess, Some(field_tok));
                    let _ = tok;
                    self.ast.set_left(field, node);
                    node = field;
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let access = self.new_node(AstKind::ArrayAccess, None);
                    self.ast.set_left(access, node);
                    loop {
                        let idx = self.parse_expression(ctx)?;
                        self.ast.add_child(access, idx);
                        if self.check(TokenKind::Comma) {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                    self.eat(TokenKind::RBracket)?;
                    node = access;
                }
                TokenKind::Caret => {
                    let tok = self.advance()?;
                    let deref = self.new_node(AstKind::Dereference, Some(tok));
                    self.ast.set_left(deref, node);
                    node = deref;
                }
                TokenKind::LParen => {
                    self.advance()?;
                    // `TypeName.Method(...)` is a static call into a record
                    // method prototype (§4.6's "recordname.methodname"
                    // qualified key) rather than a field access followed by
                    // a call: when the field-access base names a known type
                    // rather than a variable, rebuild the qualified name
                    // instead of dropping the type-name prefix.
                    let call_token = if self.ast.node(node).kind == AstKind::FieldAccess {
                        let base = self.ast.node(node).left;
                        let base_is_type = base
                            .and_then(|b| self.ast.node(b).token.as_ref())
                            .map(|t| ctx.types.lookup(&t.lexeme).is_some())
                            .unwrap_or(false);
                        if base_is_type {
                            let base_name = base
                                .and_then(|b| self.ast.node(b).token.clone())
                                .map(|t| t.lexeme)
                                .unwrap_or_default();
                            self.ast.node(node).token.clone().map(|mut field_tok| {
                                field_tok.lexeme = format!("{}.{}", base_name, field_tok.lexeme);
                                field_tok
                            })
                        } else {
                            self.ast.node(node).token.clone()
                        }
                    } else {
                        self.ast.node(node).token.clone()
                    };
                    let call = self.new_node(AstKind::ProcedureCall, call_token);
                    if !self.check(TokenKind::RParen) {
                        loop {
                            let arg = self.parse_expression(ctx)?;
                            self.ast.add_child(call, arg);
                            if self.check(TokenKind::Comma) {
                                self.advance()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.eat(TokenKind::RParen)?;
                    node = call;
                }
                _ => break,
            }
        }
        Ok(node)
    }

    // --- expressions ---------------------------------------------------

    /// `relational-expression [ '?' expression ':' expression ]`
    fn parse_expression(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let cond = self.parse_relational(ctx)?;
        if self.check(TokenKind::Question) {
            let tok = self.advance()?;
            let then_branch = self.parse_expression(ctx)?;
            self.eat(TokenKind::Colon)?;
            let else_branch = self.parse_expression(ctx)?;
            let node = self.new_node(AstKind::Ternary, Some(tok));
            self.ast.set_left(node, cond);
            self.ast.set_right(node, then_branch);
            self.ast.set_extra(node, else_branch);
            return Ok(node);
        }
        Ok(cond)
    }

    fn is_relational_op(kind: TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::In
        )
    }

    fn parse_relational(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let mut lhs = self.parse_simple_expression(ctx)?;
        while Self::is_relational_op(self.current.kind) {
            let tok = self.advance()?;
            let rhs = self.parse_simple_expression(ctx)?;
            let node = self.new_node(AstKind::BinaryOp, Some(tok));
            self.ast.set_left(node, lhs);
            self.ast.set_right(node, rhs);
            lhs = node;
        }
        Ok(lhs)
    }

    /// `[sign] term { (+ | - | OR | XOR) term }`
    fn parse_simple_expression(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let mut lhs = if self.check(TokenKind::Plus) || self.check(TokenKind::Minus) {
            let tok = self.advance()?;
            let operand = self.parse_term(ctx)?;
            let node = self.new_node(AstKind::UnaryOp, Some(tok));
            self.ast.set_left(node, operand);
            node
        } else {
            self.parse_term(ctx)?
        };

        while matches!(self.current.kind, TokenKind::Plus | TokenKind::Minus | TokenKind::Or | TokenKind::Xor) {
            let tok = self.advance()?;
            let rhs = self.parse_term(ctx)?;
            let node = self.new_node(AstKind::BinaryOp, Some(tok));
            self.ast.set_left(node, lhs);
            self.ast.set_right(node, rhs);
            lhs = node;
        }
        Ok(lhs)
    }

    /// `factor { (* | / | DIV | MOD | AND | SHL | SHR) factor }`
    fn parse_term(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let mut lhs = self.parse_factor(ctx)?;
        while matches!(
            self.current.kind,
            TokenKind::Mul | TokenKind::Slash | TokenKind::Div | TokenKind::Mod | TokenKind::And | TokenKind::Shl | TokenKind::Shr
        ) {
            let tok = self.advance()?;
            let rhs = self.parse_factor(ctx)?;
            let node = self.new_node(AstKind::BinaryOp, Some(tok));
            self.ast.set_left(node, lhs);
            self.ast.set_right(node, rhs);
            lhs = node;
        }
        Ok(lhs)
    }

    /// literals; `@lvalue`; `NIL`/`TRUE`/`FALSE`; `NOT factor`; `(expr)`;
    /// set constructor; `lvalue` with optional call args; `factor (AS|IS)
    /// type-ref`; adjacent string-literal concatenation.
    fn parse_factor(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let mut node = self.parse_factor_primary(ctx)?;

        while self.check(TokenKind::As) || self.check(TokenKind::Is) {
            let tok = self.advance()?;
            let type_node = self.parse_type_spec(ctx)?;
            let assertion = self.new_node(AstKind::TypeAssert, Some(tok));
            self.ast.set_left(assertion, node);
            self.ast.set_right(assertion, type_node);
            node = assertion;
        }
        Ok(node)
    }

    fn parse_factor_primary(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        match self.current.kind {
            TokenKind::IntegerConst | TokenKind::RealConst | TokenKind::HexConst => {
                let tok = self.advance()?;
                let node = self.new_node(AstKind::Number, Some(tok.clone()));
                if tok.kind != TokenKind::RealConst {
                    let radix = if tok.kind == TokenKind::HexConst { 16 } else { 10 };
                    self.ast.node_mut(node).i_val = i64::from_str_radix(&tok.lexeme, radix).unwrap_or(0);
                }
                Ok(node)
            }
            TokenKind::StringConst => self.parse_string_concatenation(),
            TokenKind::True | TokenKind::False => {
                let tok = self.advance()?;
                Ok(self.new_node(AstKind::Boolean, Some(tok)))
            }
            TokenKind::Nil => {
                let tok = self.advance()?;
                Ok(self.new_node(AstKind::Nil, Some(tok)))
            }
            TokenKind::Not => {
                let tok = self.advance()?;
                let operand = self.parse_factor(ctx)?;
                let node = self.new_node(AstKind::UnaryOp, Some(tok));
                self.ast.set_left(node, operand);
                Ok(node)
            }
            TokenKind::At => {
                let tok = self.advance()?;
                let target = self.parse_lvalue(ctx)?;
                let node = self.new_node(AstKind::AddrOf, Some(tok));
                self.ast.set_left(node, target);
                Ok(node)
            }
            TokenKind::LParen => {
                self.advance()?;
                let inner = self.parse_expression(ctx)?;
                self.eat(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_set_constructor(ctx),
            TokenKind::Identifier => self.parse_lvalue(ctx),
            _ => Err(ParseError::UnexpectedToken {
                found: self.current.lexeme.clone(),
                expected: "an expression".to_string(),
            }),
        }
    }

    /// Adjacent string literals concatenate; the combined literal becomes
    /// `Char` only if the result is one byte and every segment was a `#nn`
    /// char code.
    fn parse_string_concatenation(&mut self) -> PResult<NodeId> {
        let mut combined = String::new();
        let mut all_char_codes = true;
        let first_tok = self.current.clone();
        loop {
            if !self.check(TokenKind::StringConst) {
                break;
            }
            let tok = self.advance()?;
            combined.push_str(&tok.lexeme);
            all_char_codes &= tok.is_char_code;
        }
        let mut merged_tok = first_tok;
        merged_tok.lexeme = combined.clone();
        merged_tok.is_char_code = all_char_codes && combined.chars().count() == 1;

        let node = self.new_node(AstKind::StringLit, Some(merged_tok.clone()));
        self.ast.node_mut(node).var_type = if merged_tok.is_char_code {
            VarType::Char
        } else {
            VarType::String
        };
        Ok(node)
    }

    /// `'[' [ set-element {',' set-element} ] ']'`, each element a subrange
    /// or a single expression.
    fn parse_set_constructor(&mut self, ctx: &mut Context) -> PResult<NodeId> {
        let tok = self.eat(TokenKind::LBracket)?;
        let node = self.new_node(AstKind::Set, Some(tok));
        if !self.check(TokenKind::RBracket) {
            loop {
                let lo = self.parse_expression(ctx)?;
                if self.check(TokenKind::DotDot) {
                    self.advance()?;
                    let hi = self.parse_expression(ctx)?;
                    let range = self.new_node(AstKind::Subrange, None);
                    self.ast.set_left(range, lo);
                    self.ast.set_right(range, hi);
                    self.ast.add_child(node, range);
                } else {
                    self.ast.add_child(node, lo);
                }
                if self.check(TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RBracket)?;
        self.ast.node_mut(node).var_type = VarType::Set;
        Ok(node)
    }

    pub fn finish(self) -> (Ast, WithSource<ParseError>) {
        let source = self.source.to_string();
        let errors = self.errors;
        (self.ast, WithSource::new(errors, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Ast, NodeId) {
        let mut ctx = Context::new();
        let mut parser = Parser::new(src).expect("lex ok");
        let root = parser.parse_program(&mut ctx).expect("parse ok");
        (parser.ast, root)
    }

    #[test]
    fn parses_minimal_program() {
        let (ast, root) = parse("program Hello; begin end.");
        assert_eq!(ast.node(root).kind, AstKind::Program);
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let (ast, root) = parse("program P; var x: integer; begin x := 1 + 2 * 3 end.");
        let block = ast.node(root).right.unwrap();
        let body = ast.node(block).children[1];
        let assign = ast.node(body).children[0];
        let rhs = ast.node(assign).right.unwrap();
        assert_eq!(ast.node(rhs).kind, AstKind::BinaryOp);
        assert_eq!(ast.node(rhs).token.as_ref().unwrap().kind, TokenKind::Plus);
    }

    #[test]
    fn compound_assignment_desugars_to_binary_op() {
        let (ast, root) = parse("program P; var x: integer; begin x += 5 end.");
        let block = ast.node(root).right.unwrap();
        let body = ast.node(block).children[1];
        let assign = ast.node(body).children[0];
        assert_eq!(ast.node(assign).kind, AstKind::Assign);
        let rhs = ast.node(assign).right.unwrap();
        assert_eq!(ast.node(rhs).kind, AstKind::BinaryOp);
        assert_eq!(ast.node(rhs).token.as_ref().unwrap().kind, TokenKind::Plus);
    }

    #[test]
    fn non_constant_array_bound_is_a_parse_error() {
        let mut ctx = Context::new();
        let mut parser = Parser::new("program P; var n: integer; var a: array[1..n] of integer; begin end.").unwrap();
        assert!(parser.parse_program(&mut ctx).is_err());
    }

    #[test]
    fn bare_identifier_statement_becomes_procedure_call() {
        let (ast, root) = parse("program P; begin DoSomething end.");
        let block = ast.node(root).right.unwrap();
        let body = ast.node(block).children[1];
        let stmt = ast.node(body).children[0];
        assert_eq!(ast.node(stmt).kind, AstKind::ProcedureCall);
    }

    #[test]
    fn parses_unit_with_forward_only_interface_routine() {
        let mut ctx = Context::new();
        let src = "unit MathUtils;\ninterface\nfunction Double(x: integer): integer;\nimplementation\nfunction Double(x: integer): integer;\nbegin\nend;\nend.\n";
        let mut parser = Parser::new(src).expect("lex ok");
        let root = parser.parse_unit(&mut ctx).expect("parse ok");
        assert_eq!(parser.ast.node(root).kind, AstKind::Unit);

        let interface_block = parser.ast.node(root).right.unwrap();
        let interface_decls = parser.ast.node(interface_block).children[0];
        let interface_routine = parser.ast.node(interface_decls).children[0];
        assert!(parser.ast.node(interface_routine).flags.is_forward_decl);
        assert!(parser.ast.node(interface_routine).extra.is_none());

        let impl_block = parser.ast.node(root).extra.unwrap();
        let impl_decls = parser.ast.node(impl_block).children[0];
        let impl_routine = parser.ast.node(impl_decls).children[0];
        assert!(parser.ast.node(impl_routine).extra.is_some());
    }

    #[test]
    fn parses_unit_with_no_implementation_body() {
        let mut ctx = Context::new();
        let src = "unit Empty;\ninterface\nimplementation\nend.\n";
        let mut parser = Parser::new(src).expect("lex ok");
        let root = parser.parse_unit(&mut ctx).expect("parse ok");
        assert_eq!(parser.ast.node(root).kind, AstKind::Unit);
    }
}
