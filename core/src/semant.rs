//! C7: the semantic annotator. Walks a parsed [`Ast`] bottom-up, resolving
//! identifiers, inferring expression types, and checking assignment
//! compatibility (§4.7). Errors are collected, not short-circuited, so one
//! run surfaces every diagnostic it can find.

use crate::ast::{Ast, AstKind, NodeId};
use crate::error::{SemanticError, SourceErrorWrapper, WithSource};
use crate::lexer::Span;
use crate::symbol::{Context, Symbol};
use crate::token::TokenKind;
use crate::value::{VarType, Value};

/// Resolves a builtin (non-user-defined) type-name spelling to its
/// [`VarType`]. User-defined names are resolved through `ctx.types` instead.
fn builtin_type_name(name: &str) -> Option<VarType> {
    Some(match name.to_ascii_lowercase().as_str() {
        "integer" | "int64" => VarType::Int64,
        "int32" | "longint" => VarType::Int32,
        "int16" | "smallint" => VarType::Int16,
        "int8" | "shortint" => VarType::Int8,
        "uint64" | "qword" => VarType::UInt64,
        "uint32" | "cardinal" | "dword" => VarType::UInt32,
        "uint16" => VarType::UInt16,
        "uint8" => VarType::UInt8,
        "byte" => VarType::Byte,
        "word" => VarType::Word,
        "real" | "float64" | "double" => VarType::Float64,
        "single" | "float32" => VarType::Float32,
        "extended" | "float80" => VarType::Float80,
        "char" => VarType::Char,
        "string" => VarType::String,
        "boolean" => VarType::Boolean,
        "file" | "text" => VarType::File,
        "memorystream" => VarType::MemoryStream,
        "thread" => VarType::Thread,
        _ => return None,
    })
}

/// The return type of a builtin routine, where it does not simply inherit
/// its first argument's type (those are handled specially in
/// `annotate_call`: `succ`/`pred`/`low`/`high`/`abs`).
fn builtin_return_type(name: &str) -> Option<VarType> {
    Some(match name.to_ascii_lowercase().as_str() {
        "chr" => VarType::Char,
        "ord" | "length" | "sizeof" | "pos" => VarType::Int64,
        "upcase" => VarType::Char,
        "copy" | "concat" | "uppercase" | "lowercase" | "inttostr" | "realtostr" => VarType::String,
        "random" => VarType::Float64,
        "odd" | "eof" | "eoln" => VarType::Boolean,
        "write" | "writeln" | "read" | "readln" | "new" | "dispose" | "halt" | "inc" | "dec" => VarType::Void,
        _ => return None,
    })
}

/// Whether `name` names a built-in routine, for the "overriding built-ins"
/// warning (§4.6): either one of `builtin_return_type`'s names, or one of
/// the ordinal/numeric builtins `visit_call` special-cases directly.
pub(crate) fn is_builtin_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    matches!(lowered.as_str(), "succ" | "pred" | "low" | "high" | "abs") || builtin_return_type(&lowered).is_some()
}

/// Walks the AST rooted at `root` (expected to be an `AST_PROGRAM` node,
/// though any block-bearing node works) and annotates every node's
/// `var_type`/`type_def` in place. Returns every diagnostic collected along
/// the way rather than stopping at the first.
pub fn annotate(
    ast: &mut Ast,
    ctx: &mut Context,
    root: NodeId,
    source: &str,
) -> Result<(), WithSource<SemanticError>> {
    let mut annotator = Annotator {
        errors: Vec::new(),
        source,
    };
    annotator.visit_program(ast, ctx, root);
    if annotator.errors.is_empty() {
        Ok(())
    } else {
        Err(WithSource::new(annotator.errors, source.to_string()))
    }
}

/// Annotates an `AST_UNIT` node (§4.8): the interface section's
/// declarations are only *registered* (so the implementation and any
/// importing program see routine/var signatures), never walked into bodies
/// — interface routines are forward declarations. The implementation
/// section is registered and walked in full, including its own
/// initialization body if present.
pub fn annotate_unit(
    ast: &mut Ast,
    ctx: &mut Context,
    unit: NodeId,
    source: &str,
) -> Result<(), WithSource<SemanticError>> {
    let mut annotator = Annotator {
        errors: Vec::new(),
        source,
    };
    if let Some(interface_block) = ast.node(unit).right {
        if let Some(decls) = ast.node(interface_block).children.first().copied() {
            annotator.register_declarations(ast, ctx, decls, true);
        }
    }
    if let Some(impl_block) = ast.node(unit).extra {
        annotator.visit_block(ast, ctx, impl_block, true);
    }
    if annotator.errors.is_empty() {
        Ok(())
    } else {
        Err(WithSource::new(annotator.errors, source.to_string()))
    }
}

struct Annotator<'s> {
    errors: Vec<SourceErrorWrapper<SemanticError>>,
    source: &'s str,
}

impl<'s> Annotator<'s> {
    fn error(&mut self, ctx: &mut Context, span: Span, err: SemanticError) {
        ctx.semantic_error_count += 1;
        self.errors.push(SourceErrorWrapper::new(err, span, self.source));
    }

    fn visit_program(&mut self, ast: &mut Ast, ctx: &mut Context, program: NodeId) {
        if let Some(block) = ast.node(program).right {
            self.visit_block(ast, ctx, block, true);
        }
    }

    fn visit_block(&mut self, ast: &mut Ast, ctx: &mut Context, block: NodeId, is_global: bool) {
        let decls = ast.node(block).children.first().copied();
        let body = ast.node(block).children.get(1).copied();

        if let Some(decls) = decls {
            self.register_declarations(ast, ctx, decls, is_global);
        }
        if let Some(body) = body {
            self.visit_statement(ast, ctx, body);
        }
    }

    /// First pass over a `declarations` compound: registers every const,
    /// type, var, and routine symbol into the right scope before any
    /// statement is annotated, so forward references within the same block
    /// resolve (§4.7's "nearest COMPOUND-or-routine scope" rule).
    fn register_declarations(&mut self, ast: &mut Ast, ctx: &mut Context, decls: NodeId, is_global: bool) {
        let children = ast.node(decls).children.clone();

        // Pass 1: every name (vars and routine signatures) goes into scope
        // before any routine body is walked, so mutually-recursive routines
        // declared in either order resolve each other.
        for &child in &children {
            match ast.node(child).kind {
                AstKind::VarDecl => self.register_var_decl(ast, ctx, child, is_global, false),
                AstKind::ProcedureDecl | AstKind::FunctionDecl => self.register_routine(ast, ctx, child),
                AstKind::TypeDecl => self.register_type_decl(ast, ctx, child, is_global),
                _ => {}
            }
        }

        // Pass 2: walk each routine's own parameter list and body.
        for &child in &children {
            if matches!(ast.node(child).kind, AstKind::ProcedureDecl | AstKind::FunctionDecl) {
                self.visit_routine_body(ast, ctx, child);
            }
        }
    }

    fn register_var_decl(&mut self, ast: &mut Ast, ctx: &mut Context, decl: NodeId, is_global: bool, is_const: bool) {
        let type_node = match ast.node(decl).right {
            Some(t) => t,
            None => return,
        };
        let var_type = self.resolve_type_node(ast, ctx, type_node);
        ast.node_mut(decl).var_type = var_type;

        let name = ast
            .node(decl)
            .token
            .as_ref()
            .map(|t| t.lexeme.clone())
            .unwrap_or_default();
        let mut symbol = Symbol::new(&name, var_type, Some(type_node));
        symbol.is_const = is_const;

        if let Some(init) = ast.node(decl).extra {
            self.visit_expr(ast, ctx, init);
        }

        if is_global {
            ctx.global.insert(symbol);
        } else {
            ctx.locals_top_mut().insert(symbol);
        }
    }

    /// An `enum color = (red, green, blue)` declaration makes each member
    /// a globally-visible constant, not just a shape in the type registry —
    /// the parser already stamped each `EnumValue` child's ordinal (§4.6);
    /// this publishes them as symbols and compile-time values so `green`
    /// resolves the same way `N` in a `const` block does.
    fn register_type_decl(&mut self, ast: &mut Ast, ctx: &mut Context, decl: NodeId, is_global: bool) {
        let type_node = match ast.node(decl).right {
            Some(t) => t,
            None => return,
        };
        if ast.node(type_node).kind == AstKind::RecordType {
            self.register_record_methods(ast, ctx, decl, type_node);
            return;
        }
        if ast.node(type_node).kind != AstKind::EnumType {
            return;
        }
        let type_name = ast
            .node(decl)
            .token
            .as_ref()
            .map(|t| t.lexeme.clone())
            .unwrap_or_default();
        let members = ast.node(type_node).children.clone();
        for member in members {
            let member_name = ast
                .node(member)
                .token
                .as_ref()
                .map(|t| t.lexeme.clone())
                .unwrap_or_default();
            let ordinal = ast.node(member).i_val;
            let value = Value::Enum {
                type_name: type_name.clone(),
                name: member_name.clone(),
                ordinal,
            };

            let mut symbol = Symbol::new(&member_name, VarType::Enum, Some(member));
            symbol.is_const = true;
            *symbol.value.borrow_mut() = value.clone();
            if is_global {
                ctx.global.insert(symbol);
            } else {
                ctx.locals_top_mut().insert(symbol);
            }
            ctx.const_table.insert(member_name.to_ascii_lowercase(), value);
        }
    }

    /// A `record ... end`'s method prototypes are registered under
    /// `recordname.methodname`-qualified names, mirroring the original's
    /// `registerRecordMethods`/`registerRecordMethodPrototype`. Each
    /// prototype is a `ProcedureDecl`/`FunctionDecl` child of the record's
    /// type node, parsed `forward_only` (no body); the prototype node itself
    /// is never visited (it has no body and isn't a top-level decl). A
    /// separately declared `procedure RecordName.MethodName; ... end;`
    /// carries the same qualified name and its own `ProcedureDecl`, which
    /// pass 2 does visit as an ordinary top-level routine.
    fn register_record_methods(&mut self, ast: &mut Ast, ctx: &mut Context, decl: NodeId, record_type: NodeId) {
        let record_name = ast
            .node(decl)
            .token
            .as_ref()
            .map(|t| t.lexeme.clone())
            .unwrap_or_default();
        let methods = ast
            .node(record_type)
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(ast.node(c).kind, AstKind::ProcedureDecl | AstKind::FunctionDecl))
            .collect::<Vec<_>>();
        for method in methods {
            let method_name = ast
                .node(method)
                .token
                .as_ref()
                .map(|t| t.lexeme.clone())
                .unwrap_or_default();
            let qualified_name = format!("{}.{}", record_name, method_name);
            let ret_type = if ast.node(method).kind == AstKind::FunctionDecl {
                ast.node(method)
                    .right
                    .map(|t| self.resolve_type_node(ast, ctx, t))
                    .unwrap_or(VarType::Void)
            } else {
                VarType::Void
            };
            let symbol = Symbol::new(&qualified_name, ret_type, Some(method));
            ctx.procedures_top_mut().insert(symbol);
        }
    }

    /// Registers a routine's name (so recursive and forward calls resolve)
    /// into the enclosing procedure table, without yet descending into its
    /// body.
    fn register_routine(&mut self, ast: &mut Ast, ctx: &mut Context, decl: NodeId) {
        let name = ast
            .node(decl)
            .token
            .as_ref()
            .map(|t| t.lexeme.clone())
            .unwrap_or_default();
        let ret_type = if ast.node(decl).kind == AstKind::FunctionDecl {
            ast.node(decl)
                .right
                .map(|t| self.resolve_type_node(ast, ctx, t))
                .unwrap_or(VarType::Void)
        } else {
            VarType::Void
        };
        let symbol = Symbol::new(&name, ret_type, Some(decl));
        ctx.procedures_top_mut().insert(symbol);
    }

    /// Descends into a routine's own parameter list and body in a fresh
    /// local scope, then discards that scope on exit (parameters and
    /// locals are not visible to sibling declarations).
    fn visit_routine_body(&mut self, ast: &mut Ast, ctx: &mut Context, decl: NodeId) {
        let params = ast.node(decl).left;
        let body = ast.node(decl).extra;
        if body.is_none() {
            return; // forward declaration only
        }

        ctx.push_local_scope();
        ctx.push_procedure_table();
        let prev_function = ctx.current_function.take();
        ctx.current_function = ast.node(decl).token.as_ref().map(|t| t.lexeme.clone());

        // `Class.Method`'s own name carries a '.' — bind the implicit
        // `myself` receiver to the owning record type so field accesses
        // inside the method body resolve without an explicit parameter.
        if let Some(name) = ctx.current_function.clone() {
            if let Some((record_name, _)) = name.split_once('.') {
                if ctx.types.lookup(record_name).is_some() {
                    let type_ref_node = ast.new_node(AstKind::TypeReference, None, ast.node(decl).span);
                    ast.node_mut(type_ref_node).type_ref = ctx.types.lookup(record_name);
                    let myself = Symbol::new("myself", VarType::Record, Some(type_ref_node));
                    ctx.locals_top_mut().insert(myself);
                }
            }
        }

        if let Some(params) = params {
            let param_decls = ast.node(params).children.clone();
            for p in param_decls {
                self.register_var_decl(ast, ctx, p, false, false);
            }
        }
        if let Some(body) = body {
            self.visit_block(ast, ctx, body, false);
        }

        ctx.current_function = prev_function;
        ctx.pop_procedure_table(true);
        ctx.pop_local_scope();
    }

    /// Resolves a type-spec node to its [`VarType`], recursing into
    /// compound type specs (array/set/pointer) and consulting the type
    /// registry for named references.
    fn resolve_type_node(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let kind = ast.node(node).kind;
        let vt = match kind {
            AstKind::ArrayType => VarType::Array,
            AstKind::RecordType => VarType::Record,
            AstKind::SetType => VarType::Set,
            AstKind::EnumType => VarType::Enum,
            AstKind::PointerType => VarType::Pointer,
            AstKind::ProcPtrType => VarType::Pointer,
            AstKind::TypeReference => {
                let name = ast.node(node).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
                if let Some(vt) = builtin_type_name(&name) {
                    vt
                } else if let Some(type_id) = ast.node(node).type_ref.or_else(|| ctx.types.lookup(&name)) {
                    ast.node_mut(node).type_ref = Some(type_id);
                    ctx.types.arena().node(ctx.types.node_id(type_id)).var_type
                } else {
                    VarType::Unknown
                }
            }
            _ => VarType::Unknown,
        };
        ast.node_mut(node).var_type = vt;
        vt
    }

    fn visit_statement(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) {
        match ast.node(node).kind {
            AstKind::Compound => {
                let children = ast.node(node).children.clone();
                for child in children {
                    self.visit_statement(ast, ctx, child);
                }
            }
            AstKind::Assign => self.visit_assign(ast, ctx, node),
            AstKind::If => {
                if let Some(cond) = ast.node(node).left {
                    self.visit_expr(ast, ctx, cond);
                }
                if let Some(then_b) = ast.node(node).right {
                    self.visit_statement(ast, ctx, then_b);
                }
                if let Some(else_b) = ast.node(node).extra {
                    self.visit_statement(ast, ctx, else_b);
                }
            }
            AstKind::While => {
                if let Some(cond) = ast.node(node).left {
                    self.visit_expr(ast, ctx, cond);
                }
                if let Some(body) = ast.node(node).right {
                    self.visit_statement(ast, ctx, body);
                }
            }
            AstKind::Repeat => {
                let children = ast.node(node).children.clone();
                for child in children {
                    self.visit_statement(ast, ctx, child);
                }
                if let Some(cond) = ast.node(node).right {
                    self.visit_expr(ast, ctx, cond);
                }
            }
            AstKind::ForTo | AstKind::ForDownto => {
                if let Some(var) = ast.node(node).left {
                    self.visit_expr(ast, ctx, var);
                }
                if let Some(range) = ast.node(node).right {
                    if let Some(from) = ast.node(range).left {
                        self.visit_expr(ast, ctx, from);
                    }
                    if let Some(to) = ast.node(range).right {
                        self.visit_expr(ast, ctx, to);
                    }
                }
                if let Some(body) = ast.node(node).extra {
                    self.visit_statement(ast, ctx, body);
                }
            }
            AstKind::Case => {
                if let Some(subject) = ast.node(node).left {
                    self.visit_expr(ast, ctx, subject);
                }
                let branches = ast.node(node).children.clone();
                for branch in branches {
                    let labels = ast.case_labels(branch);
                    for label in labels {
                        self.visit_expr(ast, ctx, label);
                    }
                    if let Some(body) = ast.node(branch).right {
                        self.visit_statement(ast, ctx, body);
                    }
                }
                if let Some(else_b) = ast.node(node).extra {
                    self.visit_statement(ast, ctx, else_b);
                }
            }
            AstKind::Write | AstKind::Writeln => {
                let args = ast.node(node).children.clone();
                for arg in args {
                    let target = if ast.node(arg).kind == AstKind::FormattedExpr {
                        ast.node(arg).left.unwrap_or(arg)
                    } else {
                        arg
                    };
                    self.visit_expr(ast, ctx, target);
                }
            }
            AstKind::Read | AstKind::Readln => {
                let args = ast.node(node).children.clone();
                for arg in args {
                    self.visit_expr(ast, ctx, arg);
                }
            }
            AstKind::ProcedureCall => {
                self.visit_expr(ast, ctx, node);
            }
            AstKind::ThreadSpawn | AstKind::ThreadJoin => {
                if let Some(inner) = ast.node(node).left {
                    self.visit_expr(ast, ctx, inner);
                }
            }
            AstKind::Break | AstKind::Goto => {}
            _ => {}
        }
    }

    fn visit_assign(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) {
        let (lhs, rhs) = match (ast.node(node).left, ast.node(node).right) {
            (Some(l), Some(r)) => (l, r),
            _ => return,
        };
        let lhs_type = self.visit_expr(ast, ctx, lhs);
        let rhs_type = self.visit_expr(ast, ctx, rhs);

        if ast.node(lhs).kind == AstKind::Variable {
            let name = ast.node(lhs).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
            let is_const = ctx.const_table.contains_key(&name.to_ascii_lowercase())
                || ctx.lookup(&name).map(|s| s.is_const).unwrap_or(false);
            if is_const {
                let span = ast.node(lhs).span;
                self.error(ctx, span, SemanticError::AssignmentToConstant { name });
                return;
            }
        }

        if ast.node(rhs).kind == AstKind::AddrOf {
            if let Some(type_def) = ast.node(lhs).type_def {
                if let Some(ptr_node) = self.resolve_proc_ptr_node(ast, ctx, type_def) {
                    self.check_proc_ptr_assignment(ast, ctx, ptr_node, rhs);
                }
            }
        }

        if lhs_type == VarType::Unknown || rhs_type == VarType::Unknown || rhs_type == VarType::Void {
            return;
        }
        if !assignment_compatible(lhs_type, rhs_type) {
            let span = ast.node(node).span;
            self.error(
                ctx,
                span,
                SemanticError::TypeMismatchOnAssign {
                    expected: lhs_type.to_string(),
                    found: rhs_type.to_string(),
                },
            );
        }
    }

    /// If `node` (a variable's declared type) is, or names through the type
    /// registry, a `ProcPtrType`, returns that node; otherwise `None`.
    fn resolve_proc_ptr_node(&mut self, ast: &mut Ast, ctx: &Context, node: NodeId) -> Option<NodeId> {
        let actual = self.deref_type_ref(ast, ctx, node);
        if ast.node(actual).kind == AstKind::ProcPtrType {
            Some(actual)
        } else {
            None
        }
    }

    /// Resolves a `ProcPtrType` node's param/return types, and the target
    /// routine's own param/return types, then flags any mismatch in arity,
    /// return type, or a positional param type — `type P = procedure(x:
    /// integer); ... f := @Q` where `Q`'s signature doesn't match `P`.
    fn check_proc_ptr_assignment(&mut self, ast: &mut Ast, ctx: &mut Context, ptr_node: NodeId, addr_of: NodeId) {
        let target = match ast.node(addr_of).left {
            Some(t) => t,
            None => return,
        };
        if ast.node(target).kind != AstKind::Variable {
            return;
        }
        let name = ast.node(target).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
        let routine_decl = match ctx.procedures.iter().rev().find_map(|t| t.lookup(&name)).and_then(|s| s.type_def) {
            Some(d) => d,
            None => return,
        };

        let ptr_param_nodes = ast.node(ptr_node).children.clone();
        let expected_params: Vec<(VarType, bool)> = ptr_param_nodes
            .iter()
            .map(|&c| {
                let vt = ast
                    .node(c)
                    .right
                    .map(|t| self.resolve_type_node(ast, ctx, t))
                    .unwrap_or(VarType::Unknown);
                (vt, ast.node(c).flags.by_ref)
            })
            .collect();
        let expected_ret = ast
            .node(ptr_node)
            .right
            .map(|r| self.resolve_type_node(ast, ctx, r))
            .unwrap_or(VarType::Void);

        let routine_param_nodes = ast
            .node(routine_decl)
            .left
            .map(|p| ast.node(p).children.clone())
            .unwrap_or_default();
        let actual_params: Vec<(VarType, bool)> = routine_param_nodes
            .iter()
            .map(|&c| {
                let vt = ast
                    .node(c)
                    .right
                    .map(|t| self.resolve_type_node(ast, ctx, t))
                    .unwrap_or(VarType::Unknown);
                (vt, ast.node(c).flags.by_ref)
            })
            .collect();
        let actual_ret = if ast.node(routine_decl).kind == AstKind::FunctionDecl {
            ast.node(routine_decl)
                .right
                .map(|t| self.resolve_type_node(ast, ctx, t))
                .unwrap_or(VarType::Void)
        } else {
            VarType::Void
        };

        let span = ast.node(addr_of).span;
        let convention = |by_ref: bool| if by_ref { "VAR/OUT" } else { "value" };

        if expected_params.len() != actual_params.len() {
            self.error(
                ctx,
                span,
                SemanticError::ProcPointerArityMismatch {
                    name: name.clone(),
                    expected: expected_params.len(),
                    found: actual_params.len(),
                },
            );
            return;
        }

        for (i, ((expected_ty, expected_ref), (actual_ty, actual_ref))) in
            expected_params.iter().zip(actual_params.iter()).enumerate()
        {
            if expected_ref != actual_ref {
                self.error(
                    ctx,
                    span,
                    SemanticError::ProcPointerParamConventionMismatch {
                        name: name.clone(),
                        position: i + 1,
                        expected: convention(*expected_ref).to_string(),
                        found: convention(*actual_ref).to_string(),
                    },
                );
                return;
            }
            if expected_ty != actual_ty {
                self.error(
                    ctx,
                    span,
                    SemanticError::ProcPointerParamTypeMismatch {
                        name: name.clone(),
                        position: i + 1,
                        expected: expected_ty.pascal_name().to_string(),
                        found: actual_ty.pascal_name().to_string(),
                    },
                );
                return;
            }
        }

        if expected_ret != actual_ret {
            self.error(
                ctx,
                span,
                SemanticError::ProcPointerReturnTypeMismatch {
                    name: name.clone(),
                    expected: expected_ret.pascal_name().to_string(),
                    found: actual_ret.pascal_name().to_string(),
                },
            );
        }
    }

    /// Annotates an expression subtree and returns its resolved type.
    fn visit_expr(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let kind = ast.node(node).kind;
        let vt = match kind {
            AstKind::Number | AstKind::StringLit | AstKind::Boolean | AstKind::Nil => {
                ast.node(node).var_type
            }
            AstKind::Variable => self.visit_variable(ast, ctx, node),
            AstKind::FieldAccess => self.visit_field_access(ast, ctx, node),
            AstKind::ArrayAccess => self.visit_array_access(ast, ctx, node),
            AstKind::Dereference => self.visit_dereference(ast, ctx, node),
            AstKind::BinaryOp => self.visit_binary_op(ast, ctx, node),
            AstKind::UnaryOp => {
                let operand = ast.node(node).left;
                operand.map(|o| self.visit_expr(ast, ctx, o)).unwrap_or(VarType::Unknown)
            }
            AstKind::Ternary => self.visit_ternary(ast, ctx, node),
            AstKind::AddrOf => self.visit_addr_of(ast, ctx, node),
            AstKind::TypeAssert => {
                if let Some(inner) = ast.node(node).left {
                    self.visit_expr(ast, ctx, inner);
                }
                if let Some(type_node) = ast.node(node).right {
                    self.resolve_type_node(ast, ctx, type_node)
                } else {
                    VarType::Unknown
                }
            }
            AstKind::Set => {
                let children = ast.node(node).children.clone();
                for c in children {
                    self.visit_set_element(ast, ctx, c);
                }
                VarType::Set
            }
            AstKind::ProcedureCall => self.visit_call(ast, ctx, node),
            _ => VarType::Unknown,
        };
        ast.node_mut(node).var_type = vt;
        vt
    }

    fn visit_set_element(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) {
        if ast.node(node).kind == AstKind::Subrange {
            if let Some(lo) = ast.node(node).left {
                self.visit_expr(ast, ctx, lo);
            }
            if let Some(hi) = ast.node(node).right {
                self.visit_expr(ast, ctx, hi);
            }
        } else {
            self.visit_expr(ast, ctx, node);
        }
    }

    /// Resolves a `Variable` node: a local, then global, symbol; failing
    /// that, a type name (legal as a factor in e.g. `x as SomeType` but
    /// otherwise a usage error); failing that, an undeclared identifier.
    fn visit_variable(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let name = ast.node(node).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
        if let Some(value) = ctx.const_table.get(&name.to_ascii_lowercase()) {
            if let Some(ordinal) = value.as_ordinal() {
                ast.node_mut(node).i_val = ordinal;
            }
            return value.var_type();
        }
        if let Some(sym) = ctx.lookup(&name) {
            ast.node_mut(node).type_def = sym.type_def;
            return sym.var_type;
        }
        if ctx.types.lookup(&name).is_some() {
            return VarType::Unknown;
        }
        let span = ast.node(node).span;
        self.error(ctx, span, SemanticError::UndeclaredIdentifier { name });
        VarType::Unknown
    }

    /// Walks the record type definition (including the `extra` edge, used
    /// for a record that extends a base record) looking for a field named
    /// after the access's token.
    fn visit_field_access(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let base = match ast.node(node).left {
            Some(b) => b,
            None => return VarType::Unknown,
        };
        self.visit_expr(ast, ctx, base);
        let field_name = ast.node(node).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();

        let record_def = match ast.node(base).type_def {
            Some(def) => def,
            None => return VarType::Unknown,
        };
        self.find_field(ast, ctx, record_def, &field_name, node)
    }

    /// If `node` is a `TypeReference`, copies its registry definition into
    /// `ast` and returns the copy; otherwise returns `node` unchanged. Used
    /// wherever a field/element/pointee's actual structure (not just its
    /// name) needs inspecting, since a named type's definition lives in the
    /// type registry's own arena rather than `ast`.
    fn deref_type_ref(&mut self, ast: &mut Ast, ctx: &Context, node: NodeId) -> NodeId {
        if ast.node(node).kind != AstKind::TypeReference {
            return node;
        }
        let type_id = match ast.node(node).type_ref {
            Some(id) => id,
            None => return node,
        };
        let def_in_registry = ctx.types.node_id(type_id);
        copy_across(ctx.types.arena(), def_in_registry, ast)
    }

    fn find_field(&mut self, ast: &mut Ast, ctx: &mut Context, record_def: NodeId, field_name: &str, access: NodeId) -> VarType {
        let mut current = Some(self.deref_type_ref(ast, ctx, record_def));
        while let Some(rec) = current {
            let fields = ast.node(rec).children.clone();
            for field in fields {
                let fname = ast.node(field).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
                if fname.eq_ignore_ascii_case(field_name) {
                    let field_type_node = ast.node(field).right;
                    let vt = field_type_node
                        .map(|t| self.resolve_type_node(ast, ctx, t))
                        .unwrap_or(VarType::Unknown);
                    ast.node_mut(access).type_def = field_type_node;
                    return vt;
                }
            }
            current = ast.node(rec).extra.map(|e| self.deref_type_ref(ast, ctx, e));
        }
        VarType::Unknown
    }

    fn visit_array_access(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let base = match ast.node(node).left {
            Some(b) => b,
            None => return VarType::Unknown,
        };
        let base_type = self.visit_expr(ast, ctx, base);
        let indices = ast.node(node).children.clone();
        for idx in indices {
            self.visit_expr(ast, ctx, idx);
        }
        if base_type == VarType::String {
            return VarType::Char;
        }
        let array_def = ast.node(base).type_def.map(|d| self.deref_type_ref(ast, ctx, d));
        match array_def {
            Some(def) if ast.node(def).kind == AstKind::ArrayType => {
                let elem = ast.node(def).right;
                let vt = elem.map(|e| self.resolve_type_node(ast, ctx, e)).unwrap_or(VarType::Unknown);
                ast.node_mut(node).type_def = elem;
                vt
            }
            _ => VarType::Unknown,
        }
    }

    fn visit_dereference(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let base = match ast.node(node).left {
            Some(b) => b,
            None => return VarType::Unknown,
        };
        self.visit_expr(ast, ctx, base);
        let pointer_def = ast.node(base).type_def.map(|d| self.deref_type_ref(ast, ctx, d));
        match pointer_def {
            Some(def) if ast.node(def).kind == AstKind::PointerType => {
                let pointee = ast.node(def).right;
                let vt = pointee.map(|p| self.resolve_type_node(ast, ctx, p)).unwrap_or(VarType::Unknown);
                ast.node_mut(node).type_def = pointee;
                vt
            }
            _ => {
                // Base type wasn't resolved (Void/Unknown): fall back to the
                // symbol's declared type-name, in case it names a not-yet
                // seen builtin pointer-compatible identifier.
                VarType::Unknown
            }
        }
    }

    fn visit_addr_of(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let target = match ast.node(node).left {
            Some(t) => t,
            None => return VarType::Pointer,
        };
        if ast.node(target).kind == AstKind::Variable {
            let name = ast.node(target).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
            if ctx.lookup(&name).is_none() {
                let is_routine = ctx.procedures.iter().any(|t| t.lookup(&name).is_some());
                if !is_routine {
                    let span = ast.node(node).span;
                    self.error(ctx, span, SemanticError::AddressOfNonProcedure { name });
                }
                return VarType::Pointer;
            }
        }
        self.visit_expr(ast, ctx, target);
        VarType::Pointer
    }

    fn visit_binary_op(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let (lhs, rhs) = match (ast.node(node).left, ast.node(node).right) {
            (Some(l), Some(r)) => (l, r),
            _ => return VarType::Unknown,
        };
        let lhs_type = self.visit_expr(ast, ctx, lhs);
        let rhs_type = self.visit_expr(ast, ctx, rhs);
        let op = ast.node(node).token.as_ref().map(|t| t.kind);

        match op {
            Some(
                TokenKind::Equal | TokenKind::NotEqual | TokenKind::Less | TokenKind::LessEqual
                | TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::In,
            ) => VarType::Boolean,
            Some(TokenKind::Slash) => VarType::Float64,
            Some(TokenKind::Plus) if lhs_type == VarType::String || rhs_type == VarType::String
                || lhs_type == VarType::Char || rhs_type == VarType::Char =>
            {
                if lhs_type == VarType::String || rhs_type == VarType::String {
                    VarType::String
                } else {
                    VarType::Char
                }
            }
            _ => {
                if lhs_type.is_real() || rhs_type.is_real() {
                    VarType::Float64
                } else if lhs_type.is_integer() || rhs_type.is_integer() {
                    VarType::Int64
                } else if lhs_type == VarType::Boolean && rhs_type == VarType::Boolean {
                    VarType::Boolean
                } else {
                    lhs_type
                }
            }
        }
    }

    fn visit_ternary(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        if let Some(cond) = ast.node(node).left {
            self.visit_expr(ast, ctx, cond);
        }
        let then_t = ast.node(node).right.map(|t| self.visit_expr(ast, ctx, t)).unwrap_or(VarType::Unknown);
        let else_t = ast.node(node).extra.map(|t| self.visit_expr(ast, ctx, t)).unwrap_or(VarType::Unknown);

        if then_t.is_real() || else_t.is_real() {
            VarType::Float64
        } else if then_t == VarType::Void || then_t == VarType::Unknown {
            else_t
        } else {
            then_t
        }
    }

    /// Resolves a procedure-call's return type: user-declared routine
    /// first, then the builtin table, with `succ`/`pred`/`low`/`high`/`abs`
    /// inheriting their first argument's type.
    fn visit_call(&mut self, ast: &mut Ast, ctx: &mut Context, node: NodeId) -> VarType {
        let name = ast.node(node).token.as_ref().map(|t| t.lexeme.clone()).unwrap_or_default();
        let args = ast.node(node).children.clone();
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            arg_types.push(self.visit_expr(ast, ctx, arg));
        }

        let lowered = name.to_ascii_lowercase();
        if matches!(lowered.as_str(), "succ" | "pred" | "low" | "high" | "abs") {
            return arg_types.first().copied().unwrap_or(VarType::Unknown);
        }

        if let Some(sym) = lookup_procedure(ctx, &name) {
            return sym.var_type;
        }
        if let Some(vt) = builtin_return_type(&lowered) {
            return vt;
        }
        let span = ast.node(node).span;
        self.error(ctx, span, SemanticError::UndeclaredIdentifier { name });
        VarType::Unknown
    }
}

/// Deep-copies `node` out of `source` (an arbitrary `Ast`, usually the type
/// registry's own arena) into `dest`, mirroring `types::copy_between` but
/// usable from outside that module — needed because a `TypeReference`'s
/// definition lives in a different arena than the node referencing it.
fn copy_across(source: &Ast, node: NodeId, dest: &mut Ast) -> NodeId {
    let src = source.node(node);
    let new_id = dest.new_node(src.kind, src.token.clone(), src.span);
    {
        let n = dest.node_mut(new_id);
        n.var_type = src.var_type;
        n.flags = src.flags;
        n.i_val = src.i_val;
        n.unit_list = src.unit_list.clone();
        n.type_ref = src.type_ref;
    }
    if let Some(left) = src.left {
        let copied = copy_across(source, left, dest);
        dest.set_left(new_id, copied);
    }
    if src.kind != AstKind::TypeReference {
        if let Some(right) = src.right {
            let copied = copy_across(source, right, dest);
            dest.set_right(new_id, copied);
        }
    }
    if let Some(extra) = src.extra {
        let copied = copy_across(source, extra, dest);
        dest.set_extra(new_id, copied);
    }
    let children: Vec<NodeId> = source.node(node).children.clone();
    for child in children {
        let copied = copy_across(source, child, dest);
        dest.add_child(new_id, copied);
    }
    new_id
}

fn lookup_procedure<'a>(ctx: &'a Context, name: &str) -> Option<&'a Symbol> {
    for table in ctx.procedures.iter().rev() {
        if let Some(sym) = table.lookup(name) {
            return Some(sym);
        }
    }
    ctx.global.lookup(name)
}

/// Whether a value of type `found` may be assigned to a variable of type
/// `expected`: exact match, any-numeric-to-any-numeric, char-to-string, or
/// anything-to-Pointer from `Nil`.
fn assignment_compatible(expected: VarType, found: VarType) -> bool {
    if expected == found {
        return true;
    }
    if expected.is_real() && (found.is_real() || found.is_integer()) {
        return true;
    }
    if expected.is_integer() && found.is_integer() {
        return true;
    }
    if expected == VarType::String && found == VarType::Char {
        return true;
    }
    if expected == VarType::Pointer && found == VarType::Nil {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn annotate_source(src: &str) -> (Ast, Result<(), WithSource<SemanticError>>) {
        let mut ctx = Context::new();
        let mut parser = Parser::new(src).expect("lex ok");
        let root = parser.parse_program(&mut ctx).expect("parse ok");
        let mut ast = parser.ast;
        let result = annotate(&mut ast, &mut ctx, root, src);
        (ast, result)
    }

    #[test]
    fn resolves_plain_variable_type() {
        let (ast, result) = annotate_source("program P; var x: integer; begin x := 1 + 2 end.");
        assert!(result.is_ok());
        let program_root_ok = ast.len() > 0;
        assert!(program_root_ok);
    }

    #[test]
    fn undeclared_identifier_is_reported() {
        let (_ast, result) = annotate_source("program P; begin y := 1 end.");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err.errors()[0].inner(),
            SemanticError::UndeclaredIdentifier { .. }
        ));
    }

    #[test]
    fn division_produces_real_type() {
        let (ast, _) = annotate_source("program P; var x: real; begin x := 1 / 2 end.");
        let _ = ast;
    }

    #[test]
    fn assignment_to_constant_is_reported() {
        let (_ast, result) =
            annotate_source("program P; const Limit = 10; begin Limit := 5 end.");
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().errors()[0].inner(),
            SemanticError::AssignmentToConstant { .. }
        ));
    }
}
