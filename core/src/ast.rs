//! The abstract syntax tree: an arena of [`AstNode`]s addressed by
//! [`NodeId`] handles instead of pointers. See [`crate::types`] for the
//! (separately-arena'd) type registry that some edges point into.

use crate::lexer::Span;
use crate::token::Token;
use crate::types::TypeId;
use crate::value::VarType;
use std::collections::{HashSet, VecDeque};

/// Index into an [`Ast`]'s node arena. Never reused within one `Ast`; the
/// arena only grows during construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// The discriminant of an AST node, one constructor per production the
/// grammar recognises (§3/§4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AstKind {
    Program,
    Block,
    Compound,
    VarDecl,
    ConstDecl,
    TypeDecl,
    RecordType,
    ArrayType,
    SetType,
    EnumType,
    EnumValue,
    Interface,
    PointerType,
    ProcPtrType,
    ProcedureDecl,
    FunctionDecl,
    ProcedureCall,
    Variable,
    FieldAccess,
    ArrayAccess,
    Dereference,
    Number,
    StringLit,
    Boolean,
    Nil,
    BinaryOp,
    UnaryOp,
    Ternary,
    AddrOf,
    TypeAssert,
    Assign,
    If,
    While,
    ForTo,
    ForDownto,
    Repeat,
    Case,
    CaseBranch,
    Break,
    Goto,
    Label,
    LabelDecl,
    Read,
    Readln,
    Write,
    Writeln,
    ThreadSpawn,
    ThreadJoin,
    UsesClause,
    Unit,
    Subrange,
    ArrayLiteral,
    Set,
    FormattedExpr,
    TypeReference,
    List,
    Noop,
    New,
}

impl AstKind {
    /// The stable name used in JSON dumps and error messages, matching the
    /// original constant spelling (`AST_PROGRAM`, …) rather than a Rust-style
    /// rename, so round-tripped JSON stays compatible with other tooling.
    pub fn as_str(self) -> &'static str {
        use AstKind::*;
        match self {
            Program => "AST_PROGRAM",
            Block => "AST_BLOCK",
            Compound => "AST_COMPOUND",
            VarDecl => "AST_VAR_DECL",
            ConstDecl => "AST_CONST_DECL",
            TypeDecl => "AST_TYPE_DECL",
            RecordType => "AST_RECORD_TYPE",
            ArrayType => "AST_ARRAY_TYPE",
            SetType => "AST_SET_TYPE",
            EnumType => "AST_ENUM_TYPE",
            EnumValue => "AST_ENUM_VALUE",
            Interface => "AST_INTERFACE",
            PointerType => "AST_POINTER_TYPE",
            ProcPtrType => "AST_PROC_PTR_TYPE",
            ProcedureDecl => "AST_PROCEDURE_DECL",
            FunctionDecl => "AST_FUNCTION_DECL",
            ProcedureCall => "AST_PROCEDURE_CALL",
            Variable => "AST_VARIABLE",
            FieldAccess => "AST_FIELD_ACCESS",
            ArrayAccess => "AST_ARRAY_ACCESS",
            Dereference => "AST_DEREFERENCE",
            Number => "AST_NUMBER",
            StringLit => "AST_STRING",
            Boolean => "AST_BOOLEAN",
            Nil => "AST_NIL",
            BinaryOp => "AST_BINARY_OP",
            UnaryOp => "AST_UNARY_OP",
            Ternary => "AST_TERNARY",
            AddrOf => "AST_ADDR_OF",
            TypeAssert => "AST_TYPE_ASSERT",
            Assign => "AST_ASSIGN",
            If => "AST_IF",
            While => "AST_WHILE",
            ForTo => "AST_FOR_TO",
            ForDownto => "AST_FOR_DOWNTO",
            Repeat => "AST_REPEAT",
            Case => "AST_CASE",
            CaseBranch => "AST_CASE_BRANCH",
            Break => "AST_BREAK",
            Goto => "AST_GOTO",
            Label => "AST_LABEL",
            LabelDecl => "AST_LABEL_DECL",
            Read => "AST_READ",
            Readln => "AST_READLN",
            Write => "AST_WRITE",
            Writeln => "AST_WRITELN",
            ThreadSpawn => "AST_THREAD_SPAWN",
            ThreadJoin => "AST_THREAD_JOIN",
            UsesClause => "AST_USES_CLAUSE",
            Unit => "AST_UNIT",
            Subrange => "AST_SUBRANGE",
            ArrayLiteral => "AST_ARRAY_LITERAL",
            Set => "AST_SET",
            FormattedExpr => "AST_FORMATTED_EXPR",
            TypeReference => "AST_TYPE_REFERENCE",
            List => "AST_LIST",
            Noop => "AST_NOOP",
            New => "AST_NEW",
        }
    }
}

/// The boolean flag set a node can carry (§3). Plain `bool` fields rather
/// than a bitflags crate — there are only six of them and none are part of
/// a public wire format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub by_ref: bool,
    pub is_global_scope: bool,
    pub is_inline: bool,
    pub is_forward_decl: bool,
    pub is_virtual: bool,
    pub is_exported: bool,
}

/// One node in the arena. Edges are `NodeId`s; `left`/`right`/`extra`/
/// `children` are exclusively owned except where noted in §4 (a
/// `TypeReference`'s `type_ref` points into the type registry, and
/// `type_def`/`parent` are always weak).
#[derive(Clone, Debug)]
pub struct AstNode {
    pub kind: AstKind,
    pub token: Option<Token>,
    pub span: Span,
    pub var_type: VarType,
    pub flags: NodeFlags,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub extra: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Weak link to the type-definition node this node's type resolves to.
    pub type_def: Option<NodeId>,
    /// Set only on `TypeReference` nodes: the shared edge into the type
    /// registry (not the AST arena).
    pub type_ref: Option<TypeId>,
    pub i_val: i64,
    pub unit_list: Vec<String>,
    pub freed: bool,
}

impl AstNode {
    fn new(kind: AstKind, token: Option<Token>, span: Span) -> Self {
        AstNode {
            kind,
            token,
            span,
            var_type: VarType::Unknown,
            flags: NodeFlags::default(),
            left: None,
            right: None,
            extra: None,
            children: Vec::with_capacity(crate::consts::AST_CHILD_INITIAL_CAPACITY),
            parent: None,
            type_def: None,
            type_ref: None,
            i_val: 0,
            unit_list: Vec::new(),
            freed: false,
        }
    }
}

/// Owns every node produced while parsing (or synthesising) one compilation
/// unit. Nodes are never individually deallocated; [`Ast::free`] only marks
/// the bookkeeping bit the spec's reclamation-order tests examine.
#[derive(Default, Debug)]
pub struct Ast {
    nodes: Vec<AstNode>,
    recently_freed: VecDeque<NodeId>,
    recently_freed_set: HashSet<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn new_node(&mut self, kind: AstKind, token: Option<Token>, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode::new(kind, token, span));
        id
    }

    pub fn set_left(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).left = Some(child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn set_right(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).right = Some(child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn set_extra(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).extra = Some(child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn set_type_def(&mut self, node: NodeId, type_def: NodeId) {
        // Weak edge: deliberately does not set `type_def`'s parent.
        self.node_mut(node).type_def = Some(type_def);
    }

    /// A `CaseBranch`'s labels, normalized regardless of how the parser
    /// stored them: a single label lives directly on `left`; two or more
    /// live as `left`'s `Compound` wrapper's children (mirroring the
    /// original's `parseCaseLabels` single-element simplification). Callers
    /// that just want "the labels of this branch" use this instead of
    /// special-casing arity 1 themselves.
    pub fn case_labels(&self, branch: NodeId) -> Vec<NodeId> {
        let Some(left) = self.node(branch).left else {
            return Vec::new();
        };
        if self.node(left).kind == AstKind::Compound {
            self.node(left).children.clone()
        } else {
            vec![left]
        }
    }

    /// Marks `id` and every strongly-owned descendant as freed, following
    /// the same edge set the original reclamation walker does: `left`
    /// (unless `id` is a `TypeDecl`, whose `left` is owned elsewhere),
    /// `right` (unless `id` is a `TypeReference`, whose `right` is the type
    /// registry), `extra`, then every child. A node already marked freed, or
    /// present in the recently-freed ring, stops the walk without
    /// recursing — this is what makes `free` idempotent and cycle-safe.
    pub fn free(&mut self, id: NodeId) {
        if self.node(id).freed || self.recently_freed_set.contains(&id) {
            return;
        }
        self.node_mut(id).freed = true;
        self.remember_freed(id);

        let kind = self.node(id).kind;
        let left = self.node(id).left;
        let right = self.node(id).right;
        let extra = self.node(id).extra;
        let children = self.node(id).children.clone();

        if kind != AstKind::TypeDecl {
            if let Some(left) = left {
                self.free(left);
            }
        }
        if kind != AstKind::TypeReference {
            if let Some(right) = right {
                self.free(right);
            }
        }
        if let Some(extra) = extra {
            self.free(extra);
        }
        for child in children {
            self.free(child);
        }
    }

    fn remember_freed(&mut self, id: NodeId) {
        if self.recently_freed.len() >= crate::consts::RECENTLY_FREED_CAPACITY {
            if let Some(evicted) = self.recently_freed.pop_front() {
                self.recently_freed_set.remove(&evicted);
            }
        }
        self.recently_freed.push_back(id);
        self.recently_freed_set.insert(id);
    }

    /// Deep-copies the subtree rooted at `id`, returning the new root.
    /// A `TypeReference`'s `right` is copied by reference (the `NodeId`
    /// handle, unchanged) since it is shared, not owned.
    pub fn copy(&mut self, id: NodeId) -> NodeId {
        let src = self.node(id).clone();
        let new_id = self.new_node(src.kind, src.token.clone(), src.span);
        {
            let n = self.node_mut(new_id);
            n.var_type = src.var_type;
            n.flags = src.flags;
            n.i_val = src.i_val;
            n.unit_list = src.unit_list.clone();
            n.type_ref = src.type_ref;
            // type_def is weak; copy the handle, not a fresh subtree.
            n.type_def = src.type_def;
        }
        if let Some(left) = src.left {
            let copied = self.copy(left);
            self.set_left(new_id, copied);
        }
        if let Some(right) = src.right {
            if src.kind == AstKind::TypeReference {
                self.node_mut(new_id).right = Some(right);
            } else {
                let copied = self.copy(right);
                self.set_right(new_id, copied);
            }
        }
        if let Some(extra) = src.extra {
            let copied = self.copy(extra);
            self.set_extra(new_id, copied);
        }
        for child in &src.children {
            let copied = self.copy(*child);
            self.add_child(new_id, copied);
        }
        new_id
    }

    /// Checks invariant 1 of §4 (child↔parent link consistency) for `id`
    /// and every descendant, given the parent the caller expects `id` to
    /// have. Returns the first mismatch found, if any.
    pub fn verify_links(&self, id: NodeId, expected_parent: Option<NodeId>) -> Result<(), NodeId> {
        if self.node(id).parent != expected_parent {
            return Err(id);
        }
        let node = self.node(id);
        let kind = node.kind;
        if kind != AstKind::TypeDecl {
            if let Some(left) = node.left {
                self.verify_links(left, Some(id))?;
            }
        }
        if kind != AstKind::TypeReference {
            if let Some(right) = node.right {
                self.verify_links(right, Some(id))?;
            }
        }
        if let Some(extra) = node.extra {
            self.verify_links(extra, Some(id))?;
        }
        for &child in &node.children {
            self.verify_links(child, Some(id))?;
        }
        Ok(())
    }

    /// A compact, indentation-based textual dump (`Node(type=…) at line …`
    /// style), intended for `--dump-ast`-style debugging rather than
    /// machine consumption — see [`crate::json_ast`] for the latter.
    pub fn dump_text(&self, id: NodeId, indent: usize, out: &mut String) {
        let node = self.node(id);
        out.push_str(&"  ".repeat(indent));
        out.push_str(&format!(
            "Node(type={}, line={})\n",
            node.kind.as_str(),
            node.token.as_ref().map(|t| t.line).unwrap_or(0)
        ));
        for edge in [node.left, node.right, node.extra] {
            if let Some(edge) = edge {
                self.dump_text(edge, indent + 1, out);
            }
        }
        for &child in &node.children {
            self.dump_text(child, indent + 1, out);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn tok(kind: TokenKind) -> Token {
        Token::new(kind, "x", 1, 1)
    }

    fn span() -> Span {
        Span::point(1, 1)
    }

    #[test]
    fn free_is_idempotent() {
        let mut ast = Ast::new();
        let leaf = ast.new_node(AstKind::Number, Some(tok(TokenKind::IntegerConst)), span());
        let root = ast.new_node(AstKind::BinaryOp, None, span());
        ast.set_left(root, leaf);
        ast.free(root);
        assert!(ast.node(root).freed);
        assert!(ast.node(leaf).freed);
        // Second call must not panic or double count.
        ast.free(root);
    }

    #[test]
    fn free_stops_at_cycle_through_type_def() {
        let mut ast = Ast::new();
        let a = ast.new_node(AstKind::Variable, None, span());
        let b = ast.new_node(AstKind::TypeDecl, None, span());
        ast.set_type_def(a, b);
        ast.set_type_def(b, a); // weak cycle, must not stack overflow
        ast.free(a);
        assert!(ast.node(a).freed);
    }

    #[test]
    fn copy_duplicates_strong_edges() {
        let mut ast = Ast::new();
        let child = ast.new_node(AstKind::Number, None, span());
        let parent = ast.new_node(AstKind::BinaryOp, None, span());
        ast.set_left(parent, child);
        let copied = ast.copy(parent);
        assert_ne!(copied, parent);
        let copied_left = ast.node(copied).left.unwrap();
        assert_ne!(copied_left, child);
        assert_eq!(ast.node(copied_left).kind, AstKind::Number);
    }

    #[test]
    fn verify_links_detects_mismatched_parent() {
        let mut ast = Ast::new();
        let child = ast.new_node(AstKind::Number, None, span());
        let parent = ast.new_node(AstKind::BinaryOp, None, span());
        ast.set_left(parent, child);
        assert!(ast.verify_links(parent, None).is_ok());
        // Force a mismatch by rewriting the child's parent directly.
        ast.node_mut(child).parent = None;
        assert!(ast.verify_links(parent, None).is_err());
    }

    #[test]
    fn type_decl_left_is_excluded_from_free_walk() {
        let mut ast = Ast::new();
        let owned_elsewhere = ast.new_node(AstKind::RecordType, None, span());
        let decl = ast.new_node(AstKind::TypeDecl, None, span());
        ast.set_left(decl, owned_elsewhere);
        ast.free(decl);
        assert!(ast.node(decl).freed);
        assert!(!ast.node(owned_elsewhere).freed);
    }

    #[test]
    fn case_labels_normalizes_single_and_multi_label_branches() {
        let mut ast = Ast::new();
        let single_label = ast.new_node(AstKind::Number, None, span());
        let single_branch = ast.new_node(AstKind::CaseBranch, None, span());
        ast.set_left(single_branch, single_label);
        assert_eq!(ast.case_labels(single_branch), vec![single_label]);

        let a = ast.new_node(AstKind::Number, None, span());
        let b = ast.new_node(AstKind::Number, None, span());
        let wrapper = ast.new_node(AstKind::Compound, None, span());
        ast.add_child(wrapper, a);
        ast.add_child(wrapper, b);
        let multi_branch = ast.new_node(AstKind::CaseBranch, None, span());
        ast.set_left(multi_branch, wrapper);
        assert_eq!(ast.case_labels(multi_branch), vec![a, b]);
    }
}
