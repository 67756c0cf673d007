//! C2: the type registry. Maps a type name to the AST subtree that defines
//! it, supporting forward placeholders so that self-referential types
//! (`type PNode = ^TNode;`) can be resolved in two passes. Grounded on
//! `type_registry.c`'s `reserveTypePlaceholder`/`insertType`/`lookupType`.

use crate::ast::{Ast, AstKind, NodeId};
use crate::value::VarType;
use std::collections::HashMap;

/// Non-owning handle into a [`TypeRegistry`]. A `TypeReference` AST node's
/// `type_ref` field holds one of these rather than a `NodeId` into the main
/// AST arena, so the release walker never has to ask "is this node in the
/// type table?" — the two handle types simply aren't interchangeable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug)]
struct TypeEntry {
    name: String,
    node: NodeId,
}

/// Owns a small arena of type-definition nodes, separate from the main
/// [`Ast`] arena that the parser builds the rest of the program in, plus a
/// case-insensitive name index. Re-insertion of a name replaces its
/// definition; insertion never removes the old entry's `TypeId`, so any
/// `TypeReference` still holding it keeps pointing at the stale node (the
/// same aliasing behavior `insertType`'s free-then-replace has in the
/// original).
#[derive(Default, Debug)]
pub struct TypeRegistry {
    arena: Ast,
    entries: Vec<TypeEntry>,
    index: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Reserves a placeholder entry for `name` carrying `kind`, used while
    /// parsing a type's own definition so self-references inside it resolve
    /// to *something*. If `name` is already reserved with `Unknown`, its
    /// kind is upgraded in place; if it already has a real definition,
    /// nothing changes.
    pub fn reserve_placeholder(&mut self, name: &str, kind: VarType) -> TypeId {
        let key = Self::key(name);
        if let Some(&idx) = self.index.get(&key) {
            let node = self.entries[idx].node;
            if self.arena.node(node).var_type == VarType::Unknown && kind != VarType::Unknown {
                self.arena.node_mut(node).var_type = kind;
            }
            return TypeId(idx as u32);
        }
        let placeholder = self.arena.new_node(
            AstKind::Interface,
            None,
            crate::lexer::Span::point(0, 0),
        );
        self.arena.node_mut(placeholder).var_type = kind;
        let idx = self.entries.len();
        self.entries.push(TypeEntry {
            name: key.clone(),
            node: placeholder,
        });
        self.index.insert(key, idx);
        TypeId(idx as u32)
    }

    /// Copies `node` out of `source` into the registry's own arena under
    /// `name`, taking ownership of the copy. Replaces any prior definition
    /// for `name` (existing `TypeId`s remain valid, but now point at an
    /// orphaned, unreachable node — exactly as `insertType`'s
    /// free-the-old/install-the-new sequence does in the original).
    pub fn insert(&mut self, name: &str, source: &Ast, node: NodeId) -> TypeId {
        let key = Self::key(name);
        let copied = copy_between(source, node, &mut self.arena);
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].node = copied;
            return TypeId(idx as u32);
        }
        let idx = self.entries.len();
        self.entries.push(TypeEntry { name: key.clone(), node: copied });
        self.index.insert(key, idx);
        TypeId(idx as u32)
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.index.get(&Self::key(name)).map(|&idx| TypeId(idx as u32))
    }

    pub fn find_entry(&self, name: &str) -> Option<(TypeId, NodeId)> {
        let idx = *self.index.get(&Self::key(name))?;
        Some((TypeId(idx as u32), self.entries[idx].node))
    }

    pub fn node_id(&self, id: TypeId) -> NodeId {
        self.entries[id.0 as usize].node
    }

    pub fn arena(&self) -> &Ast {
        &self.arena
    }

    pub fn name_of(&self, id: TypeId) -> &str {
        &self.entries[id.0 as usize].name
    }
}

/// Deep-copies the subtree at `node` in `source` into `dest`'s arena. The
/// registry keeps its own arena entirely separate from any parser's `Ast`,
/// so a plain node-by-node copy (rather than `Ast::copy`, which only copies
/// within one arena) is needed at the boundary.
fn copy_between(source: &Ast, node: NodeId, dest: &mut Ast) -> NodeId {
    let src = source.node(node);
    let new_id = dest.new_node(src.kind, src.token.clone(), src.span);
    {
        let n = dest.node_mut(new_id);
        n.var_type = src.var_type;
        n.flags = src.flags;
        n.i_val = src.i_val;
        n.unit_list = src.unit_list.clone();
    }
    if let Some(left) = src.left {
        let copied = copy_between(source, left, dest);
        dest.set_left(new_id, copied);
    }
    if src.kind != AstKind::TypeReference {
        if let Some(right) = src.right {
            let copied = copy_between(source, right, dest);
            dest.set_right(new_id, copied);
        }
    }
    if let Some(extra) = src.extra {
        let copied = copy_between(source, extra, dest);
        dest.set_extra(new_id, copied);
    }
    let children: Vec<NodeId> = source.node(node).children.clone();
    for child in children {
        let copied = copy_between(source, child, dest);
        dest.add_child(new_id, copied);
    }
    new_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut reg = TypeRegistry::new();
        reg.reserve_placeholder("TNode", VarType::Record);
        assert!(reg.lookup("tnode").is_some());
        assert!(reg.lookup("TNODE").is_some());
    }

    #[test]
    fn reserve_then_insert_resolves_forward_declaration() {
        let mut reg = TypeRegistry::new();
        let placeholder = reg.reserve_placeholder("tnode", VarType::Unknown);

        let mut source = Ast::new();
        let real = source.new_node(AstKind::RecordType, None, Span::point(1, 1));
        let resolved = reg.insert("tnode", &source, real);

        assert_eq!(placeholder, resolved);
        assert_eq!(reg.arena().node(reg.node_id(resolved)).kind, AstKind::RecordType);
    }

    #[test]
    fn reinsertion_replaces_definition_in_place() {
        let mut reg = TypeRegistry::new();
        let mut source = Ast::new();
        let first = source.new_node(AstKind::EnumType, None, Span::point(1, 1));
        let id1 = reg.insert("color", &source, first);

        let second = source.new_node(AstKind::RecordType, None, Span::point(2, 1));
        let id2 = reg.insert("color", &source, second);

        assert_eq!(id1, id2);
        assert_eq!(reg.arena().node(reg.node_id(id2)).kind, AstKind::RecordType);
    }
}
