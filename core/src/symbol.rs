//! C3: the symbol tables and the [`Context`] that threads them (plus the
//! type registry, compile-time constant table, and diagnostic counters)
//! through every stage instead of storing them thread-locally. Grounded on
//! `symbol/symbol.c`'s hashtable + `push_global_state`/`pop_global_state`
//! shape, reworked per §4.3's Rust representation and §9's redesign note.

use crate::ast::NodeId;
use crate::types::TypeRegistry;
use crate::value::{Value, VarType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

/// One declared name. `value` is behind `Rc<RefCell<..>>` so that aliasing
/// (procedure parameters passed `by_ref`, units re-exporting a symbol) can
/// share storage instead of copying, and so [`Context::nullify_aliases_by_address`]
/// can compare addresses without unsafe pointer games.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub var_type: VarType,
    /// Weak link to the AST node defining this symbol's type, if any.
    pub type_def: Option<NodeId>,
    pub value: Rc<RefCell<Value>>,
    pub is_const: bool,
    /// True if `value` is borrowed from another symbol's storage rather
    /// than owned by this one (mirrors the original's `is_alias` bit).
    pub is_alias: bool,
}

impl Symbol {
    pub fn new(name: impl Into<String>, var_type: VarType, type_def: Option<NodeId>) -> Self {
        Symbol {
            name: name.into(),
            var_type,
            type_def,
            value: Rc::new(RefCell::new(Value::Void)),
            is_const: false,
            is_alias: false,
        }
    }
}

/// A name→[`Symbol`] table, case-insensitive on lookup. Dropping a
/// `SymbolTable` frees its contents automatically — there is no `is_alias`
/// branch here, because an aliased `Value` is shared via `Rc` and is only
/// actually dropped once its last owner goes away.
#[derive(Default, Clone, Debug)]
pub struct SymbolTable {
    entries: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    pub fn insert(&mut self, symbol: Symbol) {
        self.entries.insert(Self::key(&symbol.name), symbol);
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(&Self::key(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.entries.get_mut(&Self::key(name))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Symbol> {
        self.entries.values_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// What `Context::push_unit_scope` hands back, to be replayed by
/// `pop_unit_scope`. Each field is the value `std::mem::take` swapped out,
/// i.e. exactly what was live before the push.
pub struct ContextSnapshot {
    global: SymbolTable,
    const_global: SymbolTable,
    locals: Vec<SymbolTable>,
    procedures: Vec<SymbolTable>,
    types: TypeRegistry,
    const_table: HashMap<String, Value>,
}

/// Everything the lexer, parser, folder, and annotator need, threaded
/// explicitly instead of living in thread-locals (§4.3's Rust
/// representation, implementing §9's "thread an explicit Context" redesign
/// note). Two compilations running concurrently just means two `Context`s —
/// there is nothing to race on.
#[derive(Debug)]
pub struct Context {
    pub global: SymbolTable,
    pub const_global: SymbolTable,
    pub locals: Vec<SymbolTable>,
    pub procedures: Vec<SymbolTable>,
    pub types: TypeRegistry,
    pub const_table: HashMap<String, Value>,
    pub current_function: Option<String>,
    pub lex_error_count: u32,
    pub parse_error_count: u32,
    pub semantic_error_count: u32,
    pub break_requested: AtomicBool,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            global: SymbolTable::new(),
            const_global: SymbolTable::new(),
            locals: vec![SymbolTable::new()],
            procedures: vec![SymbolTable::new()],
            types: TypeRegistry::new(),
            const_table: HashMap::new(),
            current_function: None,
            lex_error_count: 0,
            parse_error_count: 0,
            semantic_error_count: 0,
            break_requested: AtomicBool::new(false),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn locals_top(&self) -> &SymbolTable {
        self.locals.last().expect("locals stack is never empty")
    }

    pub fn locals_top_mut(&mut self) -> &mut SymbolTable {
        self.locals.last_mut().expect("locals stack is never empty")
    }

    pub fn procedures_top_mut(&mut self) -> &mut SymbolTable {
        self.procedures
            .last_mut()
            .expect("procedures stack is never empty")
    }

    /// `lookup(name)`: local scope, then global — the convenience search
    /// order §4.3 specifies.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.locals_top()
            .lookup(name)
            .or_else(|| self.global.lookup(name))
    }

    pub fn push_procedure_table(&mut self) {
        self.procedures.push(SymbolTable::new());
    }

    /// `discard = true` drops the popped table; `discard = false` merges its
    /// entries up into the new top (used when a nested block's declarations
    /// should remain visible to its enclosing procedure after exit).
    pub fn pop_procedure_table(&mut self, discard: bool) {
        if let Some(popped) = self.procedures.pop() {
            if !discard {
                if let Some(parent) = self.procedures.last_mut() {
                    for (_, sym) in popped.entries {
                        parent.insert(sym);
                    }
                }
            }
        }
        if self.procedures.is_empty() {
            self.procedures.push(SymbolTable::new());
        }
    }

    /// Installs a fresh empty local table, returning the previous one so
    /// the caller can restore it later via [`Context::restore_local_env`].
    pub fn save_local_env(&mut self) -> SymbolTable {
        let fresh = SymbolTable::new();
        std::mem::replace(self.locals_top_mut(), fresh)
    }

    /// Drops the currently installed local table and reinstalls `snapshot`.
    pub fn restore_local_env(&mut self, snapshot: SymbolTable) {
        *self.locals_top_mut() = snapshot;
    }

    pub fn push_local_scope(&mut self) {
        self.locals.push(SymbolTable::new());
    }

    pub fn pop_local_scope(&mut self) {
        self.locals.pop();
        if self.locals.is_empty() {
            self.locals.push(SymbolTable::new());
        }
    }

    /// Moves all current top-level state into a snapshot and installs fresh
    /// empty tables in its place, for pre-parsing a `uses`d unit in
    /// isolation from the importing program's own scope. Includes the type
    /// registry (§4.3: "all four tables plus the type registry" shadow per
    /// unit) so a unit's implementation-private types don't leak into the
    /// importing program's scope the way its implementation-private vars
    /// and procs already don't.
    pub fn push_unit_scope(&mut self) -> ContextSnapshot {
        ContextSnapshot {
            global: std::mem::take(&mut self.global),
            const_global: std::mem::take(&mut self.const_global),
            locals: std::mem::replace(&mut self.locals, vec![SymbolTable::new()]),
            procedures: std::mem::replace(&mut self.procedures, vec![SymbolTable::new()]),
            types: std::mem::take(&mut self.types),
            const_table: std::mem::take(&mut self.const_table),
        }
    }

    pub fn pop_unit_scope(&mut self, snapshot: ContextSnapshot) {
        self.global = snapshot.global;
        self.const_global = snapshot.const_global;
        self.locals = snapshot.locals;
        self.procedures = snapshot.procedures;
        self.types = snapshot.types;
        self.const_table = snapshot.const_table;
    }

    /// Walks every symbol in `table` and overwrites any pointer whose
    /// `address` matches `addr` with `Value::Nil` — the aliasing defence
    /// `Dispose()` relies on (§4.3's Rust representation). A full-table scan
    /// by design, mirroring the original, not a performance-sensitive path.
    pub fn nullify_aliases_by_address(table: &mut SymbolTable, addr: usize) {
        for symbol in table.values_mut() {
            let mut val = symbol.value.borrow_mut();
            if let Value::Pointer { address, .. } = *val {
                if address == addr {
                    *val = Value::Nil;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_local_over_global() {
        let mut ctx = Context::new();
        ctx.global.insert(Symbol::new("x", VarType::Int64, None));
        ctx.locals_top_mut().insert(Symbol::new("x", VarType::Char, None));
        assert_eq!(ctx.lookup("x").unwrap().var_type, VarType::Char);
    }

    #[test]
    fn save_and_restore_local_env_round_trips() {
        let mut ctx = Context::new();
        ctx.locals_top_mut().insert(Symbol::new("a", VarType::Int64, None));
        let saved = ctx.save_local_env();
        assert!(ctx.locals_top().is_empty());
        ctx.restore_local_env(saved);
        assert!(ctx.locals_top().lookup("a").is_some());
    }

    #[test]
    fn push_pop_unit_scope_isolates_globals() {
        let mut ctx = Context::new();
        ctx.global.insert(Symbol::new("outer", VarType::Int64, None));
        let snap = ctx.push_unit_scope();
        assert!(ctx.global.lookup("outer").is_none());
        ctx.global.insert(Symbol::new("inner", VarType::Int64, None));
        ctx.pop_unit_scope(snap);
        assert!(ctx.global.lookup("outer").is_some());
        assert!(ctx.global.lookup("inner").is_none());
    }

    #[test]
    fn nullify_aliases_by_address_clears_matching_pointers_only() {
        let mut table = SymbolTable::new();
        let mut a = Symbol::new("a", VarType::Pointer, None);
        *a.value.borrow_mut() = Value::Pointer { target: None, address: 42 };
        let mut b = Symbol::new("b", VarType::Pointer, None);
        *b.value.borrow_mut() = Value::Pointer { target: None, address: 99 };
        table.insert(a);
        table.insert(b);

        Context::nullify_aliases_by_address(&mut table, 42);

        assert!(matches!(*table.lookup("a").unwrap().value.borrow(), Value::Nil));
        assert!(matches!(
            *table.lookup("b").unwrap().value.borrow(),
            Value::Pointer { address: 99, .. }
        ));
    }
}
