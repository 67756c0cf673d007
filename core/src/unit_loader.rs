//! C8: the unit loader. Resolves a `uses`-clause name to a source file
//! (§6.2), parses and annotates it, recurses into its own nested
//! `uses`-clause first, then links its interface's published symbols into
//! the importing scope (§4.8, §4.6's "ordering guarantees"). Grounded on
//! the original implementation's unit-loading pass in `Pascal/parser.c`
//! (`linkUnit`/`parseUnit`), reworked to return `Result` instead of calling
//! the process exit handler, per §9's redesign note.

use crate::ast::{Ast, AstKind, NodeId};
use crate::consts::{DEFAULT_UNIT_DIR, MAX_RECURSION_DEPTH, UNIT_PATH_ENV_VAR};
use crate::emitter::Emitter;
use crate::error::{LoaderError, ParseError, SemanticError, SourceErrorWrapper, WithSource};
use crate::lexer::{LexError, Span};
use crate::parser::Parser;
use crate::semant;
use crate::symbol::{Context, Symbol};
use failure::Fail;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// Every stage the loader drives through can fail in its own vocabulary;
/// this aggregates them rather than flattening everything into
/// `LoaderError`, so a caller can still tell a missing file from a syntax
/// error in the file it found.
#[derive(Debug, Fail)]
pub enum LoaderFailure {
    #[fail(display = "{}", _0)]
    Loader(WithSource<LoaderError>),
    #[fail(display = "{}", _0)]
    Lex(LexError),
    #[fail(display = "{}", _0)]
    Parse(WithSource<ParseError>),
    #[fail(display = "{}", _0)]
    Semantic(WithSource<SemanticError>),
}

impl From<WithSource<ParseError>> for LoaderFailure {
    fn from(e: WithSource<ParseError>) -> Self {
        LoaderFailure::Parse(e)
    }
}

impl From<WithSource<SemanticError>> for LoaderFailure {
    fn from(e: WithSource<SemanticError>) -> Self {
        LoaderFailure::Semantic(e)
    }
}

impl From<LexError> for LoaderFailure {
    fn from(e: LexError) -> Self {
        LoaderFailure::Lex(e)
    }
}

fn loader_err(unit_name: &str, err: LoaderError) -> LoaderFailure {
    let span = Span::point(0, 0);
    LoaderFailure::Loader(WithSource::new(
        vec![SourceErrorWrapper::new(err, span, unit_name)],
        unit_name.to_string(),
    ))
}

/// Drives `uses`-clause resolution for one compilation. Owns the search
/// path (read once from `PSCAL_UNIT_PATH`, §6.2) and the dependency-path
/// ledger every loaded unit's canonical path is appended to, in load order,
/// for downstream tooling (e.g. a `make`-style dependency list).
///
/// Rust representation: the "insertion order, no duplicates" requirement is
/// met with a plain `Vec<PathBuf>` plus a side `HashSet<PathBuf>` for O(1)
/// membership — an `indexmap` would do this in one structure, but this
/// crate doesn't otherwise need that dependency, so it isn't reached for
/// here either.
pub struct UnitLoader<'e, E: Emitter>
where
    E::Chunk: Default,
{
    emitter: &'e mut E,
    search_dirs: Vec<PathBuf>,
    dependency_paths: Vec<PathBuf>,
    dependency_set: HashSet<PathBuf>,
}

impl<'e, E: Emitter> UnitLoader<'e, E>
where
    E::Chunk: Default,
{
    pub fn new(emitter: &'e mut E) -> Self {
        let search_dirs = match std::env::var(UNIT_PATH_ENV_VAR) {
            Ok(val) if !val.is_empty() => val.split(':').map(PathBuf::from).collect(),
            _ => vec![PathBuf::from(DEFAULT_UNIT_DIR)],
        };
        UnitLoader {
            emitter,
            search_dirs,
            dependency_paths: Vec::new(),
            dependency_set: HashSet::new(),
        }
    }

    /// The canonicalised path of every unit loaded so far, in load order,
    /// with no duplicates — even if the same unit was `uses`d from more
    /// than one place in the dependency graph.
    pub fn dependency_paths(&self) -> &[PathBuf] {
        &self.dependency_paths
    }

    fn resolve_path(&self, unit_name: &str) -> Result<PathBuf, LoaderFailure> {
        let file_name = format!("{}.pas", unit_name.to_ascii_lowercase());
        for dir in &self.search_dirs {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(loader_err(unit_name, LoaderError::UnitFileNotFound { unit_name: unit_name.to_string() }))
    }

    fn record_dependency(&mut self, path: &Path) {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.dependency_set.insert(canonical.clone()) {
            self.dependency_paths.push(canonical);
        }
    }

    /// Entry point: loads `unit_name` (and, transitively, everything it
    /// `uses`) into `ctx`, publishing the unit's interface symbols into
    /// `ctx`'s currently active scope. Returns the loaded unit's AST plus
    /// its root node, so a caller wanting to inspect or recompile it can.
    pub fn load(&mut self, ctx: &mut Context, unit_name: &str) -> Result<(Ast, NodeId), LoaderFailure> {
        self.load_depth(ctx, unit_name, 0)
    }

    fn load_depth(&mut self, ctx: &mut Context, unit_name: &str, depth: u32) -> Result<(Ast, NodeId), LoaderFailure> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(loader_err(
                unit_name,
                LoaderError::RecursionTooDeep { unit_name: unit_name.to_string(), depth },
            ));
        }
        if ctx.break_requested.load(Ordering::SeqCst) {
            // §4.6 cancellation: unit recursion returns at the next boundary.
            return Err(loader_err(unit_name, LoaderError::RecursionTooDeep { unit_name: unit_name.to_string(), depth }));
        }

        let path = self.resolve_path(unit_name)?;
        self.record_dependency(&path);

        let source = fs::read_to_string(&path)
            .map_err(|_| loader_err(unit_name, LoaderError::FileReadShortRead { unit_name: unit_name.to_string() }))?;

        // Scope this unit's four tables and its type registry away from the
        // caller's for the whole load, parsing included (§4.3: "all four
        // tables plus the type registry" shadow per unit) — so a nested
        // `uses`d unit's interface lands in *this* unit's own scope instead
        // of leaking straight into the top-level program, and so this
        // unit's own implementation-private types never outlive its own
        // link step.
        let snapshot = ctx.push_unit_scope();
        match self.load_unit_body(ctx, unit_name, &source, depth) {
            Ok((ast, unit_node, interface_names, interface_type_names)) => {
                link_unit(ctx, snapshot, &interface_names, &interface_type_names);
                Ok((ast, unit_node))
            }
            Err(e) => {
                ctx.pop_unit_scope(snapshot);
                Err(e)
            }
        }
    }

    /// Parses `source` as a unit, recurses into its own nested `uses`-clause
    /// (§4.6's ordering guarantee), then annotates and emits it — all
    /// against `ctx`'s already-pushed unit-local scope. Returns the names
    /// `link_unit` is allowed to publish once the caller pops that scope
    /// back off.
    fn load_unit_body(
        &mut self,
        ctx: &mut Context,
        unit_name: &str,
        source: &str,
        depth: u32,
    ) -> Result<(Ast, NodeId, Vec<String>, Vec<String>), LoaderFailure> {
        let mut parser = Parser::new(source)?;
        let unit_node = parser.parse_unit(ctx)?;
        let mut ast = parser.ast;

        let nested_names = ast
            .node(unit_node)
            .children
            .iter()
            .copied()
            .filter(|&c| ast.node(c).kind == AstKind::UsesClause)
            .flat_map(|c| ast.node(c).unit_list.clone())
            .collect::<Vec<_>>();

        for dep_name in nested_names {
            let (_dep_ast, _dep_root) = self.load_depth(ctx, &dep_name, depth + 1)?;
        }

        let interface_names = collect_interface_names(&ast, unit_node);
        let interface_type_names = collect_interface_type_names(&ast, unit_node);

        semant::annotate_unit(&mut ast, ctx, unit_node, source)?;

        let mut chunk = E::Chunk::default();
        self.emitter
            .compile_unit_implementation(&ast, unit_node, &mut chunk)
            .map_err(|_| loader_err(unit_name, LoaderError::FileReadShortRead { unit_name: unit_name.to_string() }))?;

        Ok((ast, unit_node, interface_names, interface_type_names))
    }
}

/// Collects the names declared directly in a unit's interface section
/// (vars, consts, routines) — the only names `link_unit` is allowed to
/// publish into the importing scope. Implementation-only declarations stay
/// private to the unit.
fn collect_interface_names(ast: &Ast, unit: NodeId) -> Vec<String> {
    let interface_decls = match interface_decls(ast, unit) {
        Some(d) => d,
        None => return Vec::new(),
    };
    ast.node(interface_decls)
        .children
        .iter()
        .filter_map(|&child| {
            let node = ast.node(child);
            match node.kind {
                AstKind::VarDecl | AstKind::ConstDecl | AstKind::ProcedureDecl | AstKind::FunctionDecl => {
                    node.token.as_ref().map(|t| t.lexeme.clone())
                }
                _ => None,
            }
        })
        .collect()
}

/// Same as [`collect_interface_names`], but for `type` declarations — these
/// publish into `ctx.types`, not a `SymbolTable`, so `link_unit` handles
/// them through a separate list.
fn collect_interface_type_names(ast: &Ast, unit: NodeId) -> Vec<String> {
    let interface_decls = match interface_decls(ast, unit) {
        Some(d) => d,
        None => return Vec::new(),
    };
    ast.node(interface_decls)
        .children
        .iter()
        .filter_map(|&child| {
            let node = ast.node(child);
            match node.kind {
                AstKind::TypeDecl => node.token.as_ref().map(|t| t.lexeme.clone()),
                _ => None,
            }
        })
        .collect()
}

fn interface_decls(ast: &Ast, unit: NodeId) -> Option<NodeId> {
    let interface_block = ast.node(unit).right?;
    ast.node(interface_block).children.first().copied()
}

/// Restores `ctx`'s pre-unit scope, then re-publishes exactly the
/// interface-declared names' symbols (and, separately, the
/// interface-declared types) into it — a global var/const keeps its value,
/// a routine keeps its (possibly now fully defined) declaration node, a
/// type is copied into the restored registry under its name. Anything
/// declared only in the implementation section — including
/// implementation-private types — is dropped along with the rest of the
/// unit-local scope.
fn link_unit(
    ctx: &mut Context,
    snapshot: crate::symbol::ContextSnapshot,
    interface_names: &[String],
    interface_type_names: &[String],
) {
    let unit_global = std::mem::take(&mut ctx.global);
    let unit_procedures = std::mem::take(ctx.procedures_top_mut());
    let unit_const_table = std::mem::take(&mut ctx.const_table);
    let unit_types = std::mem::take(&mut ctx.types);

    ctx.pop_unit_scope(snapshot);

    for name in interface_names {
        let key = name.to_ascii_lowercase();
        if let Some(sym) = unit_global.lookup(&key) {
            publish_symbol(ctx, sym.clone());
        }
        if let Some(sym) = unit_procedures.lookup(&key) {
            let mut alias = sym.clone();
            alias.is_alias = true;
            ctx.procedures_top_mut().insert(alias);
        }
        if let Some(value) = unit_const_table.get(&key) {
            ctx.const_table.insert(key, value.clone());
        }
    }

    for name in interface_type_names {
        if let Some((_, node)) = unit_types.find_entry(name) {
            ctx.types.insert(name, unit_types.arena(), node);
        }
    }
}

fn publish_symbol(ctx: &mut Context, mut sym: Symbol) {
    sym.is_alias = true;
    ctx.global.insert(sym);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::NoOpEmitter;
    use std::io::Write;

    fn write_unit(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(format!("{}.pas", name));
        let mut file = fs::File::create(path).expect("create unit file");
        file.write_all(contents.as_bytes()).expect("write unit file");
    }

    #[test]
    fn resolves_unit_from_unit_path_env_var() {
        let dir = std::env::temp_dir().join(format!("pscal_unit_loader_test_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        write_unit(
            &dir,
            "mathutils",
            "unit MathUtils;\ninterface\nconst Pi = 3;\nfunction Double(x: integer): integer;\nimplementation\nfunction Double(x: integer): integer;\nbegin\nend;\nend.\n",
        );

        std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
        let mut emitter = NoOpEmitter::new();
        let mut loader = UnitLoader::new(&mut emitter);
        let mut ctx = Context::new();
        let result = loader.load(&mut ctx, "MathUtils");
        std::env::remove_var(UNIT_PATH_ENV_VAR);
        fs::remove_dir_all(&dir).ok();

        assert!(result.is_ok(), "expected unit to load: {:?}", result.err());
        assert_eq!(loader.dependency_paths().len(), 1);
        assert!(ctx.const_table.contains_key("pi"));
        assert!(ctx.procedures_top_mut().lookup("double").is_some());
    }

    #[test]
    fn missing_unit_file_is_reported() {
        let dir = std::env::temp_dir().join(format!("pscal_unit_loader_missing_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
        let mut emitter = NoOpEmitter::new();
        let mut loader = UnitLoader::new(&mut emitter);
        let mut ctx = Context::new();
        let result = loader.load(&mut ctx, "NoSuchUnit");
        std::env::remove_var(UNIT_PATH_ENV_VAR);
        fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(LoaderFailure::Loader(_))));
    }
}
