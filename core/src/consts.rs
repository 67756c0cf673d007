/// Maximum depth of nested `uses`-clause resolution before the loader gives
/// up and reports [`crate::error::LoaderError::RecursionTooDeep`].
pub const MAX_RECURSION_DEPTH: u32 = 10;

/// Upper bound on the "recently freed" node tracker used by [`crate::ast::Ast::free`]
/// to short-circuit cycles reached through weak edges (`type_def`, shared
/// `TYPE_REFERENCE.right`). Oldest entries are evicted once this is exceeded.
pub const RECENTLY_FREED_CAPACITY: usize = 256;

/// Initial capacity new AST child vectors are allocated with before the first
/// geometric growth, mirroring the original implementation's `addChild`.
pub const AST_CHILD_INITIAL_CAPACITY: usize = 4;

/// Environment variable consulted by the unit loader (§6.2) for an ordered,
/// `:`-separated list of directories to search for unit source files.
pub const UNIT_PATH_ENV_VAR: &str = "PSCAL_UNIT_PATH";

/// Fallback unit search directory used when `PSCAL_UNIT_PATH` is unset.
pub const DEFAULT_UNIT_DIR: &str = "units";
