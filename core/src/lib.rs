//! The language-independent middle-end of a multi-frontend scripting
//! toolchain: lexer, recursive-descent parser, AST, symbol and type tables,
//! constant folder, semantic annotator, and unit loader/linker (§1). The
//! bytecode emitter and virtual machine are out of scope — this crate talks
//! to them only through the [`Emitter`](emitter::Emitter) trait.
//!
//! ```
//! use pscal_core::compile;
//!
//! let source = "program Hello; var x: integer; begin x := 1 end.";
//! let compiled = compile(source).unwrap();
//! ```

#![deny(clippy::all, unused_must_use, unused_imports)]

pub mod ast;
mod consts;
pub mod const_fold;
pub mod emitter;
pub mod error;
pub mod json_ast;
mod lexer;
pub mod parser;
pub mod semant;
pub mod symbol;
mod token;
pub mod types;
#[macro_use]
mod util;
pub mod unit_loader;
pub mod value;

pub use ast::{Ast, AstKind, NodeId};
pub use consts::{DEFAULT_UNIT_DIR, MAX_RECURSION_DEPTH, RECENTLY_FREED_CAPACITY, UNIT_PATH_ENV_VAR};
pub use error::*;
pub use lexer::{LexError, Lexer, Span};
pub use parser::Parser;
pub use symbol::{Context, Symbol, SymbolTable};
pub use token::{Token, TokenKind};
pub use types::{TypeId, TypeRegistry};
pub use unit_loader::{LoaderFailure, UnitLoader};
pub use value::{VarType, Value};

use std::fmt::Debug;

/// Everything [`compile`] hands back: the AST, the root `AST_PROGRAM` node,
/// and the `Context` that accumulated every symbol/type/const-table entry
/// along the way. A caller resolving this program's `uses`-clauses, or
/// handing the tree to an [`emitter::Emitter`], needs all three.
#[derive(Debug)]
pub struct CompiledProgram {
    pub ast: Ast,
    pub root: NodeId,
    pub ctx: Context,
    /// Non-fatal parser diagnostics, e.g. a routine declaration shadowing a
    /// built-in name without an `{$OVERRIDE-BUILTIN ...}` directive (§4.6).
    pub warnings: Vec<String>,
}

/// Aggregates the two stages [`compile`] drives, the same way
/// [`unit_loader::LoaderFailure`] aggregates the loader's stages.
#[derive(Debug, failure::Fail)]
pub enum CompileError {
    #[fail(display = "{}", _0)]
    Lex(LexError),
    #[fail(display = "{}", _0)]
    Parse(error::WithSource<error::ParseError>),
    #[fail(display = "{}", _0)]
    Semantic(error::WithSource<error::SemanticError>),
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<error::WithSource<error::ParseError>> for CompileError {
    fn from(e: error::WithSource<error::ParseError>) -> Self {
        CompileError::Parse(e)
    }
}

impl From<error::WithSource<error::SemanticError>> for CompileError {
    fn from(e: error::WithSource<error::SemanticError>) -> Self {
        CompileError::Semantic(e)
    }
}

/// Parses and semantically annotates `source` as a top-level program,
/// returning the annotated AST and the `Context` that accumulated its
/// symbols. Does not resolve `uses`-clauses — see [`unit_loader::UnitLoader`]
/// for that.
pub fn compile(source: &str) -> Result<CompiledProgram, CompileError> {
    Ok(Compiler::new(source)
        .debug()
        .parse()?
        .debug()
        .annotate()?
        .debug()
        .0)
}

/// Struct to contain all compiler pipeline steps. By having this on a
/// struct, it makes it nice and easy to call functions in order with
/// readability. Each compiler step should take a `self` param and return a
/// new `Compiler`.
///
/// `T` is the current type of the program. This controls which compiler
/// pipeline stages can be called. For example, if `T` is `&str`, then
/// `.parse()` is the only available operation. This allows us to leverage
/// the type system to enforce assumptions we might make in each compiler
/// stage.
///
/// The value in the compiler is deliberately private, to prevent a compiler
/// from being directly constructed from outside this module. This means
/// that you must follow the proper pipeline stages to get the compiler to a
/// certain state.
#[derive(Debug)]
struct Compiler<T: Debug>(T);

impl<T: Debug> Compiler<T> {
    /// Prints out the current state of this compiler, if debug mode is
    /// enabled. Takes in self and returns the same value, so that this can
    /// be used in the function call chain.
    fn debug(self) -> Self {
        debug!(println!("{:?}", &self));
        self
    }
}

impl<'a> Compiler<&'a str> {
    /// Constructs a new compiler with no internal state. This is how you
    /// start a fresh compiler pipeline.
    fn new(source: &'a str) -> Self {
        Compiler(source)
    }

    fn parse(self) -> Result<Compiler<(Ast, NodeId, Context, String, Vec<String>)>, CompileError> {
        let source = self.0;
        let mut ctx = Context::new();
        let mut parser = Parser::new(source)?;
        let root = parser.parse_program(&mut ctx)?;
        Ok(Compiler((parser.ast, root, ctx, source.to_string(), parser.warnings)))
    }
}

impl Compiler<(Ast, NodeId, Context, String, Vec<String>)> {
    fn annotate(self) -> Result<Compiler<CompiledProgram>, CompileError> {
        let (mut ast, root, mut ctx, source, warnings) = self.0;
        semant::annotate(&mut ast, &mut ctx, root, &source)?;
        Ok(Compiler(CompiledProgram { ast, root, ctx, warnings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_annotates_a_minimal_program() {
        let result = compile("program Hello; var x: integer; begin x := 1 + 2 end.");
        assert!(result.is_ok());
    }

    #[test]
    fn compile_surfaces_undeclared_identifier_as_semantic_error() {
        let result = compile("program Hello; begin y := 1 end.");
        assert!(matches!(result, Err(CompileError::Semantic(_))));
    }

    #[test]
    fn compile_surfaces_parse_errors() {
        let result = compile("program ; begin end.");
        assert!(matches!(result, Err(CompileError::Parse(_))));
    }
}
