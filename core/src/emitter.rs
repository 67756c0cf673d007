//! C external interface: the code generator the core hands a fully
//! annotated AST to (§6.1). Modeled as a trait so this crate compiles and
//! tests itself with no concrete bytecode backend linked in — same shape as
//! the `Emitter` boundary in the original implementation's `compiler/`
//! directory, minus the thread-local chunk-building globals it used.

use crate::ast::{Ast, NodeId};
use crate::symbol::SymbolTable;
use failure::Fail;

/// Failure surface for a concrete [`Emitter`]. The core never constructs
/// these itself — they only flow back out of a caller-supplied backend.
#[derive(Debug, Fail)]
pub enum EmitError {
    #[fail(display = "emitter does not support this construct: {}", what)]
    Unsupported { what: String },
}

/// The four operations §6.1 says the core invokes on a code generator. A
/// real backend assigns bytecode addresses to procedures as it emits them;
/// `Chunk` is left abstract so this crate never has to know the concrete
/// bytecode representation.
pub trait Emitter {
    type Chunk;

    /// Compiles a top-level `AST_PROGRAM` node into bytecode.
    fn compile_program(&mut self, ast: &Ast, program: NodeId, out: &mut Self::Chunk) -> Result<(), EmitError>;

    /// Emits code for a unit's implementation section, assigning each
    /// routine a bytecode address inside `out`.
    fn compile_unit_implementation(&mut self, ast: &Ast, unit: NodeId, out: &mut Self::Chunk) -> Result<(), EmitError>;

    /// Clears the emitter's own constant cache before a new compilation.
    fn reset_compiler_state(&mut self);

    /// Optional diagnostic dump of `out`'s contents, reading routine names
    /// (lowercased) out of `procedures`.
    fn disassemble(&self, out: &Self::Chunk, name: &str, procedures: &SymbolTable) -> String;
}

/// Does no code generation at all. Used by the JSON round-trip tool and by
/// this crate's own tests, which only need *something* to hand the unit
/// loader and `Compiler` pipeline — not an actual VM.
#[derive(Debug, Default)]
pub struct NoOpEmitter {
    reset_count: u32,
}

impl NoOpEmitter {
    pub fn new() -> Self {
        NoOpEmitter::default()
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }
}

impl Emitter for NoOpEmitter {
    type Chunk = Vec<u8>;

    fn compile_program(&mut self, _ast: &Ast, _program: NodeId, _out: &mut Self::Chunk) -> Result<(), EmitError> {
        Ok(())
    }

    fn compile_unit_implementation(&mut self, _ast: &Ast, _unit: NodeId, _out: &mut Self::Chunk) -> Result<(), EmitError> {
        Ok(())
    }

    fn reset_compiler_state(&mut self) {
        self.reset_count += 1;
    }

    fn disassemble(&self, out: &Self::Chunk, name: &str, procedures: &SymbolTable) -> String {
        format!("; {} ({} bytes, {} procedures)", name, out.len(), procedures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;

    #[test]
    fn no_op_emitter_never_fails() {
        let ast = Ast::new();
        let mut emitter = NoOpEmitter::new();
        let mut chunk = Vec::new();
        let procedures = SymbolTable::new();
        assert!(emitter.compile_program(&ast, NodeId(0), &mut chunk).is_ok());
        emitter.reset_compiler_state();
        assert_eq!(emitter.reset_count(), 1);
        let dump = emitter.disassemble(&chunk, "main", &procedures);
        assert!(dump.contains("main"));
    }
}
