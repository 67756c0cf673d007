#![deny(clippy::all)]

use anyhow::Context;
use pscal_core::emitter::{Emitter, NoOpEmitter};
use pscal_core::json_ast;
use pscal_core::symbol::SymbolTable;
use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    process,
};
use structopt::StructOpt;

/// Reads a pre-built AST as JSON and drives it through an [`Emitter`], per
/// the `json2bc`-equivalent tool's contract: `ast.json | -` in, optionally a
/// disassembly on stdout, optionally a bytecode chunk written to `-o`.
#[derive(Debug, StructOpt)]
#[structopt(name = "pscaljson2bc")]
struct Opt {
    /// Print a disassembly of the emitted chunk to stdout.
    #[structopt(long = "dump-bytecode")]
    dump_bytecode: bool,

    /// Print the disassembly and skip writing the bytecode file.
    #[structopt(long = "dump-bytecode-only")]
    dump_bytecode_only: bool,

    /// Path to write the emitted bytecode chunk to.
    #[structopt(parse(from_os_str), short = "o", default_value = "out.bc")]
    output: PathBuf,

    /// Path to the AST JSON document, or `-` to read it from stdin.
    #[structopt(default_value = "-")]
    input: String,
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read AST JSON from stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(input)
            .with_context(|| format!("failed to read AST JSON file {:?}", input))
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let raw = read_input(&opt.input)?;
    log::debug!("read {} bytes of AST JSON from {:?}", raw.len(), opt.input);

    let json: serde_json::Value =
        serde_json::from_str(&raw).context("AST input is not valid JSON")?;

    let mut ast = pscal_core::Ast::new();
    let root = json_ast::from_json(&mut ast, &json)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("failed to reconstruct AST from JSON")?;
    log::debug!("reconstructed AST rooted at {:?}", root);

    let mut emitter = NoOpEmitter::new();
    let mut chunk: Vec<u8> = Vec::new();
    emitter
        .compile_program(&ast, root, &mut chunk)
        .context("emitter rejected this AST")?;

    if opt.dump_bytecode || opt.dump_bytecode_only {
        let procedures = SymbolTable::new();
        let name = if opt.input == "-" { "stdin" } else { &opt.input };
        println!("{}", emitter.disassemble(&chunk, name, &procedures));
    }

    if opt.dump_bytecode_only {
        return Ok(());
    }

    fs::write(&opt.output, &chunk)
        .with_context(|| format!("failed to write bytecode to {:?}", opt.output))?;
    log::debug!("wrote {} bytes to {:?}", chunk.len(), opt.output);

    Ok(())
}

fn main() {
    env_logger::init();
    let exit_code = match run(Opt::from_args()) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    process::exit(exit_code);
}
