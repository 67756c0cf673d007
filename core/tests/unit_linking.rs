//! Integration test for property 8: after linking a unit, every routine
//! declared in its interface is visible in the importing scope under the
//! type its interface declaration gave it.

use pscal_core::emitter::NoOpEmitter;
use pscal_core::unit_loader::UnitLoader;
use pscal_core::{Context, VarType};
use std::fs;
use std::io::Write;
use std::path::Path;

const UNIT_PATH_ENV_VAR: &str = "PSCAL_UNIT_PATH";

fn write_unit(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(format!("{}.pas", name));
    let mut file = fs::File::create(path).expect("create unit file");
    file.write_all(contents.as_bytes()).expect("write unit file");
}

#[test]
fn interface_routine_is_visible_with_correct_type_after_linking() {
    let dir = std::env::temp_dir().join(format!("pscal_unit_linking_test_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    write_unit(
        &dir,
        "shapes",
        "unit Shapes;\n\
         interface\n\
         function Area(side: integer): integer;\n\
         implementation\n\
         function Area(side: integer): integer;\n\
         begin\n\
         Area := side * side\n\
         end;\n\
         end.\n",
    );

    std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
    let mut emitter = NoOpEmitter::new();
    let mut loader = UnitLoader::new(&mut emitter);
    let mut ctx = Context::new();
    let result = loader.load(&mut ctx, "Shapes");
    std::env::remove_var(UNIT_PATH_ENV_VAR);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_ok(), "expected unit to load: {:?}", result.err());

    let sym = ctx
        .procedures_top_mut()
        .lookup("area")
        .expect("Area should be published into the importing scope");
    assert_eq!(sym.var_type, VarType::Int64);
}

#[test]
fn implementation_only_names_stay_private_to_the_unit() {
    let dir = std::env::temp_dir().join(format!("pscal_unit_linking_private_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    write_unit(
        &dir,
        "helpers",
        "unit Helpers;\n\
         interface\n\
         procedure DoWork;\n\
         implementation\n\
         var secret: integer;\n\
         procedure DoWork;\n\
         begin\n\
         secret := 1\n\
         end;\n\
         end.\n",
    );

    std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
    let mut emitter = NoOpEmitter::new();
    let mut loader = UnitLoader::new(&mut emitter);
    let mut ctx = Context::new();
    let result = loader.load(&mut ctx, "Helpers");
    std::env::remove_var(UNIT_PATH_ENV_VAR);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_ok(), "expected unit to load: {:?}", result.err());
    assert!(ctx.procedures_top_mut().lookup("dowork").is_some());
    assert!(ctx.global.lookup("secret").is_none());
}

/// An interface-declared type is published into the caller's type
/// registry; an implementation-only type is not.
#[test]
fn interface_type_is_published_but_implementation_type_is_not() {
    let dir = std::env::temp_dir().join(format!("pscal_unit_linking_types_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    write_unit(
        &dir,
        "geometry",
        "unit Geometry;\n\
         interface\n\
         type TPoint = record\n\
         x: integer;\n\
         y: integer;\n\
         end;\n\
         implementation\n\
         type TScratch = record\n\
         tmp: integer;\n\
         end;\n\
         end.\n",
    );

    std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
    let mut emitter = NoOpEmitter::new();
    let mut loader = UnitLoader::new(&mut emitter);
    let mut ctx = Context::new();
    let result = loader.load(&mut ctx, "Geometry");
    std::env::remove_var(UNIT_PATH_ENV_VAR);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_ok(), "expected unit to load: {:?}", result.err());
    assert!(ctx.types.lookup("tpoint").is_some());
    assert!(
        ctx.types.lookup("tscratch").is_none(),
        "implementation-only type must not leak into the importing scope"
    );
}

/// Three-level nested `uses`: `A uses B`, `B uses C`, and `B`'s own
/// implementation calls a function `C` exports. `C`'s export must be
/// visible while `B` is being annotated, but must not leak past `B`'s own
/// link step into the scope that loaded `A`.
#[test]
fn nested_uses_resolves_transitively_without_leaking_past_its_own_unit() {
    let dir = std::env::temp_dir().join(format!("pscal_unit_linking_nested_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    write_unit(
        &dir,
        "cunit",
        "unit CUnit;\n\
         interface\n\
         function Triple(x: integer): integer;\n\
         implementation\n\
         function Triple(x: integer): integer;\n\
         begin\n\
         Triple := x * 3\n\
         end;\n\
         end.\n",
    );
    write_unit(
        &dir,
        "bunit",
        "unit BUnit;\n\
         uses CUnit;\n\
         interface\n\
         function Quadruple(x: integer): integer;\n\
         implementation\n\
         function Quadruple(x: integer): integer;\n\
         begin\n\
         Quadruple := Triple(x) + x\n\
         end;\n\
         end.\n",
    );
    write_unit(
        &dir,
        "aunit",
        "unit AUnit;\n\
         uses BUnit;\n\
         interface\n\
         function Sextuple(x: integer): integer;\n\
         implementation\n\
         function Sextuple(x: integer): integer;\n\
         begin\n\
         Sextuple := Quadruple(x) + x + x\n\
         end;\n\
         end.\n",
    );

    std::env::set_var(UNIT_PATH_ENV_VAR, dir.to_str().unwrap());
    let mut emitter = NoOpEmitter::new();
    let mut loader = UnitLoader::new(&mut emitter);
    let mut ctx = Context::new();
    let result = loader.load(&mut ctx, "AUnit");
    std::env::remove_var(UNIT_PATH_ENV_VAR);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_ok(), "expected unit to load: {:?}", result.err());
    assert_eq!(loader.dependency_paths().len(), 3);

    assert!(ctx.procedures_top_mut().lookup("sextuple").is_some());
    assert!(
        ctx.procedures_top_mut().lookup("quadruple").is_none(),
        "BUnit's own export must not leak past AUnit's link step"
    );
    assert!(
        ctx.procedures_top_mut().lookup("triple").is_none(),
        "CUnit's export must not leak past BUnit's link step"
    );
}
