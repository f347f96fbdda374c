//! End-to-end coverage of `sdlsl_driver`'s three entry points against
//! small fixture shaders, the CLI binary's actual load-bearing surface.

use sdlsl_driver::{CompilerParams, Context};

#[test]
fn preprocess_expands_a_macro_and_strips_comments() {
    let ctx = Context::new();
    let src = "#define TWO 1 + 1\nint x = /* drop me */ TWO;\n";
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::preprocess(&ctx, &params, None);
    assert!(!out.is_failed, "errors: {:?}", out.errors);
    assert!(out.output.contains('1'));
    assert!(!out.output.contains("drop me"));
}

#[test]
fn parse_to_ast_builds_one_function_per_declaration() {
    let ctx = Context::new();
    let src = "function void main() { }\nfunction int add(int a, int b) { return a + b; }\n";
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::parse_to_ast(&ctx, &params, None);
    assert!(!out.is_failed, "errors: {:?}", out.errors);
    assert_eq!(out.shader.units.len(), 2);
}

#[test]
fn compile_accepts_a_well_typed_fragment_shader() {
    let ctx = Context::new();
    let src = r#"
        function void main() @fragment {
            var float3 color = float3(1, 0, 0);
            if (color.x > 0) {
                discard;
            }
        }
    "#;
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::compile(&ctx, &params, None);
    assert!(!out.is_failed, "errors: {:?}", out.errors);
    assert!(out.output.is_empty());
    assert!(out.types.is_some());
}

#[test]
fn compile_reports_discard_outside_fragment_function() {
    let ctx = Context::new();
    let src = "function void main() { discard; }\n";
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::compile(&ctx, &params, None);
    assert!(out.is_failed);
    assert!(out.errors.iter().any(|e| e.message.contains("@fragment")));
}

#[test]
fn compile_reports_undefined_symbol_once_per_function() {
    let ctx = Context::new();
    let src = "function void main() { var int a = totally_undefined + totally_undefined; }\n";
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::compile(&ctx, &params, None);
    assert!(out.is_failed);
    let undefined_count = out.errors.iter().filter(|e| e.message.contains("is undefined")).count();
    assert_eq!(undefined_count, 1);
}

#[test]
fn compile_resolves_a_forward_reference_between_functions() {
    let ctx = Context::new();
    let src = "function void caller() { helper(); }\nfunction void helper() { }\n";
    let params = CompilerParams::new(src);
    let out = sdlsl_driver::compile(&ctx, &params, None);
    assert!(!out.is_failed, "errors: {:?}", out.errors);
}

#[test]
fn include_is_resolved_through_a_local_search_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("shared.sdlsl"), "function void helper() { }\n").unwrap();

    let ctx = Context::new();
    let mut params = CompilerParams::new("#include \"shared.sdlsl\"\nfunction void main() { helper(); }\n");
    params.local_include_paths.push(dir.path().to_path_buf());
    let out = sdlsl_driver::compile(&ctx, &params, None);
    assert!(!out.is_failed, "errors: {:?}", out.errors);
}
