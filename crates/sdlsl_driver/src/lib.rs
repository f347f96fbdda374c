//! Driver: owns a compilation's [`Context`], accepts [`CompilerParams`],
//! and exposes the three entry points a caller drives the front end
//! through (`preprocess`, `parse_to_ast`, `compile`). Everything here is a
//! thin orchestration layer over `sdlsl_pp`/`sdlsl_parse`/`sdlsl_sema` —
//! the interesting logic lives in those crates.

mod include;

pub use include::{default_include_open, IncludeError};

use bumpalo::Bump;
use sdlsl_ast::Shader;
use sdlsl_errors::{ErrorEntry, Session};
use sdlsl_pp::{IncludeOpen, PpOptions, Preprocessor};
use sdlsl_sema::DataTypeTable;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const DEFAULT_SOURCE_PROFILE: &str = "sdlsl_1_0";
/// Matches the original toolchain's include-nesting guard: turns a
/// self-including shader into a diagnostic instead of a stack overflow.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 34;

/// Programmatic configuration surface. The CLI binary is one caller of
/// this; tests and embedders are others.
pub struct CompilerParams {
    pub source_profile: Option<String>,
    pub filename: Option<String>,
    pub source: String,
    pub allow_dotdot_includes: bool,
    pub allow_absolute_includes: bool,
    pub predefined_macros: Vec<(String, String)>,
    pub system_include_paths: Vec<PathBuf>,
    pub local_include_paths: Vec<PathBuf>,
    pub max_include_depth: usize,
    /// Drop comments from [`preprocess`]'s output text. Defaults to
    /// preserving them, matching the rest of the preprocessed text being
    /// reproduced verbatim.
    pub strip_comments: bool,
}

impl CompilerParams {
    pub fn new(source: impl Into<String>) -> Self {
        CompilerParams {
            source_profile: None,
            filename: None,
            source: source.into(),
            allow_dotdot_includes: false,
            allow_absolute_includes: false,
            predefined_macros: Vec::new(),
            system_include_paths: Vec::new(),
            local_include_paths: Vec::new(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            strip_comments: false,
        }
    }

    fn source_profile(&self) -> &str {
        self.source_profile.as_deref().unwrap_or(DEFAULT_SOURCE_PROFILE)
    }

    fn pp_options(&self) -> PpOptions {
        PpOptions {
            allow_dotdot_includes: self.allow_dotdot_includes,
            allow_absolute_includes: self.allow_absolute_includes,
            max_include_depth: self.max_include_depth,
            strip_comments: self.strip_comments,
        }
    }
}

/// Owns the interner, diagnostic handler, and the arena a compilation's
/// intermediate buffers are allocated from. Callers that get a `Shader`
/// back out of [`parse_to_ast`] must keep the `Context` that produced it
/// alive for as long as they read the shader's interned names.
pub struct Context {
    pub sess: Session,
    arena: Bump,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context { sess: Session::new(), arena: Bump::new() }
    }

    pub fn out_of_memory(&self) -> bool {
        self.sess.out_of_memory()
    }

    pub fn arena(&self) -> &Bump {
        &self.arena
    }
}

fn default_open_for(params: &CompilerParams) -> Box<IncludeOpen<'static>> {
    let including_file_dir = params.filename.as_deref().and_then(|f| PathBuf::from(f).parent().map(Path::to_path_buf));
    default_include_open(including_file_dir, params.local_include_paths.clone(), params.system_include_paths.clone())
}

fn build_preprocessor<'a>(
    ctx: &'a Context,
    params: &CompilerParams,
    open: Box<IncludeOpen<'a>>,
) -> Preprocessor<'a> {
    let filename = ctx.sess.intern(params.filename.as_deref().unwrap_or("<source>"));
    let mut pp = Preprocessor::new(&ctx.sess, filename, Rc::from(params.source.as_str()), params.pp_options(), open);
    for (name, value) in &params.predefined_macros {
        pp.predefine(&ctx.sess, name, value);
    }
    pp
}

/// Runs the preprocessor to completion and renders its output as text.
/// Turns on whitespace/comment reporting so each token arrives with the
/// exact source text that preceded it, then appends tokens verbatim —
/// input with no directives reproduces byte-for-byte. A dropped comment
/// (when `strip_comments` is set) has already been collapsed to a single
/// space by the time it reaches here.
fn run_preprocessor_to_text(ctx: &Context, mut pp: Preprocessor<'_>) -> String {
    pp.set_report_whitespace(true);
    let mut out = String::new();
    loop {
        let tok = pp.next_token(&ctx.sess);
        if tok.kind == sdlsl_lexer::TokenKind::Eoi {
            break;
        }
        out.push_str(&tok.text);
    }
    out
}

pub struct PreprocessOutput {
    pub errors: Vec<ErrorEntry>,
    pub output: String,
    pub is_failed: bool,
}

/// Preprocess entry point: `{error list, output text}`. `include_open`
/// defaults to [`default_include_open`] built from `params`'s search
/// paths when none is supplied; pass one explicitly to intercept
/// `#include` resolution (embedding a virtual filesystem, for example).
pub fn preprocess(ctx: &Context, params: &CompilerParams, include_open: Option<Box<IncludeOpen<'_>>>) -> PreprocessOutput {
    let _span = tracing::debug_span!("preprocess").entered();
    let open = include_open.unwrap_or_else(|| default_open_for(params));
    let pp = build_preprocessor(ctx, params, open);
    let output = run_preprocessor_to_text(ctx, pp);
    let errors = ctx.sess.handler.borrow().errors().clone().flatten();
    PreprocessOutput { output, is_failed: ctx.sess.is_failed(), errors }
}

pub struct ParseOutput {
    pub errors: Vec<ErrorEntry>,
    pub source_profile: String,
    pub shader: Shader,
    pub is_failed: bool,
}

/// Parse-to-AST entry point: runs the preprocessor and parser, but not
/// semantic analysis — the returned `Shader`'s `datatype`/`resolved`
/// fields are all still `None`.
pub fn parse_to_ast(ctx: &Context, params: &CompilerParams, include_open: Option<Box<IncludeOpen<'_>>>) -> ParseOutput {
    let _span = tracing::debug_span!("parse_to_ast").entered();
    let open = include_open.unwrap_or_else(|| default_open_for(params));
    let pp = build_preprocessor(ctx, params, open);
    let mut parser = sdlsl_parse::Parser::new(pp, &ctx.sess);
    let shader = parser.parse_shader();
    let errors = ctx.sess.handler.borrow().errors().clone().flatten();
    ParseOutput { shader, source_profile: params.source_profile().to_string(), is_failed: ctx.sess.is_failed(), errors }
}

pub struct CompileOutput {
    pub errors: Vec<ErrorEntry>,
    pub source_profile: String,
    pub output: Vec<u8>,
    pub is_failed: bool,
    pub types: Option<DataTypeTable>,
    pub shader: Option<Shader>,
}

/// Compile entry point: preprocess, parse, and run semantic analysis.
/// The back-end code generator is out of scope — `output` is always
/// empty, and a successful, type-checked compile is reported through
/// `is_failed == false` with an empty byte vector rather than a real
/// bytecode blob.
pub fn compile(ctx: &Context, params: &CompilerParams, include_open: Option<Box<IncludeOpen<'_>>>) -> CompileOutput {
    let _span = tracing::debug_span!("compile").entered();
    let mut parsed = parse_to_ast(ctx, params, include_open);
    let types = if parsed.is_failed {
        None
    } else {
        Some(sdlsl_sema::analyze(&ctx.sess, &mut parsed.shader))
    };
    let errors = ctx.sess.handler.borrow().errors().clone().flatten();
    CompileOutput {
        source_profile: parsed.source_profile,
        is_failed: ctx.sess.is_failed(),
        errors,
        output: Vec::new(),
        types,
        shader: Some(parsed.shader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_expands_macros_into_flat_text() {
        let ctx = Context::new();
        let params = CompilerParams::new("#define FOO 1 + 2\nint x = FOO;");
        let out = preprocess(&ctx, &params, None);
        assert!(!out.is_failed);
        assert!(out.output.contains("1 + 2") || out.output.contains("1+2"));
    }

    #[test]
    fn preprocessing_source_with_no_directives_or_comments_is_byte_for_byte() {
        let ctx = Context::new();
        let source = "int   x = 1;\nfloat y = 2.0;\n";
        let params = CompilerParams::new(source);
        let out = preprocess(&ctx, &params, None);
        assert!(!out.is_failed);
        assert_eq!(out.output, source);
    }

    #[test]
    fn strip_comments_drops_comments_and_is_idempotent() {
        let ctx = Context::new();
        let mut params = CompilerParams::new("int x /* keep out */ = 1; // trailing\n");
        params.strip_comments = true;
        let first = preprocess(&ctx, &params, None);
        assert!(!first.is_failed);
        assert!(!first.output.contains("keep out"));
        assert!(!first.output.contains("trailing"));

        let ctx2 = Context::new();
        let mut params2 = CompilerParams::new(first.output.clone());
        params2.strip_comments = true;
        let second = preprocess(&ctx2, &params2, None);
        assert!(!second.is_failed);
        assert_eq!(second.output, first.output);
    }

    #[test]
    fn parse_to_ast_returns_untyped_shader() {
        let ctx = Context::new();
        let params = CompilerParams::new("function void f() { }");
        let out = parse_to_ast(&ctx, &params, None);
        assert!(!out.is_failed);
        assert_eq!(out.shader.units.len(), 1);
    }

    #[test]
    fn compile_runs_semantic_analysis() {
        let ctx = Context::new();
        let params = CompilerParams::new("function void f() { break; }");
        let out = compile(&ctx, &params, None);
        assert!(out.is_failed);
        assert!(out.errors.iter().any(|e| e.message.contains("break")));
    }

    #[test]
    fn compile_success_has_no_backend_output() {
        let ctx = Context::new();
        let params = CompilerParams::new("function void f() { }");
        let out = compile(&ctx, &params, None);
        assert!(!out.is_failed);
        assert!(out.output.is_empty());
        assert!(out.types.is_some());
    }

    #[test]
    fn include_with_no_matching_search_path_fails_cleanly() {
        let ctx = Context::new();
        let params = CompilerParams::new("#include \"other.sdlsl\"\n");
        let out = preprocess(&ctx, &params, None);
        assert!(out.is_failed);
    }

    #[test]
    fn include_resolves_against_a_local_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.sdlsl"), "int shared_value = 7;\n").unwrap();

        let ctx = Context::new();
        let mut params = CompilerParams::new("#include \"other.sdlsl\"\n");
        params.local_include_paths.push(dir.path().to_path_buf());
        let out = preprocess(&ctx, &params, None);
        assert!(!out.is_failed, "errors: {:?}", out.errors);
        assert!(out.output.contains("shared_value"));
    }
}
