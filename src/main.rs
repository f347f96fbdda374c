//! `sdlslc`: the thin CLI collaborator around `sdlsl_driver`'s three entry
//! points. Argument parsing, output routing (stdout/`-o`), and exit-code
//! mapping live here; everything else is `sdlsl_driver`.

use anyhow::{bail, Context as _, Result};
use sdlsl_driver::{CompilerParams, Context};
use std::io::Write;
use std::path::PathBuf;

enum Mode {
    Preprocess,
    EmitAst,
    Compile,
}

fn print_usage(opts: &getopts::Options) {
    eprint!("{}", opts.usage("usage: sdlslc [options] <file>"));
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = std::env::var("SDLSLC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<bool> {
    init_logging();

    let args: Vec<String> = std::env::args().collect();

    let mut opts = getopts::Options::new();
    opts.optflag("P", "", "preprocess only, emit text");
    opts.optflag("T", "", "parse only, emit the AST");
    opts.optflag("C", "", "preprocess, parse, and semantically analyze");
    opts.optflag("V", "", "print the version and exit");
    opts.optflag("E", "", "strip comments from -P output");
    opts.optopt("o", "", "write output to FILE instead of stdout", "FILE");
    opts.optmulti("I", "", "add PATH to the local include search path", "PATH");
    opts.optmulti("D", "", "pre-define NAME[=VALUE]", "NAME[=VALUE]");
    opts.optflag("h", "help", "print this help message");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            print_usage(&opts);
            bail!(e);
        }
    };

    if matches.opt_present("h") {
        print_usage(&opts);
        return Ok(true);
    }
    if matches.opt_present("V") {
        println!("sdlslc {}", env!("CARGO_PKG_VERSION"));
        return Ok(true);
    }

    let mode = match (matches.opt_present("P"), matches.opt_present("T"), matches.opt_present("C")) {
        (true, false, false) => Mode::Preprocess,
        (false, true, false) => Mode::EmitAst,
        (false, false, true) => Mode::Compile,
        (false, false, false) => Mode::Compile,
        _ => bail!("only one of -P, -T, -C may be given"),
    };

    if matches.free.is_empty() {
        print_usage(&opts);
        bail!("no input file given");
    }
    if matches.free.len() > 1 {
        bail!("only one input file may be given, found {}", matches.free.len());
    }
    let input_path = PathBuf::from(&matches.free[0]);
    let source = std::fs::read_to_string(&input_path)
        .with_context(|| format!("reading `{}`", input_path.display()))?;

    let mut params = CompilerParams::new(source);
    params.filename = Some(matches.free[0].clone());
    params.strip_comments = matches.opt_present("E");
    params.local_include_paths = matches.opt_strs("I").into_iter().map(PathBuf::from).collect();
    for def in matches.opt_strs("D") {
        match def.split_once('=') {
            Some((name, value)) => params.predefined_macros.push((name.to_string(), value.to_string())),
            None => params.predefined_macros.push((def, "1".to_string())),
        }
    }

    let ctx = Context::new();
    let ok = match mode {
        Mode::Preprocess => {
            let out = sdlsl_driver::preprocess(&ctx, &params, None);
            render_diagnostics(&ctx, &out.errors);
            if !out.is_failed {
                write_output(matches.opt_str("o"), out.output.as_bytes())?;
            }
            !out.is_failed
        }
        Mode::EmitAst => {
            let out = sdlsl_driver::parse_to_ast(&ctx, &params, None);
            render_diagnostics(&ctx, &out.errors);
            if !out.is_failed {
                let dump = format!("{:#?}", out.shader);
                write_output(matches.opt_str("o"), dump.as_bytes())?;
            }
            !out.is_failed
        }
        Mode::Compile => {
            let out = sdlsl_driver::compile(&ctx, &params, None);
            render_diagnostics(&ctx, &out.errors);
            if !out.is_failed {
                write_output(matches.opt_str("o"), &out.output)?;
            }
            !out.is_failed
        }
    };

    Ok(ok)
}

fn render_diagnostics(ctx: &Context, errors: &[sdlsl_errors::ErrorEntry]) {
    let mut stream = sdlsl_errors::stderr_stream();
    let interner = ctx.sess.interner.borrow();
    for entry in errors {
        let _ = writeln!(
            stream,
            "{}: {}{}",
            if entry.is_error { "error" } else { "warning" },
            entry
                .filename
                .map(|f| format!("{}: ", interner.get(f)))
                .unwrap_or_default(),
            entry.message
        );
    }
}

fn write_output(path: Option<String>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(p) => std::fs::write(&p, bytes).with_context(|| format!("writing `{p}`")),
        None => std::io::stdout().write_all(bytes).context("writing to stdout"),
    }
}

fn main() {
    match run() {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
