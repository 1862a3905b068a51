//! rill — command-line interpreter for the Rill language.
//!
//! Usage:
//!   rill                 # interactive session
//!   rill script.rill     # run a script
//!   rill --disassemble script.rill
//!
//! Exit codes follow sysexits conventions: 65 on compile error, 70 on
//! runtime error, 69 on internal failure, 74 when the script can't be
//! read, 78 on a bad config file, 0 on success.

mod config;
mod repl;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use rill_runtime::{debug, InterpretError, Vm};

const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_UNAVAILABLE: i32 = 69;
const EX_IOERR: i32 = 74;
const EX_CONFIG: i32 = 78;

const COLOR_RED: &str = "\x1b[0;31m";
const COLOR_RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "rill")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rill interpreter - run a script or start a REPL", long_about = None)]
struct Cli {
    /// Script to run; starts an interactive session when omitted
    script: Option<PathBuf>,

    /// Print the compiled bytecode instead of executing
    #[arg(long)]
    disassemble: bool,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            report_error(true, &message);
            process::exit(EX_CONFIG);
        }
    };

    match cli.script {
        Some(script) => run_file(&script, &config, cli.disassemble),
        None => {
            if let Err(message) = repl::run(&config) {
                report_error(config.color_enabled(), &message);
                process::exit(EX_IOERR);
            }
        }
    }
}

fn run_file(path: &Path, config: &config::Config, disassemble: bool) {
    let color = config.color_enabled();
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            report_error(color, &format!("could not read '{}': {}", path.display(), e));
            process::exit(EX_IOERR);
        }
    };

    let mut vm = Vm::new();

    if disassemble {
        match rill_compiler::compile(&source, &mut vm.heap, &mut vm.globals) {
            Ok(script) => print!("{}", disassemble_program(&vm, script)),
            Err(diagnostics) => {
                for diagnostic in &diagnostics {
                    eprintln!("{diagnostic}");
                }
                process::exit(EX_DATAERR);
            }
        }
        return;
    }

    // Internal invariant violations and memory exhaustion surface as
    // panics; map them to the fatal exit code instead of a raw abort
    // message.
    let result = panic::catch_unwind(AssertUnwindSafe(|| vm.interpret(&source)));
    match result {
        Ok(Ok(())) => {}
        Ok(Err(InterpretError::Compile)) => process::exit(EX_DATAERR),
        Ok(Err(InterpretError::Runtime)) => process::exit(EX_SOFTWARE),
        Err(_) => {
            report_error(color, "internal interpreter failure");
            process::exit(EX_UNAVAILABLE);
        }
    }
}

/// Disassembles the script chunk and, recursively, every function in its
/// constant pools.
fn disassemble_program(vm: &Vm, script: rill_core::ObjRef) -> String {
    let mut out = String::new();
    let mut pending = vec![script];
    let mut seen = vec![];

    while let Some(function) = pending.pop() {
        if seen.contains(&function) {
            continue;
        }
        seen.push(function);

        let f = vm.heap.function(function);
        let name = match f.name {
            Some(name) => vm.heap.string_lossy(name).into_owned(),
            None => "<script>".to_string(),
        };
        out.push_str(&debug::disassemble_chunk(&vm.heap, &f.chunk, &name));

        for constant in &f.chunk.constants {
            if let Some(r) = constant.as_obj() {
                if matches!(
                    vm.heap.obj(r).kind,
                    rill_core::object::ObjKind::Function(_)
                ) {
                    pending.push(r);
                }
            }
        }
    }
    out
}

fn report_error(color: bool, message: &str) {
    if color {
        eprintln!("{COLOR_RED}error{COLOR_RESET}: {message}");
    } else {
        eprintln!("error: {message}");
    }
}
