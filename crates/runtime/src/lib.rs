//! Rill Runtime
//!
//! The stack virtual machine that executes compiled Rill bytecode, plus
//! the host-facing pieces around it: the [`Vm::interpret`] entry point,
//! native-function registration, and the disassembler.
//!
//! ```rust,ignore
//! let mut vm = Vm::new();
//! match vm.interpret("print 1 + 2 * 3;") {
//!     Ok(()) => {}
//!     Err(InterpretError::Compile) => std::process::exit(65),
//!     Err(InterpretError::Runtime) => std::process::exit(70),
//! }
//! ```
//!
//! One `Vm` owns the heap, the global store, the value stack, and the
//! call-frame stack; it is single-threaded and runs each program to
//! completion. Feeding several sources through one `Vm` keeps globals
//! alive between them, which is exactly what the REPL does.

pub mod debug;
pub mod natives;

mod vm;

pub use vm::{Vm, FRAMES_MAX, STACK_MAX};

/// Outcome of [`Vm::interpret`]; diagnostics have already been printed to
/// stderr by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    Compile,
    Runtime,
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile => write!(f, "compile error"),
            InterpretError::Runtime => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for InterpretError {}
