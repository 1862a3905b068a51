//! Rill Compiler
//!
//! Single-pass compilation from Rill source text to bytecode: the scanner
//! feeds a Pratt parser that emits instructions directly into the current
//! function's chunk — there is no AST.
//!
//! The entry point is [`compile`]:
//!
//! ```rust,ignore
//! let mut heap = Heap::new();
//! let mut globals = Globals::new();
//! match rill_compiler::compile("print 1 + 2;", &mut heap, &mut globals) {
//!     Ok(script) => { /* a Function object ready to run */ }
//!     Err(diagnostics) => {
//!         for d in &diagnostics {
//!             eprintln!("{d}");
//!         }
//!     }
//! }
//! ```
//!
//! Compilation allocates (interned strings, function objects), so the heap
//! may collect mid-compile; the compiler keeps every in-flight function
//! and its constants marked through its own root hook.

pub mod scanner;

mod compiler;

pub use compiler::{compile, Diagnostic};
