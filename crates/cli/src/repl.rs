//! Interactive session.
//!
//! One VM per session, so globals, classes, and interned strings carry
//! over from line to line. Compile and runtime errors are printed and
//! the prompt comes back; Ctrl-C clears the line, Ctrl-D (or EOF) ends
//! the session.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rill_runtime::Vm;

use crate::config::Config;

pub fn run(config: &Config) -> Result<(), String> {
    println!("rill {}", env!("CARGO_PKG_VERSION"));

    let mut editor =
        DefaultEditor::new().map_err(|e| format!("could not initialise line editor: {e}"))?;
    if let Some(history) = &config.history {
        // A missing history file is normal on first run.
        let _ = editor.load_history(history);
    }

    let mut vm = Vm::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // Diagnostics were already printed; the session goes on.
                let _ = vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(format!("input error: {e}")),
        }
    }

    if let Some(history) = &config.history {
        let _ = editor.save_history(history);
    }
    Ok(())
}
