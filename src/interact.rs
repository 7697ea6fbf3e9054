//! Human interaction seam for approval and repair prompts.
//!
//! The workflow talks to a `Interact` trait object rather than stdin
//! directly, so tests can script every decision.

use std::io::{self, BufRead, Write};

/// Blocking console interaction used by the one-shot workflow and the
/// line REPL. `prompt_line` returning `None` means EOF or interrupt,
/// which callers treat as cancel.
pub trait Interact {
    /// Show a message to the user.
    fn say(&mut self, text: &str);
    /// Ask for one line of input.
    fn prompt_line(&mut self, prompt: &str) -> Option<String>;
}

/// Stdin/stdout implementation for cooked-mode sessions.
pub struct ConsoleInteract;

impl Interact for ConsoleInteract {
    fn say(&mut self, text: &str) {
        println!("{}", text);
    }

    fn prompt_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(_) => None,
        }
    }
}
