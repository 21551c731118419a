//! Console prompter

use std::io::{BufRead, Write};

use openams_core::{BoardKind, Mode, Prompter};

/// Prompter backed by stdin/stdout
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        let stdin = std::io::stdin();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Prompter for ConsolePrompter {
    fn confirm(&mut self, question: &str) -> Option<bool> {
        loop {
            print!("{} [y/n]: ", question);
            let _ = std::io::stdout().flush();
            match self.read_line()?.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Some(true),
                "n" | "no" => return Some(false),
                _ => println!("Please answer y or n."),
            }
        }
    }

    fn choose_mode(&mut self, kind: BoardKind) -> Option<Mode> {
        loop {
            print!("Configure {} board for (bridge/canbus) [bridge]: ", kind);
            let _ = std::io::stdout().flush();
            let answer = self.read_line()?;
            if answer.is_empty() {
                return Some(Mode::Bridge);
            }
            match answer.parse() {
                Ok(mode) => return Some(mode),
                Err(_) => println!("Please answer bridge or canbus."),
            }
        }
    }

    fn pause(&mut self, message: &str) {
        print!("{} Press Enter to continue...", message);
        let _ = std::io::stdout().flush();
        let _ = self.read_line();
    }
}
