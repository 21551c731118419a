//! Operator interaction seam
//!
//! Everything that would block on a human goes through this trait so the
//! daemon and `--non-interactive` paths can run with a prompter that
//! declines instead of hanging.

use crate::board::{BoardKind, Mode};

/// Capability interface for operator prompts
pub trait Prompter {
    /// Yes/no question; `None` when no interactive answer is available
    fn confirm(&mut self, question: &str) -> Option<bool>;

    /// Ask which firmware mode a board should run in
    fn choose_mode(&mut self, kind: BoardKind) -> Option<Mode>;

    /// Tell the operator to perform a physical action and wait for them
    fn pause(&mut self, message: &str);
}

/// Prompter used by the daemon and non-interactive CLI paths
///
/// Never guesses: every question comes back unanswered.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn confirm(&mut self, question: &str) -> Option<bool> {
        log::debug!("non-interactive: declining prompt: {}", question);
        None
    }

    fn choose_mode(&mut self, _kind: BoardKind) -> Option<Mode> {
        None
    }

    fn pause(&mut self, message: &str) {
        log::info!("non-interactive: skipping pause: {}", message);
    }
}
