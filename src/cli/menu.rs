//! Interactive menu and terminal confirmation
//!
//! When dockhand runs without a subcommand on a terminal, the operator picks
//! one numbered action per invocation. Non-interactive environments get the
//! same actions as explicit subcommands instead; the menu refuses to run
//! without a terminal rather than blocking on absent input.

use std::io::{self, BufRead, Write};
use tracing::debug;

use crate::lifecycle::{LifecycleAction, OperatorConfirmation};

/// Whether stdin is attached to a terminal.
pub fn stdin_is_terminal() -> bool {
    atty::is(atty::Stream::Stdin)
}

/// Shows the numbered action menu and reads one selection.
///
/// Returns `None` on end-of-input or an unparseable selection; the caller
/// treats that the same as choosing Cancel.
pub fn choose_action() -> Option<LifecycleAction> {
    println!("dockhand - what would you like to do?");
    for (i, action) in LifecycleAction::MENU.iter().enumerate() {
        println!("  {}) {}", i + 1, action.label());
    }
    print!("Select [1-{}]: ", LifecycleAction::MENU.len());
    let _ = io::stdout().flush();

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    let choice = parse_choice(&line);
    debug!(input = %line.trim(), ?choice, "menu selection");
    choice
}

fn parse_choice(line: &str) -> Option<LifecycleAction> {
    line.trim()
        .parse::<usize>()
        .ok()
        .and_then(LifecycleAction::from_menu_choice)
}

/// Terminal y/N prompt; anything but an explicit yes is a refusal.
pub struct TerminalConfirmation;

impl OperatorConfirmation for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N]: ", prompt);
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
