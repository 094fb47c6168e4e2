//! ## Printing Module
//!
//! This module is only here to make logging in the terminal easier to read.
//! It allows to print in appropriate colors depending on the situation.
//! It also provides a print-format for the hall-order ledger.
use crate::config;
use crate::ledger::HallOrderLedger;
use crate::events::Direction;
use ansi_term::Colour::{self, Green, Red, Yellow, Purple};

use prettytable::{Cell, Row, Table};
use unicode_width::UnicodeWidthStr;

/// Reads one of the print toggles. A poisoned toggle counts as enabled.
fn enabled(toggle: &std::sync::Mutex<bool>) -> bool {
    toggle.lock().map(|on| *on).unwrap_or(true)
}

/// Prints a message in a specified color to the terminal.
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Example
/// ```
/// use ansi_term::Colour;
/// use elevatorfleet::print;
///
/// print::color("Hello, World!".to_string(), Colour::Green);
/// ```
pub fn color(msg: String, color: Colour) {
    if enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", color.paint("[CUSTOM]:  "), color.paint(msg));
    }
}

/// Prints an error message in red to the terminal.
///
/// If `PRINT_ERR_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[ERROR\]:   {}", msg
///
/// ## Example
/// ```
/// use elevatorfleet::print;
///
/// print::err("Something went wrong!".to_string());
/// ```
pub fn err(msg: String) {
    if enabled(&config::PRINT_ERR_ON) {
        println!("{}{}\n", Red.paint("[ERROR]:   "), Red.paint(msg));
    }
}

/// Prints a warning message in yellow to the terminal.
///
/// If `PRINT_WARN_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[WARNING\]: {}", msg
pub fn warn(msg: String) {
    if enabled(&config::PRINT_WARN_ON) {
        println!("{}{}\n", Yellow.paint("[WARNING]: "), Yellow.paint(msg));
    }
}

/// Prints a success message in green to the terminal.
///
/// If `PRINT_OK_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[OK\]:      {}", msg
pub fn ok(msg: String) {
    if enabled(&config::PRINT_OK_ON) {
        println!("{}{}\n", Green.paint("[OK]:      "), Green.paint(msg));
    }
}

/// Prints an informational message in light blue to the terminal.
///
/// If `PRINT_INFO_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[INFO\]:    {}", msg
pub fn info(msg: String) {
    let light_blue = Colour::RGB(102, 178, 255);
    if enabled(&config::PRINT_INFO_ON) {
        println!("{}{}\n", light_blue.paint("[INFO]:    "), light_blue.paint(msg));
    }
}

/// Prints a coordinator message (bidding, cross-check outcome) in pink.
///
/// Gated by `PRINT_ELSE_ON`.
pub fn manager(msg: String) {
    let pink = Colour::RGB(255, 51, 255);
    if enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", pink.paint("[MANAGER]: "), pink.paint(msg));
    }
}

/// Pads the input text to a fixed display width using spaces.
///
/// Accounts for characters that take more than one column (e.g. the arrows below).
fn pad_text(text: &str, width: usize) -> String {
    let visible_width = UnicodeWidthStr::width(text);
    let padding = width.saturating_sub(visible_width);
    format!("{}{}", text, " ".repeat(padding))
}

/// Returns a colored and padded "true"/"false" label.
fn colored_bool_label(value: bool, width: usize) -> String {
    let raw_text = if value { "true" } else { "false" };
    let padded = pad_text(raw_text, width);
    if value {
        Green.paint(padded).to_string()
    } else {
        Red.paint(padded).to_string()
    }
}

/// Builds the floor-by-node table printed by [ledger].
///
/// Floors are listed top to bottom. Each cell shows `▲` for an owned up-call,
/// `▼` for an owned down-call and `·` otherwise.
pub fn ledger_table(ledger: &HallOrderLedger) -> Table {
    let mut table = Table::new();

    let mut titles = vec![Cell::new("floor")];
    for node in 0..config::MAX_NODES {
        titles.push(Cell::new(&format!("node {}", node)));
    }
    table.set_titles(Row::new(titles));

    for floor in (0..config::NUM_FLOORS).rev() {
        let mut cells = vec![Cell::new(&floor.to_string())];
        for node in 0..config::MAX_NODES as u8 {
            let row = ledger.owned_calls(node);
            let up = if row[floor as usize][Direction::Up.index()] { "▲" } else { "·" };
            let down = if row[floor as usize][Direction::Down.index()] { "▼" } else { "·" };
            cells.push(Cell::new(&pad_text(&format!("{} {}", up, down), 4)));
        }
        table.add_row(Row::new(cells));
    }
    table
}

/// Logs the ledger and the active set to the terminal.
///
/// ## Behavior
/// - Exits early if `PRINT_LEDGER_ON` is false.
/// - Prints JSON instead of a table when `PRINT_JSON_ON` is set.
pub fn ledger(ledger: &HallOrderLedger, active: &[bool; config::MAX_NODES]) {
    if !enabled(&config::PRINT_LEDGER_ON) {
        return;
    }

    if config::PRINT_JSON_ON.lock().map(|on| *on).unwrap_or(false) {
        match serde_json::to_string(ledger) {
            Ok(json) => println!("{}", json),
            Err(e) => err(format!("Failed to serialize ledger: {}", e)),
        }
        return;
    }

    println!("{}", Purple.bold().paint("┌────────────────────────────────┐"));
    println!("{}", Purple.bold().paint("│        HALL ORDER LEDGER       │"));
    println!("{}", Purple.bold().paint("└────────────────────────────────┘"));
    for (node, is_active) in active.iter().enumerate() {
        println!("node {}  active: {}", node, colored_bool_label(*is_active, 5));
    }
    ledger_table(ledger).printstd();
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HallCall;

    #[test]
    fn pad_text_counts_display_width() {
        assert_eq!(pad_text("ab", 4), "ab  ");
        assert_eq!(pad_text("toolong", 3), "toolong");
    }

    #[test]
    fn ledger_table_has_one_row_per_floor() {
        let mut l = HallOrderLedger::new();
        l.record_assignment(1, HallCall::new(2, Direction::Up).unwrap());
        let table = ledger_table(&l);
        assert_eq!(table.len(), config::NUM_FLOORS as usize);

        // Row 0 is the top floor
        let floor_two = table.get_row((config::NUM_FLOORS - 1 - 2) as usize).unwrap();
        assert!(floor_two.get_cell(2).unwrap().get_content().contains('▲'));
        assert!(!floor_two.get_cell(1).unwrap().get_content().contains('▲'));
    }
}
