//! UI helpers for the smoke-test CLI.
//!
//! Provides consistent formatting for console output during a run.

use colored::Colorize;

/// Print the tool banner.
pub fn print_banner(cluster_name: &str) {
    println!();
    println!("{}", "Rancher downstream cluster smoke test".cyan().bold());
    println!("  {} {}", "cluster:".bright_black(), cluster_name.green());
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(50).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(50).bright_black());
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!();
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("  {} {item}", "•".bright_black());
}

/// Print multi-line command output, indented.
pub fn print_block(text: &str) {
    for line in text.lines() {
        println!("    {}", line.bright_black());
    }
}
