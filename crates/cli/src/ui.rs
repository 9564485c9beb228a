//! Console formatting shared by the commands.

use colored::{ColoredString, Colorize};
use tic_graph::{Action, Plan};
use tic_stack::{Finding, Severity};

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
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
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn action_marker(action: &Action) -> ColoredString {
    let symbol = format!("{:>3}", action.symbol());
    match action {
        Action::Create => symbol.green(),
        Action::Update { .. } => symbol.yellow(),
        Action::Replace { .. } | Action::Delete => symbol.red(),
        Action::Read => symbol.blue(),
        Action::Same => symbol.normal(),
    }
}

/// Print every step of a plan; unchanged steps only when `all` is set.
pub fn print_plan(plan: &Plan, all: bool) {
    for step in &plan.steps {
        if !all && !step.action.is_change() {
            continue;
        }
        println!(
            "{} {} {} {}",
            action_marker(&step.action),
            step.id.to_string().bold(),
            step.kind.bright_black(),
            step.action.to_string().bright_black()
        );
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary);
}

/// Print one lint finding.
pub fn print_finding(finding: &Finding) {
    let label = match finding.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    println!("{label} {}: {}", finding.resource.to_string().bold(), finding.message);
}
