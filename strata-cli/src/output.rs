//! Styled terminal output utilities.

use owo_colors::OwoColorize;
use strata_migrate::{RunReport, TableOutcome};

/// Print a header/title
pub fn header(text: &str) {
    println!();
    println!("{}", text.bold().cyan());
    println!("{}", "─".repeat(text.chars().count()).dimmed());
    println!();
}

/// Print a section header
pub fn section(text: &str) {
    println!("{}", text.bold().white());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a success message
pub fn success(text: &str) {
    println!("{} {}", "✔".green().bold(), text.green());
}

/// Print an info message
pub fn info(text: &str) {
    println!("{} {}", "ℹ".blue().bold(), text);
}

/// Print a warning message
pub fn warn(text: &str) {
    println!("{} {}", "⚠".yellow().bold(), text.yellow());
}

/// Print an error message
pub fn error(text: &str) {
    eprintln!("{} {}", "✖".red().bold(), text.red());
}

/// Print a list item
pub fn list_item(text: &str) {
    println!("  {} {}", "•".dimmed(), text);
}

/// Print a newline
pub fn newline() {
    println!();
}

/// Print dimmed text
pub fn dim(text: &str) {
    println!("{}", text.dimmed());
}

fn style_outcome(outcome: &TableOutcome) -> String {
    match outcome {
        TableOutcome::Unchanged => outcome.to_string().dimmed().to_string(),
        TableOutcome::Created => outcome.to_string().green().to_string(),
        TableOutcome::Rebuilt { skipped, .. } if *skipped > 0 => {
            outcome.to_string().red().to_string()
        }
        TableOutcome::Rebuilt { .. } => outcome.to_string().yellow().to_string(),
    }
}

/// Print a run report. `detailed` lists every table, otherwise only changed ones.
pub fn report(report: &RunReport, detailed: bool) {
    section("Tables");
    let mut shown = 0;
    for table in &report.tables {
        if !detailed
            && table.outcome == TableOutcome::Unchanged
            && table.dropped_constraints.is_empty()
        {
            continue;
        }
        shown += 1;
        kv(&table.table, &style_outcome(&table.outcome));
        if let TableOutcome::Rebuilt { differences, .. } = &table.outcome {
            for difference in differences {
                println!("      {}", difference.to_string().dimmed());
            }
        }
        for constraint in &table.dropped_constraints {
            println!("      {} {}", "dropped constraint".dimmed(), constraint);
        }
    }
    if shown == 0 {
        dim("  all tables up to date");
    }

    if !report.levels.is_empty() {
        newline();
        section("Seeds");
        for level in &report.levels {
            list_item(&level.to_string());
        }
    }

    if detailed && !report.sequences.is_empty() {
        newline();
        section("Sequences");
        for (table, value) in &report.sequences {
            kv(table, &value.to_string());
        }
    }
    newline();
}
