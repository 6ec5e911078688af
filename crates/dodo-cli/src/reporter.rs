//! Result reporting and formatting

use colored::*;
use dodo_core::{CompiledPlan, Summary, TABLE_HEADER};

/// Terminal reporter for run headers and the latency summary table.
pub struct TerminalReporter;

impl TerminalReporter {
    /// Print the run header.
    pub fn print_header(plan: &CompiledPlan) {
        println!("\n{}\n", "dodo - HTTP Load Generator".bright_green().bold());
        println!("{}", "─".repeat(60).bright_black());

        println!("{}: {} {}", "Target".bold(), plan.method.as_str().cyan(), plan.url.as_str().cyan());
        println!("{}: {}", "Dodos".bold(), plan.dodo_count.to_string().cyan());
        if plan.request_count > 0 {
            println!("{}: {}", "Requests".bold(), plan.request_count.to_string().cyan());
        }
        if let Some(duration) = plan.duration {
            println!("{}: {}", "Duration".bold(), format!("{duration:?}").cyan());
        }
        println!("{}: {}", "Timeout".bold(), format!("{:?}", plan.timeout).cyan());
        if !plan.proxies.is_empty() {
            println!("{}: {}", "Proxies".bold(), plan.proxies.len().to_string().cyan());
        }

        println!("{}\n", "─".repeat(60).bright_black());
    }

    /// Print the per-label latency table, Total row last.
    pub fn print_summary(summary: &Summary) {
        if summary.rows.is_empty() {
            Self::print_warning("no outcomes recorded");
            return;
        }

        let mut rows: Vec<[String; 8]> = summary.rows.iter().map(|r| r.row()).collect();
        if let Some(total) = &summary.total {
            rows.push(total.row());
        }

        let mut widths: Vec<usize> = TABLE_HEADER.iter().map(|h| h.len()).collect();
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        // Pad before colorizing: ANSI escapes would otherwise count
        // against the column width and skew the alignment.
        let rule: usize = widths.iter().sum::<usize>() + 3 * (widths.len() - 1);
        println!();
        let header_cells: Vec<String> = TABLE_HEADER
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{h:<width$}", width = widths[i]))
            .collect();
        println!("{}", header_cells.join("   ").bold());
        println!("{}", "─".repeat(rule).bright_black());

        let total_at = summary.total.is_some().then(|| rows.len() - 1);
        for (idx, row) in rows.iter().enumerate() {
            if Some(idx) == total_at {
                println!("{}", "─".repeat(rule).bright_black());
            }
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
                .collect();
            if Some(idx) == total_at {
                println!("{}", cells.join("   ").bold());
            } else {
                let mut line = colorize_label(&cells[0]).to_string();
                for cell in &cells[1..] {
                    line.push_str("   ");
                    line.push_str(cell);
                }
                println!("{line}");
            }
        }
        println!();
    }

    /// Print progress message
    pub fn print_progress(message: &str) {
        println!("{} {}", "→".bright_green().bold(), message);
    }

    /// Print error message
    pub fn print_error(message: &str) {
        eprintln!("{} {}", "✗".bright_red().bold(), message.red());
    }

    /// Print warning message
    pub fn print_warning(message: &str) {
        println!("{} {}", "⚠".bright_yellow().bold(), message.yellow());
    }
}

/// Status-code labels color by class; error kinds are red.
fn colorize_label(label: &str) -> ColoredString {
    match label.as_bytes().first() {
        Some(b'2') => label.green(),
        Some(b'3') => label.yellow(),
        Some(b'4' | b'5') => label.bright_red(),
        _ => label.red(),
    }
}
