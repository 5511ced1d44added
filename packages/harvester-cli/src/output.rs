//! Terminal output for stage summaries and cache status.

use colored::Colorize;
use harvester::{CompanyStatus, ExportReport, StageStatus, StageSummary};

/// Failure messages shown per stage before the rest are elided.
const MAX_LISTED_FAILURES: usize = 10;

pub fn print_summary(summary: &StageSummary) {
    println!(
        "{} {}  executed {}  cached {}  failed {}  skipped {}  ({:.1}s)",
        "▶".bright_cyan(),
        summary.stage.to_string().bold(),
        summary.executed.to_string().green(),
        summary.cached.to_string().blue(),
        failed_count(summary.failed),
        summary.skipped + summary.skipped_failed,
        summary.elapsed.as_secs_f64(),
    );

    for (company, error) in summary.failures.iter().take(MAX_LISTED_FAILURES) {
        println!("    {} {}: {}", "✗".red(), company, error.dimmed());
    }
    if summary.failures.len() > MAX_LISTED_FAILURES {
        println!("    … {} more", summary.failures.len() - MAX_LISTED_FAILURES);
    }
}

fn failed_count(failed: usize) -> colored::ColoredString {
    if failed == 0 {
        failed.to_string().normal()
    } else {
        failed.to_string().red().bold()
    }
}

pub fn print_export(report: &ExportReport) {
    println!(
        "{} Export: {} companies, {} rows filled, {} rows without a company",
        "✓".green(),
        report.companies_matched,
        report.rows_filled,
        report.rows_unmatched,
    );
    println!("    {}", report.discovery_path.display());
    println!("    {}", report.extraction_path.display());
}

pub fn print_status(statuses: &[CompanyStatus]) {
    let Some(first) = statuses.first() else {
        println!("{}", "No companies in input".yellow());
        return;
    };

    let header: Vec<String> = first.stages.iter().map(|(stage, _)| format!("{:<17}", stage.as_str())).collect();
    println!("{} {}", format!("{:<32}", "company").bold(), header.join(" ").bold());

    for company in statuses {
        let cells: Vec<String> = company
            .stages
            .iter()
            .map(|(_, status)| status_cell(*status))
            .collect();
        println!("{:<32} {}", truncate(&company.name, 32), cells.join(" "));
    }

    for (idx, (stage, _)) in first.stages.iter().enumerate() {
        let done = statuses
            .iter()
            .filter(|c| c.stages.get(idx).map(|(_, s)| *s) == Some(StageStatus::Done))
            .count();
        println!("{} {}/{}", format!("{:<17}", stage.as_str()).dimmed(), done, statuses.len());
    }
}

fn status_cell(status: StageStatus) -> String {
    let text = format!("{:<17}", status.to_string());
    match status {
        StageStatus::Done => text.green().to_string(),
        StageStatus::Failed => text.red().to_string(),
        StageStatus::InProgress => text.yellow().to_string(),
        StageStatus::NotStarted => text.dimmed().to_string(),
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let mut short: String = name.chars().take(width - 1).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_width() {
        assert_eq!(truncate("Acme", 32), "Acme");
        let long = truncate("Vereinigte Stahlwerke Aktiengesellschaft Holding", 10);
        assert_eq!(long.chars().count(), 10);
        assert!(long.ends_with('…'));
    }
}
