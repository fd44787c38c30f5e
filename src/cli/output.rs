//! Output formatting utilities for CLI.

use std::fmt::Write;
use tickboot::sim::{SessionReport, SoakStats};

/// Format a session report as human-readable text.
pub(super) fn format_session_text(report: &SessionReport, name: &str) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Session: {name}");
    for record in &report.records {
        for reply in &record.console {
            let _ = writeln!(output, "  [{:>5}] > {reply}", record.time);
        }
        let _ = writeln!(
            output,
            "  [{:>5}] gen {:<3} {:<36} cpu {:>7.2}  bucket {:>5}{}",
            record.time,
            record.generation,
            record.outcome,
            record.cpu_used,
            record.bucket,
            if record.overran { "  OVERRUN" } else { "" }
        );
    }
    output.push('\n');
    output.push_str(&format_session_summary(report));
    output
}

/// Totals only.
pub(super) fn format_session_summary(report: &SessionReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Summary:");
    let _ = writeln!(output, "  Ticks:        {}", report.ticks);
    let _ = writeln!(output, "  Ran:          {}", report.ran);
    let _ = writeln!(output, "  Loads:        {}", report.loads);
    let _ = writeln!(output, "  Deferred:     {}", report.deferred);
    let _ = writeln!(output, "  Paused:       {}", report.paused);
    let _ = writeln!(output, "  Faults:       {}", report.faults);
    let _ = writeln!(output, "  Halts:        {}", report.halts);
    let _ = writeln!(output, "  Overruns:     {}", report.overruns);
    let _ = writeln!(output, "  Final bucket: {}", report.final_bucket);
    output
}

/// Format soak statistics as human-readable text.
pub(super) fn format_soak_text(stats: &SoakStats) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Soak Results ({} sessions, {} ticks)", stats.sessions, stats.ticks);
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "  Ran:        {:>10} ({:.1}%)",
        stats.ran,
        stats.run_ratio() * 100.0
    );
    let _ = writeln!(output, "  Loads:      {:>10}", stats.loads);
    let _ = writeln!(output, "  Deferred:   {:>10}", stats.deferred);
    let _ = writeln!(output, "  Paused:     {:>10}", stats.paused);
    let _ = writeln!(output, "  Faults:     {:>10}", stats.faults);
    let _ = writeln!(output, "  Halts:      {:>10}", stats.halts);
    let _ = writeln!(output, "  Overruns:   {:>10}", stats.overruns);
    let _ = writeln!(output, "  Violations: {:>10}", stats.violation_count);
    for violation in &stats.violations {
        let _ = writeln!(output, "    - {violation}");
    }
    output
}

/// Format soak statistics as CSV.
pub(super) fn format_soak_csv(stats: &SoakStats) -> String {
    let mut output = String::new();
    output.push_str("sessions,ticks,ran,loads,deferred,paused,faults,halts,overruns,violations\n");
    let _ = writeln!(
        output,
        "{},{},{},{},{},{},{},{},{},{}",
        stats.sessions,
        stats.ticks,
        stats.ran,
        stats.loads,
        stats.deferred,
        stats.paused,
        stats.faults,
        stats.halts,
        stats.overruns,
        stats.violation_count
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soak_csv_has_header_and_row() {
        let stats = SoakStats {
            sessions: 2,
            ticks: 10,
            ..SoakStats::default()
        };
        let csv = format_soak_csv(&stats);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2,10,"));
    }

    #[test]
    fn test_summary_mentions_halts() {
        let report = SessionReport {
            halts: 3,
            ..SessionReport::default()
        };
        assert!(format_session_summary(&report).contains("Halts:        3"));
    }
}
