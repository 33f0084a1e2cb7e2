//! Terminal output for the embedded demo — spinner and colored summaries.
//!
//! Uses `indicatif` for the progress spinner and `console` for styling.
//! The long-running agents log through `tracing` instead; this is only the
//! interactive face of the `demo` subcommand.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::inspector::CycleReport;
use crate::store::ElementFamily;

/// Visual progress for one demo inspection cycle.
pub struct CycleProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl CycleProgress {
    pub fn start(family: ElementFamily) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("Inspecting {family} elements"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finish the spinner and print the cycle outcome.
    pub fn complete(&self, family: ElementFamily, report: &CycleReport) {
        self.pb.finish_and_clear();
        if report.failures > 0 {
            println!(
                "  {} {family}: {} checked, {} transitions, {} failed",
                self.red.apply_to("✗"),
                report.checked,
                report.transitions,
                report.failures
            );
        } else if report.transitions > 0 {
            println!(
                "  {} {family}: {} checked, {} transitions",
                self.yellow.apply_to("↻"),
                report.checked,
                report.transitions
            );
        } else {
            println!(
                "  {} {family}: {} checked, all stable",
                self.green.apply_to("✓"),
                report.checked
            );
        }
    }

    /// Print the full report as formatted JSON.
    pub fn print_report(&self, report: &CycleReport) {
        println!();
        println!("{}", self.green.apply_to("─── Cycle Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}
