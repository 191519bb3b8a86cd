//! Chart adapter
//!
//! Plots stored profile rows for one metric. [`TextChart`] draws horizontal
//! bars for the terminal.

use colored::Colorize;

use super::profiling::{Metric, ProfileRow};

pub trait Chart: Send + Sync {
    /// Render `rows` (x: row id, y: `metric`)
    fn plot(&self, rows: &[ProfileRow], metric: Metric) -> String;
}

pub struct TextChart {
    width: usize,
}

impl TextChart {
    pub fn new(width: usize) -> Self {
        Self { width: width.max(1) }
    }
}

impl Default for TextChart {
    fn default() -> Self {
        Self::new(40)
    }
}

impl Chart for TextChart {
    fn plot(&self, rows: &[ProfileRow], metric: Metric) -> String {
        if rows.is_empty() {
            return format!("{}", "no samples".bright_black());
        }

        let peak = rows
            .iter()
            .map(|r| metric.value(r))
            .fold(0.0_f64, f64::max);
        let id_width = rows.iter().map(|r| r.id.to_string().len()).max().unwrap_or(1);

        let mut out = format!("{} by run\n", metric.to_string().bright_cyan().bold());
        for row in rows {
            let value = metric.value(row);
            let filled = if peak > 0.0 {
                ((value / peak) * self.width as f64).round() as usize
            } else {
                0
            };
            out.push_str(&format!(
                "  {:>w$} │{}{} {:.3}\n",
                row.id,
                "█".repeat(filled).bright_green(),
                "░".repeat(self.width - filled.min(self.width)).bright_black(),
                value,
                w = id_width
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, calls: u64) -> ProfileRow {
        ProfileRow {
            id,
            name: "render".to_string(),
            avg: 1.0,
            calls,
            max: 2.0,
            min: 0.5,
        }
    }

    #[test]
    fn test_plot_scales_to_peak() {
        colored::control::set_override(false);
        let chart = TextChart::new(10);
        let out = chart.plot(&[row(1, 5), row(12, 10)], Metric::Calls);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "calls by run");
        assert_eq!(lines[1], "   1 │█████░░░░░ 5.000");
        assert_eq!(lines[2], "  12 │██████████ 10.000");
    }

    #[test]
    fn test_plot_empty() {
        colored::control::set_override(false);
        assert_eq!(TextChart::default().plot(&[], Metric::Avg), "no samples");
    }
}
