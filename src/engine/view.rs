//! Profiling panel
//!
//! A toggleable panel listing the profiled methods and the metric to plot.

use colored::Colorize;

use super::profiling::Metric;

pub trait Panel: Send + Sync {
    fn init(&mut self, methods: &[String]);

    fn toggle(&mut self);

    fn is_visible(&self) -> bool;

    /// Method whose samples are plotted
    fn selected_method(&self) -> Option<String>;

    fn selected_metric(&self) -> Metric;
}

#[derive(Debug, Default)]
pub struct TerminalPanel {
    methods: Vec<String>,
    visible: bool,
    method: Option<String>,
    metric: Metric,
}

impl TerminalPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Select a method; unknown names are ignored
    pub fn select_method(&mut self, name: &str) -> bool {
        if self.methods.iter().any(|m| m == name) {
            self.method = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn select_metric(&mut self, metric: Metric) {
        self.metric = metric;
    }

    pub fn render(&self) -> String {
        if !self.visible {
            return format!("{}", "profiling (hidden)".bright_black());
        }

        let mut out = format!("{}\n", "profiling".bright_cyan().bold());
        let metrics: Vec<String> = Metric::ALL
            .iter()
            .map(|m| {
                if *m == self.metric {
                    format!("[{}]", m).bold().to_string()
                } else {
                    m.to_string()
                }
            })
            .collect();
        out.push_str(&format!("  graph type: {}\n", metrics.join(" ")));
        out.push_str("  methods:\n");
        for method in &self.methods {
            let marker = if self.method.as_deref() == Some(method.as_str()) { "▶" } else { " " };
            out.push_str(&format!("  {} {}\n", marker.bright_blue(), method));
        }
        out
    }
}

impl Panel for TerminalPanel {
    fn init(&mut self, methods: &[String]) {
        self.methods = methods.to_vec();
        self.method = self.methods.first().cloned();
    }

    fn toggle(&mut self) {
        self.visible = !self.visible;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn selected_method(&self) -> Option<String> {
        self.method.clone()
    }

    fn selected_metric(&self) -> Metric {
        self.metric
    }
}
