//! Prometheus text exposition format.
//!
//! Renders one scrape's readings for consumption by a Prometheus server
//! or compatible agent. Every descriptor always gets its `# HELP` and
//! `# TYPE` block, even when the scrape produced no reading for it.

use crate::metrics::{Descriptors, Reading};

/// Render a scrape's readings into Prometheus text format.
pub fn render(descriptors: &Descriptors, readings: &[Reading]) -> String {
    let mut out = String::new();

    for desc in descriptors.all() {
        out.push_str(&format!("# HELP {} {}\n", desc.name, desc.help));
        out.push_str(&format!("# TYPE {} gauge\n", desc.name));

        for reading in readings.iter().filter(|r| r.descriptor.name == desc.name) {
            out.push_str(&sample_line(reading));
        }
    }

    out
}

fn sample_line(reading: &Reading) -> String {
    let desc = &reading.descriptor;

    let mut labels = Vec::with_capacity(desc.variable_labels.len() + desc.extra_labels.len());
    for (name, value) in desc.variable_labels.iter().zip(&reading.label_values) {
        labels.push(format!("{name}=\"{}\"", escape_label_value(value)));
    }
    for (name, value) in &desc.extra_labels {
        labels.push(format!("{name}=\"{}\"", escape_label_value(value)));
    }

    if labels.is_empty() {
        format!("{} {}\n", desc.name, reading.value)
    } else {
        format!("{}{{{}}} {}\n", desc.name, labels.join(","), reading.value)
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
