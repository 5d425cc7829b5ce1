//! Prometheus text exposition for the gauges prescale publishes.

use std::fmt::Write;

/// One labelled gauge sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSample<'a> {
    pub labels: Vec<(&'a str, &'a str)>,
    pub value: f64,
}

/// Render a single gauge family in the text exposition format.
pub fn render_gauge(name: &str, help: &str, samples: &[GaugeSample<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for sample in samples {
        out.push_str(name);
        if !sample.labels.is_empty() {
            out.push('{');
            for (i, (key, value)) in sample.labels.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key}=\"{}\"", escape_label(value));
            }
            out.push('}');
        }
        let _ = writeln!(out, " {}", sample.value);
    }
    out
}

/// Render the `scaling_mode` gauge for one controller.
pub fn render_scaling_mode(location: &str, deployment: &str, mode: i8) -> String {
    render_gauge(
        "scaling_mode",
        "Current scaling mode (1 proactive, 0 reactive, -1 stopped).",
        &[GaugeSample {
            labels: vec![("scaler_location", location), ("deployment", deployment)],
            value: f64::from(mode),
        }],
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_mode_exposition() {
        let output = render_scaling_mode("k8s", "webapp", 1);
        assert_eq!(
            output,
            "# HELP scaling_mode Current scaling mode (1 proactive, 0 reactive, -1 stopped).\n\
             # TYPE scaling_mode gauge\n\
             scaling_mode{scaler_location=\"k8s\",deployment=\"webapp\"} 1\n"
        );
    }

    #[test]
    fn negative_mode_renders() {
        let output = render_scaling_mode("local", "webapp", -1);
        assert!(output.ends_with("} -1\n"));
    }

    #[test]
    fn label_values_are_escaped() {
        let output = render_gauge(
            "g",
            "help",
            &[GaugeSample {
                labels: vec![("name", "a\"b\\c")],
                value: 0.5,
            }],
        );
        assert!(output.contains(r#"g{name="a\"b\\c"} 0.5"#));
    }

    #[test]
    fn unlabelled_sample() {
        let output = render_gauge("up", "Up.", &[GaugeSample { labels: vec![], value: 1.0 }]);
        assert!(output.ends_with("up 1\n"));
    }
}
