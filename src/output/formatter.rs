//! Output formatters for result trees
//!
//! Provides tree, JSON, CSV and summary renderings of a composite result.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::models::{
    CompositeResult, ConsoleOutput, GroupResult, OutputKind, ResultNode, TestResult, TestStatus,
};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Tree,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tree" => Ok(OutputFormat::Tree),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "csv" => Ok(OutputFormat::Csv),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Render a whole run
    pub fn format_composite(&self, composite: &CompositeResult) -> String {
        match self.format {
            OutputFormat::Tree => self.format_tree(composite),
            OutputFormat::Json => serde_json::to_string(composite).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(composite).unwrap_or_default(),
            OutputFormat::Csv => format_csv(composite),
            OutputFormat::Summary => self.format_summary(composite),
        }
    }

    /// Render one file's result tree
    pub fn format_file(&self, file: &str, result: &GroupResult) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "{}", self.paint(file, Paint::Bold));
        if let Some(error) = &result.error {
            let _ = writeln!(output, "  {}", self.paint(&format!("! {error}"), Paint::Red));
        }
        self.write_children(&mut output, result, 1);
        output
    }

    fn format_tree(&self, composite: &CompositeResult) -> String {
        let mut output = String::new();
        for (file, result) in &composite.files {
            output.push_str(&self.format_file(file, result));
            output.push('\n');
        }
        for file in &composite.skipped_files {
            let _ = writeln!(output, "{}", self.paint(&format!("Skipping: {file}"), Paint::Yellow));
        }
        output.push_str(&self.format_summary(composite));
        output
    }

    fn write_children(&self, output: &mut String, group: &GroupResult, indent: usize) {
        let pad = "  ".repeat(indent);
        for child in &group.children {
            match child {
                ResultNode::Group(child) => {
                    let name = child.name.as_deref().unwrap_or("");
                    let _ = writeln!(output, "{pad}{name}");
                    if let Some(error) = &child.error {
                        let _ = writeln!(
                            output,
                            "{pad}  {}",
                            self.paint(&format!("! {error}"), Paint::Red)
                        );
                    }
                    self.write_children(output, child, indent + 1);
                }
                ResultNode::Test(test) => self.write_test(output, test, &pad),
            }
        }
    }

    fn write_test(&self, output: &mut String, test: &TestResult, pad: &str) {
        match test.status {
            TestStatus::Passed => {
                let _ = writeln!(
                    output,
                    "{pad}{} {} [{}ms]",
                    self.paint(test.status.symbol(), Paint::Green),
                    test.name,
                    test.duration_ms
                );
            }
            TestStatus::Skipped | TestStatus::NotRun => {
                let line = format!("{} {}", test.status.symbol(), test.name);
                let _ = writeln!(output, "{pad}{}", self.paint(&line, Paint::Yellow));
            }
            TestStatus::Failed => {
                let _ = writeln!(
                    output,
                    "{pad}{} {} [{}ms] ({})",
                    self.paint(test.status.symbol(), Paint::Red),
                    test.name,
                    test.duration_ms,
                    test.location
                );
                if let Some(error) = &test.error {
                    let message = self.paint(&error.to_string(), Paint::Red);
                    let _ = writeln!(output, "{pad}    {message}");
                    if let crate::error::TestError::Raised { chain, .. } = error {
                        for cause in chain {
                            let _ = writeln!(output, "{pad}      caused by: {cause}");
                        }
                    }
                }
                let phases = [
                    ("beforeEach", &test.output.before_each),
                    ("body", &test.output.body),
                    ("afterEach", &test.output.after_each),
                ];
                for (phase, entries) in phases {
                    for entry in entries {
                        let _ = writeln!(output, "{pad}    [{phase}] {}", format_console(entry));
                    }
                }
            }
        }
        if test.dangling > 0 {
            let _ = writeln!(
                output,
                "{pad}    {} detached task(s) still running",
                test.dangling
            );
        }
    }

    fn format_summary(&self, composite: &CompositeResult) -> String {
        let mut output = String::new();
        let failed = if composite.failed > 0 {
            self.paint(&composite.failed.to_string(), Paint::Red)
        } else {
            composite.failed.to_string()
        };
        let _ = writeln!(
            output,
            "Tests: {} passed, {} failed, {} skipped, {} total ({} run)",
            self.paint(&composite.passed.to_string(), Paint::Green),
            failed,
            composite.skipped,
            composite.total(),
            composite.total_run
        );
        let _ = writeln!(
            output,
            "Files: {} reported, {} skipped, {} dispatched",
            composite.files.len(),
            composite.skipped_files.len(),
            composite.dispatched.len()
        );
        for (file, error) in composite.file_errors() {
            let message = format!("File error in {file}: {error}");
            let _ = writeln!(output, "{}", self.paint(&message, Paint::Red));
        }
        for crash in &composite.crashes {
            let _ = writeln!(
                output,
                "{}",
                self.paint(
                    &format!(
                        "Worker {} crashed ({}) running {}",
                        crash.pid,
                        crash.status,
                        crash.files.join(", ")
                    ),
                    Paint::Red
                )
            );
        }
        let missing = composite.missing_files();
        if !missing.is_empty() {
            let _ = writeln!(output, "Missing results: {}", missing.join(", "));
        }
        output
    }

    fn paint(&self, text: &str, paint: Paint) -> String {
        if !self.colorize {
            return text.to_string();
        }
        let code = match paint {
            Paint::Green => "32",
            Paint::Red => "31",
            Paint::Yellow => "33",
            Paint::Bold => "1",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Tree)
    }
}

#[derive(Clone, Copy)]
enum Paint {
    Green,
    Red,
    Yellow,
    Bold,
}

fn format_console(entry: &ConsoleOutput) -> String {
    let kind = match entry.kind {
        OutputKind::Log => "log",
        OutputKind::Warn => "warn",
        OutputKind::Error => "error",
    };
    format!("{kind}: {} ({})", entry.message, entry.location)
}

/// One row per test: file, group path, name, status, duration, error
fn format_csv(composite: &CompositeResult) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let _ = writer.write_record(["file", "group", "test", "status", "duration_ms", "error"]);

    for (file, result) in &composite.files {
        let mut rows = Vec::new();
        collect_rows(result, &mut Vec::new(), &mut rows);
        for (group, test) in rows {
            let _ = writer.write_record([
                file.clone(),
                group,
                test.name.clone(),
                test.status.to_string(),
                test.duration_ms.to_string(),
                test.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            ]);
        }
    }

    writer
        .into_inner()
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

fn collect_rows<'a>(
    group: &'a GroupResult,
    path: &mut Vec<&'a str>,
    rows: &mut Vec<(String, &'a TestResult)>,
) {
    for child in &group.children {
        match child {
            ResultNode::Test(test) => rows.push((path.join(" > "), test)),
            ResultNode::Group(child) => {
                path.push(child.name.as_deref().unwrap_or(""));
                collect_rows(child, path, rows);
                path.pop();
            }
        }
    }
}

/// Write a rendered report to a file, without colors
pub fn write_report_to_file(
    path: &str,
    composite: &CompositeResult,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let content = ResultFormatter::new(format)
        .no_color()
        .format_composite(composite);
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::models::{Callback, SourceLocation, Test};

    fn test_named(name: &str) -> Test {
        Test::new(name, Callback::sync(|_| Ok(())), SourceLocation::new("math.rs", 12))
    }

    fn composite() -> CompositeResult {
        let mut inner = GroupResult::new(Some("addition".to_string()), 1);
        inner.push_test(TestResult::new(&test_named("adds"), 1).pass(2));
        inner.push_test(
            TestResult::new(&test_named("carries"), 1).fail(4, TestError::uncaught("overflow")),
        );
        let mut root = GroupResult::new(None, 0);
        root.push_group(inner);
        root.push_test(TestResult::skipped(&test_named("later"), 0));

        let mut composite = CompositeResult::new();
        composite.dispatch(&["suites/math".to_string()]);
        composite.record("suites/math", root);
        composite
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("TREE".parse::<OutputFormat>(), Ok(OutputFormat::Tree));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_tree_shows_failure_details() {
        let text = ResultFormatter::new(OutputFormat::Tree)
            .no_color()
            .format_composite(&composite());

        assert!(text.contains("suites/math"));
        assert!(text.contains("✓ adds [2ms]"));
        assert!(text.contains("✕ carries [4ms] (math.rs:12)"));
        assert!(text.contains("overflow"));
        assert!(text.contains("○ later"));
        assert!(text.contains("Tests: 1 passed, 1 failed, 1 skipped, 3 total (2 run)"));
    }

    #[test]
    fn test_csv_has_row_per_test() {
        let text = ResultFormatter::new(OutputFormat::Csv).format_composite(&composite());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "file,group,test,status,duration_ms,error");
        assert!(lines[1].starts_with("suites/math,addition,adds,PASS,2"));
    }

    #[test]
    fn test_json_round_trips_totals() {
        let text = ResultFormatter::new(OutputFormat::Json).format_composite(&composite());
        let parsed: CompositeResult = serde_json::from_str(&text).unwrap();
        assert_eq!((parsed.passed, parsed.failed, parsed.skipped), (1, 1, 1));
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_report_to_file(path.to_str().unwrap(), &composite(), OutputFormat::Summary).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Tests: 1 passed"));
    }
}
