//! Verdicts and the run report.

use crate::builder::RequestSpec;
use crate::error::ConfigError;
use crate::runner::SequenceState;
use crate::suite::Expectation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::time::Duration;

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// One failed expectation, or the transport error of a case that declared
/// none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation: Option<Expectation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub message: String,
}

/// Why a case did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PriorStepFailed,
    DeadlineExceeded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PriorStepFailed => f.write_str("prior step failed"),
            SkipReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped(SkipReason),
    /// Configuration error: the case never reached the network.
    Error(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
            Outcome::Skipped(_) => "SKIP",
            Outcome::Error(_) => "ERR ",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            Outcome::Passed => GREEN,
            Outcome::Failed | Outcome::Error(_) => RED,
            Outcome::Skipped(_) => YELLOW,
        }
    }
}

/// Terminal result of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    pub passed: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub failures: Vec<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub request: Option<RequestSpec>,
}

impl Verdict {
    pub fn from_failures(
        case_id: &str,
        failures: Vec<Failure>,
        status: Option<u16>,
        elapsed: Duration,
    ) -> Self {
        let passed = failures.is_empty();
        Self {
            case_id: case_id.to_string(),
            sequence: None,
            passed,
            outcome: if passed { Outcome::Passed } else { Outcome::Failed },
            failures,
            status,
            elapsed_ms: elapsed.as_millis() as u64,
            request: None,
        }
    }

    pub fn skipped(case_id: &str, reason: SkipReason) -> Self {
        Self::without_response(case_id, Outcome::Skipped(reason))
    }

    pub fn config_error(case_id: &str, error: &ConfigError) -> Self {
        Self::without_response(case_id, Outcome::Error(error.to_string()))
    }

    fn without_response(case_id: &str, outcome: Outcome) -> Self {
        Self {
            case_id: case_id.to_string(),
            sequence: None,
            passed: false,
            outcome,
            failures: Vec::new(),
            status: None,
            elapsed_ms: 0,
            request: None,
        }
    }

    pub fn with_sequence(mut self, sequence: &str) -> Self {
        self.sequence = Some(sequence.to_string());
        self
    }

    pub fn with_request(mut self, request: RequestSpec) -> Self {
        self.request = Some(request);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSummary {
    pub id: String,
    pub state: SequenceState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Ordered outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub totals: Totals,
    pub verdicts: Vec<Verdict>,
    pub sequences: Vec<SequenceSummary>,
}

/// Options for [`Report::render_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub color: bool,
    /// Print a curl command under each failing case.
    pub show_curl: bool,
    /// Also list passing and skipped cases' details.
    pub verbose: bool,
}

impl Report {
    pub fn new(
        started_at: DateTime<Utc>,
        duration: Duration,
        verdicts: Vec<Verdict>,
        sequences: Vec<SequenceSummary>,
    ) -> Self {
        let mut totals = Totals::default();
        for verdict in &verdicts {
            match verdict.outcome {
                Outcome::Passed => totals.passed += 1,
                Outcome::Failed => totals.failed += 1,
                Outcome::Skipped(_) => totals.skipped += 1,
                Outcome::Error(_) => totals.errors += 1,
            }
        }

        Self {
            started_at,
            duration_ms: duration.as_millis() as u64,
            totals,
            verdicts,
            sequences,
        }
    }

    /// True iff every verdict passed.
    pub fn success(&self) -> bool {
        self.verdicts.iter().all(|verdict| verdict.passed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self, options: &RenderOptions) -> String {
        let paint = |code: &'static str| if options.color { code } else { "" };
        let (bold, dim, reset) = (paint(BOLD), paint(DIM), paint(RESET));
        let mut out = String::new();

        for verdict in &self.verdicts {
            let color = paint(verdict.outcome.color());
            let detail = match &verdict.outcome {
                Outcome::Passed | Outcome::Failed => verdict
                    .status
                    .map(|status| format!(" -> {status} ({}ms)", verdict.elapsed_ms))
                    .unwrap_or_default(),
                Outcome::Skipped(reason) => format!(" ({reason})"),
                Outcome::Error(message) => format!(": {message}"),
            };
            let _ = writeln!(
                out,
                "{color}{}{reset} {bold}{}{reset}{dim}{detail}{reset}",
                verdict.outcome.label(),
                verdict.case_id
            );

            for failure in &verdict.failures {
                let label = match &failure.expectation {
                    Some(expectation) => expectation.to_string(),
                    None => "transport".to_string(),
                };
                let _ = writeln!(
                    out,
                    "     {color}|{reset} {dim}[{label}]{reset} {}",
                    failure.message
                );
            }

            let show_request = options.show_curl && !verdict.passed || options.verbose;
            if let (true, Some(request)) = (show_request, &verdict.request) {
                let _ = writeln!(out, "     {dim}{}{reset}", request.to_curl());
            }
        }

        let rule = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
        let _ = writeln!(out, "{dim}{rule}{reset}");
        let _ = writeln!(out, "{bold}{}Summary{reset}", paint(CYAN));
        let _ = writeln!(out, "{dim}{rule}{reset}");
        let totals = &self.totals;
        let _ = writeln!(out, "  Total:   {bold}{}{reset}", self.verdicts.len());
        let _ = writeln!(out, "  {}Passed:{reset}  {bold}{}{reset}", paint(GREEN), totals.passed);
        let failed_color = if totals.failed > 0 { paint(RED) } else { dim };
        let _ = writeln!(out, "  {failed_color}Failed:{reset}  {bold}{}{reset}", totals.failed);
        let errors_color = if totals.errors > 0 { paint(RED) } else { dim };
        let _ = writeln!(out, "  {errors_color}Errors:{reset}  {bold}{}{reset}", totals.errors);
        let skipped_color = if totals.skipped > 0 { paint(YELLOW) } else { dim };
        let _ = writeln!(out, "  {skipped_color}Skipped:{reset} {bold}{}{reset}", totals.skipped);
        let _ = writeln!(out, "  {dim}Duration:{reset} {}ms", self.duration_ms);
        let _ = writeln!(out);

        if self.success() {
            let _ = writeln!(out, "{}{bold}All cases passed!{reset}", paint(GREEN));
        } else {
            let _ = writeln!(out, "{}{bold}Contract run failed{reset}", paint(RED));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failing() -> Verdict {
        Verdict::from_failures(
            "obtain-user",
            vec![Failure {
                expectation: Some(Expectation::StatusEquals { expected: 200 }),
                actual: Some(json!(404)),
                message: "expected status 200, got 404".into(),
            }],
            Some(404),
            Duration::from_millis(12),
        )
    }

    fn report(verdicts: Vec<Verdict>) -> Report {
        Report::new(Utc::now(), Duration::from_millis(30), verdicts, Vec::new())
    }

    #[test]
    fn test_totals_and_success() {
        let passed = Verdict::from_failures("a", Vec::new(), Some(200), Duration::ZERO);
        let skipped = Verdict::skipped("b", SkipReason::DeadlineExceeded);
        let error = Verdict::config_error("c", &ConfigError::UnknownCredential("KEY".into()));
        let mixed = report(vec![passed.clone(), failing(), skipped, error]);
        assert_eq!(
            mixed.totals,
            Totals {
                passed: 1,
                failed: 1,
                skipped: 1,
                errors: 1
            }
        );
        assert!(!mixed.success());
        assert!(report(vec![passed]).success());
    }

    #[test]
    fn test_skipped_is_not_passing() {
        let skipped = report(vec![Verdict::skipped("a", SkipReason::PriorStepFailed)]);
        assert!(!skipped.success());
    }

    #[test]
    fn test_render_text_without_color() {
        let text = report(vec![
            failing(),
            Verdict::skipped("seq/read", SkipReason::PriorStepFailed),
        ])
        .render_text(&RenderOptions::default());
        assert!(text.contains("FAIL obtain-user -> 404 (12ms)"));
        assert!(text.contains("| [status == 200] expected status 200, got 404"));
        assert!(text.contains("SKIP seq/read (prior step failed)"));
        assert!(text.contains("Contract run failed"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn test_render_text_shows_curl_for_failures() {
        let verdict = failing().with_request(RequestSpec {
            method: crate::suite::Method::Get,
            url: "https://reqres.in/api/users/2".into(),
            headers: Default::default(),
            body: None,
        });
        let options = RenderOptions {
            show_curl: true,
            ..Default::default()
        };
        let text = report(vec![verdict]).render_text(&options);
        assert!(text.contains("curl -X GET 'https://reqres.in/api/users/2'"));
    }

    #[test]
    fn test_json_shape() {
        let json: Value = serde_json::from_str(&report(vec![failing()]).to_json().unwrap()).unwrap();
        let verdict = &json["verdicts"][0];
        assert_eq!(verdict["case_id"], "obtain-user");
        assert_eq!(verdict["passed"], false);
        assert_eq!(verdict["outcome"], "failed");
        assert_eq!(verdict["failures"][0]["expectation"]["kind"], "status_equals");
        assert_eq!(verdict["failures"][0]["actual"], 404);
        assert_eq!(json["totals"]["failed"], 1);
    }

    #[test]
    fn test_json_skip_reason() {
        let json: Value = serde_json::to_value(Verdict::skipped("a", SkipReason::DeadlineExceeded)).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "deadline_exceeded");
    }
}
