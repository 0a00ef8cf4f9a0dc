//! Declarative HTTP contract testing for Rift.
//!
//! Cases are data: a method, a URL template, query parameters, headers, an
//! optional JSON body and an ordered list of expectations. The library turns
//! them into requests, sends them, and evaluates every expectation into a
//! [`Verdict`]. It can be used as a library or through the `rift-contract`
//! CLI binary.
//!
//! # Example
//!
//! ```no_run
//! use rift_contract::{collect_units, load_suites, Credentials, RunSettings, Runner};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let suites = load_suites(Path::new("./suites"))?;
//! let credentials = Credentials::new().with("GOOGLE_API_KEY", "...");
//! let runner = Runner::with_reqwest(RunSettings::default(), credentials)?;
//!
//! let report = runner.run(collect_units(&suites)).await;
//! if !report.success() {
//!     eprintln!("{} case(s) failed", report.totals.failed);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod json_path;
pub mod placeholder;
pub mod report;
pub mod runner;
pub mod suite;

pub use builder::{build_expectations, build_request, BuildContext, RequestSpec};
pub use capture::CaptureStore;
pub use config::{ConfigFile, Credentials, RunSettings};
pub use engine::{ExecutionEngine, ExecutionResult, RawResponse, ReqwestTransport, Transport};
pub use error::{ConfigError, LoadError, TransportError};
pub use evaluator::evaluate;
pub use json_path::{JsonPath, PathError};
pub use report::{Failure, Outcome, RenderOptions, Report, SkipReason, Verdict};
pub use runner::{PlannedRequest, Runner, SequenceState};
pub use suite::{
    collect_units, load_all, load_suite, load_suites, Case, Expectation, Method, Selection,
    Sequence, Suite, Unit,
};
