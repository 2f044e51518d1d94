//! # Orangebeard
//!
//! Asynchronous reporting client for [Orangebeard](https://orangebeard.io).
//!
//! Test frameworks report a run as a tree of events: suites, tests, steps,
//! logs and attachments. Every call returns a correlation id immediately and
//! never waits on the network; the requests are sent in the background in
//! parent-before-child order.
//!
//! ## Quick Start
//!
//! Put the connection settings in `orangebeard.toml`:
//!
//! ```toml
//! endpoint = "https://demo.orangebeard.app"
//! token = "0f9c6c2e-1d2b-4a57-8d7e-9b1e2f3a4b5c"
//! project = "demo"
//! testset = "nightly"
//! ```
//!
//! Then report from any tokio runtime:
//!
//! ```rust,no_run
//! use orangebeard::{
//!     entity::{Finish, FinishTestRun, Log, LogLevel, StartStep, StartSuite, StartTest, TestStatus, TestType},
//!     eyre, Config, OrangebeardClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let client = OrangebeardClient::new(Config::load()?)?;
//!
//!     let run = client.start_configured_test_run()?;
//!     let suites = client.start_suite(StartSuite::from_path(run, "api/users"));
//!     let test = client.start_test(StartTest::new(run, suites[1], "list users", TestType::Test));
//!     let step = client.start_step(StartStep::new(run, test, "GET /users"));
//!     client.log(Log::new(run, test, LogLevel::Info, "200 OK").step(step));
//!     client.finish_step(step, Finish::new(run, TestStatus::Passed));
//!     client.finish_test(test, Finish::new(run, TestStatus::Passed));
//!
//!     // Waits for every request above, then closes the run.
//!     client.finish_test_run(run, FinishTestRun::now()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Command line
//!
//! The `orangebeard` binary starts a run and prints its id, or finishes a run
//! by id, so shell pipelines can wrap a test job:
//!
//! ```bash
//! RUN=$(orangebeard start --testset nightly)
//! ./run-tests.sh
//! orangebeard finish --id "$RUN"
//! ```

mod app;

// Re-export error handling crates for user convenience
pub use eyre;

// Re-export main application struct
pub use app::{App, Invocation};

// Re-export core functionality
pub use orangebeard_core::{
    entity, http, masking, ClientConfig, Config, CorrelationId, Error, OrangebeardClient,
    ResolvedId, Result, RetryConfig,
};
