//! # Orangebeard Client
//!
//! The caller-facing reporting API. Every `start_*`, `finish_*`, [`log`] and
//! [`send_attachment`] call returns immediately; the request behind it runs on
//! the tokio runtime the client was built on and waits for its parents there.
//! [`finish_test_run`] is the only call that waits, and it waits for
//! everything.
//!
//! ```no_run
//! use orangebeard_core::{
//!     entity::{Finish, FinishTestRun, Log, LogLevel, StartSuite, StartTest, StartTestRun, TestStatus, TestType},
//!     Config, OrangebeardClient,
//! };
//!
//! # async fn report() -> orangebeard_core::Result<()> {
//! let client = OrangebeardClient::new(Config::load()?)?;
//!
//! let run = client.start_test_run(StartTestRun::new("nightly"));
//! let suites = client.start_suite(StartSuite::from_path(run, "api/login"));
//! let test = client.start_test(StartTest::new(run, suites[1], "valid password", TestType::Test));
//! client.log(Log::new(run, test, LogLevel::Info, "logged in"));
//! client.finish_test(test, Finish::new(run, TestStatus::Passed));
//!
//! client.finish_test_run(run, FinishTestRun::now()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`log`]: OrangebeardClient::log
//! [`send_attachment`]: OrangebeardClient::send_attachment
//! [`finish_test_run`]: OrangebeardClient::finish_test_run

use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::*;

use crate::{
    attachment,
    batcher::{LogBatch, LogBatcher},
    config::Config,
    dispatcher::{Context, Dispatcher},
    entity::{
        Attachment, FinishStep, FinishTest, FinishTestRun, Log, StartStep, StartSuite, StartTest,
        StartTestRun,
    },
    executor::Executor,
    http::{HttpTransport, Transport},
    CorrelationId, Error, ResolvedId, Resolver, Result,
};

pub struct OrangebeardClient {
    config: Config,
    dispatcher: Dispatcher,
    batcher: LogBatcher,
}

impl OrangebeardClient {
    /// Build a client that talks to the configured endpoint.
    ///
    /// Must be called from within a tokio runtime; scheduled requests are
    /// spawned on that runtime.
    pub fn new(config: Config) -> Result<OrangebeardClient> {
        config.validate()?;
        let endpoint = config.endpoint.as_deref().unwrap_or_default();
        let token = config.token.as_deref().unwrap_or_default();
        let transport = HttpTransport::new(endpoint, token, config.client.request_timeout)?;
        OrangebeardClient::with_transport(config, Arc::new(transport))
    }

    /// Build a client over a custom transport. Only `project` is required.
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<OrangebeardClient> {
        let handle = Handle::try_current().map_err(|e| {
            Error::Config(format!("the client must be created inside a tokio runtime: {e}"))
        })?;
        let project = config
            .project
            .clone()
            .filter(|project| !project.is_empty())
            .ok_or_else(|| Error::Config("missing required values: project".into()))?;

        let ctx = Context::new(
            Resolver::new(config.client.await_timeout),
            Executor::new(transport, config.retry.clone()),
            &project,
        );
        debug!("reporting to project {project} with {config:?}");

        Ok(OrangebeardClient {
            batcher: LogBatcher::new(config.client.log_batch_size),
            dispatcher: Dispatcher::new(Arc::new(ctx), handle),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ctx(&self) -> &Arc<Context> {
        self.dispatcher.context()
    }

    fn resolver(&self) -> &Resolver {
        &self.ctx().resolver
    }

    /// Whether no request has exhausted its retries yet.
    pub fn is_connection_valid(&self) -> bool {
        self.ctx().executor.health().is_valid()
    }

    /// Number of logs waiting for the next batch.
    pub fn buffered_logs(&self) -> usize {
        self.batcher.len()
    }

    pub fn start_test_run(&self, start: StartTestRun) -> CorrelationId {
        let id = self.resolver().allocate();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule(id, async move { ctx.start_test_run(start).await });
        id
    }

    /// Start a run that was announced ahead of time and already has a server id.
    pub fn start_announced_test_run(&self, run: ResolvedId) -> CorrelationId {
        let id = self.resolver().allocate();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule(id, async move { ctx.start_announced_test_run(run).await });
        id
    }

    /// Report into an existing run. No request is made.
    pub fn resume_test_run(&self, run: ResolvedId) -> CorrelationId {
        self.resolver().adopt(run)
    }

    /// Start the run described by the configuration: the announced run if
    /// `testrun_uuid` is set, a new run named after `testset` otherwise.
    pub fn start_configured_test_run(&self) -> Result<CorrelationId> {
        if let Some(run) = &self.config.testrun_uuid {
            return Ok(self.start_announced_test_run(ResolvedId::new(run.clone())));
        }

        let testset = self
            .config
            .testset
            .clone()
            .ok_or_else(|| Error::Config("missing required values: testset".into()))?;
        let mut start = StartTestRun::new(testset).attributes(self.config.attributes.clone());
        if let Some(description) = &self.config.description {
            start = start.description(description.clone());
        }
        Ok(self.start_test_run(start))
    }

    /// Start one suite per name in `start.suite_names`, each nested in the
    /// previous one's parent. Ids are returned in the same order as the names.
    pub fn start_suite(&self, start: StartSuite) -> Vec<CorrelationId> {
        if start.suite_names.is_empty() {
            return Vec::new();
        }
        let ids: Vec<_> = start
            .suite_names
            .iter()
            .map(|_| self.resolver().allocate())
            .collect();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule_all(ids.clone(), async move { ctx.start_suites(start).await });
        ids
    }

    pub fn start_test(&self, start: StartTest) -> CorrelationId {
        let id = self.resolver().allocate();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule(id, async move { ctx.start_test(start).await });
        id
    }

    pub fn finish_test(&self, test: CorrelationId, finish: FinishTest) {
        let ctx = self.ctx().clone();
        self.dispatcher
            .spawn(async move { ctx.finish_test(test, finish).await });
    }

    pub fn start_step(&self, start: StartStep) -> CorrelationId {
        let id = self.resolver().allocate();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule(id, async move { ctx.start_step(start).await });
        id
    }

    pub fn finish_step(&self, step: CorrelationId, finish: FinishStep) {
        let ctx = self.ctx().clone();
        self.dispatcher
            .spawn(async move { ctx.finish_step(step, finish).await });
    }

    /// Buffer a log. It is sent once the batch is full, or on the next flush.
    pub fn log(&self, log: Log) -> CorrelationId {
        let id = self.resolver().allocate();
        if let Some(batch) = self.batcher.enqueue(id, log) {
            self.submit_logs(batch);
        }
        id
    }

    /// Send every buffered log now.
    pub fn flush_logs(&self) {
        if let Some(batch) = self.batcher.flush() {
            self.submit_logs(batch);
        }
    }

    fn submit_logs(&self, batch: LogBatch) {
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule_all(batch.ids(), async move { batch.submit(&ctx).await });
    }

    pub fn send_attachment(&self, attachment: Attachment) -> CorrelationId {
        self.flush_logs();
        let id = self.resolver().allocate();
        let ctx = self.ctx().clone();
        self.dispatcher
            .schedule(id, async move { attachment::upload(&ctx, attachment).await });
        id
    }

    /// Wait for the server id behind `id`, bounded by `client.await_timeout`.
    pub async fn wait_for(&self, id: CorrelationId) -> Result<Option<ResolvedId>> {
        self.resolver().wait(id).await
    }

    /// Flush logs, wait for every scheduled request, then finish the run.
    ///
    /// The run is finished on the server only if its id resolved. The id table
    /// is torn down afterwards, so ids handed out before this call become
    /// unknown. Returns the first failure of any scheduled request.
    pub async fn finish_test_run(&self, run: CorrelationId, finish: FinishTestRun) -> Result<()> {
        self.flush_logs();
        let joined = self.dispatcher.join().await;
        if let Err(e) = &joined {
            warn!("some reporting requests failed: {e}");
        }

        let finished = self.ctx().finish_test_run(run, finish).await;
        self.resolver().clear();

        match &finished {
            Ok(()) => info!("test run {run} finished"),
            Err(e) => error!("failed to finish test run {run}: {e}"),
        }
        joined.and(finished)
    }
}
