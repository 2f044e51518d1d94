//! # Causal Dispatcher
//!
//! Every caller-facing operation hands back its [`CorrelationId`] at once and
//! leaves the actual request to a spawned unit of work:
//!
//! ```text
//!  caller ──► allocate id ──► spawn unit ──► return id
//!                                 │
//!                                 ▼
//!                 wait for parent ids (suspends, never blocks)
//!                                 │
//!                                 ▼
//!                 substitute resolved ids ──► executor ──► resolve own id
//!                                                              │
//!                                                  children waiting on it wake up
//! ```
//!
//! Spawned units are tracked so [`Dispatcher::join`] can wait for every one of
//! them before the run is closed on the server.

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use http::Method;
use serde::Serialize;
use serde_json::Value;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::*;

use crate::{
    entity::{
        FinishStep, FinishTest, FinishTestRun, StartStep, StartSuite, StartTest, StartTestRun,
        Suite,
    },
    executor::Executor,
    http::Body,
    resolver::{Resolution, Resolver},
    CorrelationId, Error, ResolvedId, Result,
};

/// State shared by every scheduled unit of one client.
pub struct Context {
    pub(crate) resolver: Resolver,
    pub(crate) executor: Executor,
    prefix: String,
}

impl Context {
    pub fn new(resolver: Resolver, executor: Executor, project: &str) -> Context {
        Context {
            resolver,
            executor,
            prefix: format!("/listener/v3/{project}"),
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Listener path for an endpoint, e.g. `test/start`.
    pub fn path(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.prefix)
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Body,
    ) -> Result<Option<Value>> {
        self.executor.execute(method, &self.path(endpoint), body).await
    }

    pub(crate) async fn start_test_run(&self, start: StartTestRun) -> Resolution {
        let res = self
            .send(Method::POST, "test-run/start", json(&start)?)
            .await?;
        extract_id(res, "testRunUUID")
    }

    /// Starts a run announced ahead of time. No new id is minted: the run keeps
    /// the id it was announced with.
    pub(crate) async fn start_announced_test_run(&self, run: ResolvedId) -> Resolution {
        self.send(Method::PUT, &format!("test-run/start/{run}"), Body::Empty)
            .await?;
        Ok(Some(run))
    }

    pub(crate) async fn start_suites(&self, start: StartSuite) -> Result<Vec<Resolution>> {
        let test_run = self.resolver.wait_resolved(start.test_run).await?;
        let parent_suite = self.resolver.wait_optional(start.parent_suite).await?;
        let payload = start.with_ids(test_run, parent_suite);

        let res = self
            .send(Method::POST, "suite/start", json(&payload)?)
            .await?;
        let Some(res) = res else {
            return Err(Error::Decode("suite/start returned no suites".into()));
        };
        let suites: Vec<Suite> = serde_json::from_value(res)?;

        // The listener answers in request order.
        Ok(suites
            .into_iter()
            .map(|suite| Ok(Some(suite.suite_uuid)))
            .collect())
    }

    pub(crate) async fn start_test(&self, start: StartTest) -> Resolution {
        let test_run = self.resolver.wait_resolved(start.test_run).await?;
        let suite = self.resolver.wait_resolved(start.suite).await?;
        let payload = start.with_ids(test_run, suite);

        let res = self
            .send(Method::POST, "test/start", json(&payload)?)
            .await?;
        extract_id(res, "testUUID")
    }

    pub(crate) async fn start_step(&self, start: StartStep) -> Resolution {
        let test_run = self.resolver.wait_resolved(start.test_run).await?;
        let test = self.resolver.wait_resolved(start.test).await?;
        let parent_step = self.resolver.wait_optional(start.parent_step).await?;
        let payload = start.with_ids(test_run, test, parent_step);

        let res = self
            .send(Method::POST, "step/start", json(&payload)?)
            .await?;
        extract_id(res, "stepUUID")
    }

    pub(crate) async fn finish_test(&self, test: CorrelationId, finish: FinishTest) -> Result<()> {
        self.finish("test", test, finish).await
    }

    pub(crate) async fn finish_step(&self, step: CorrelationId, finish: FinishStep) -> Result<()> {
        self.finish("step", step, finish).await
    }

    async fn finish(&self, kind: &str, id: CorrelationId, finish: FinishTest) -> Result<()> {
        let target = self.resolver.wait_resolved(id).await?;
        let test_run = self.resolver.wait_resolved(finish.test_run).await?;
        let payload = finish.with_ids(test_run);
        debug!("finishing {kind} {target} as {}", payload.status);

        self.send(
            Method::PUT,
            &format!("{kind}/finish/{target}"),
            json(&payload)?,
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn finish_test_run(
        &self,
        run: CorrelationId,
        finish: FinishTestRun,
    ) -> Result<()> {
        let run = self.resolver.wait_resolved(run).await?;
        self.send(
            Method::PUT,
            &format!("test-run/finish/{run}"),
            json(&finish)?,
        )
        .await?;
        Ok(())
    }
}

pub(crate) fn json(payload: &impl Serialize) -> Result<Body> {
    Ok(Body::Json(serde_json::to_value(payload)?))
}

/// Pull a server id out of a response body: either a bare JSON string or an
/// object carrying `field`.
pub(crate) fn extract_id(value: Option<Value>, field: &str) -> Resolution {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(ResolvedId::new(id))),
        Some(Value::Object(mut object)) => match object.remove(field) {
            Some(Value::String(id)) => Ok(Some(ResolvedId::new(id))),
            Some(Value::Null) => Ok(None),
            Some(other) => Err(Error::Decode(format!("{field} is not a string: {other}"))),
            None => Err(Error::Decode(format!("response has no {field}"))),
        },
        Some(other) => Err(Error::Decode(format!("expected an id, got {other}"))),
    }
}

/// Spawns units of work on the client's runtime and keeps their handles.
pub struct Dispatcher {
    ctx: Arc<Context>,
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<Result<()>>>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<Context>, handle: Handle) -> Dispatcher {
        Dispatcher {
            ctx,
            handle,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<Result<()>>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of spawned units not yet collected by [`Dispatcher::join`].
    pub fn in_flight(&self) -> usize {
        self.tasks().len()
    }

    /// Spawn a unit that resolves nothing, e.g. a finish call.
    pub fn spawn<F>(&self, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self.handle.spawn(unit);
        self.tasks().push(handle);
    }

    /// Spawn a unit whose outcome resolves `id`.
    pub fn schedule<F>(&self, id: CorrelationId, unit: F)
    where
        F: Future<Output = Resolution> + Send + 'static,
    {
        self.schedule_all(vec![id], async move { unit.await.map(|id| vec![Ok(id)]) });
    }

    /// Spawn a unit that resolves several ids from one request.
    ///
    /// Results are matched to `ids` by position. A unit failure is fanned out
    /// to every id, and ids left over by a short result fail with
    /// [`Error::Decode`]. Every id is resolved even if the unit panics.
    pub fn schedule_all<F>(&self, ids: Vec<CorrelationId>, unit: F)
    where
        F: Future<Output = Result<Vec<Resolution>>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        self.spawn(async move {
            let resolutions = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(Ok(resolutions)) => resolutions,
                Ok(Err(e)) => vec![Err(e); ids.len()],
                Err(panic) => vec![Err(Error::Task(panic_message(&*panic))); ids.len()],
            };

            let mut resolutions = resolutions.into_iter();
            let mut outcome = Ok(());
            for id in ids {
                let resolution = resolutions.next().unwrap_or_else(|| {
                    Err(Error::Decode(format!("response has no entry for {id}")))
                });
                if let Err(e) = &resolution {
                    debug!("{id} failed: {e}");
                    if outcome.is_ok() {
                        outcome = Err(e.clone());
                    }
                }
                // A second resolution is reported by the resolver itself.
                let _ = ctx.resolver.resolve(id, resolution);
            }
            outcome
        });
    }

    /// Wait for every spawned unit, including units spawned while waiting.
    /// Returns the first failure observed.
    pub async fn join(&self) -> Result<()> {
        let mut first_failure = None;
        loop {
            let handles = std::mem::take(&mut *self.tasks());
            if handles.is_empty() {
                break;
            }
            debug!("joining {} reporting tasks", handles.len());

            let mut handles: FuturesUnordered<_> = handles.into_iter().collect();
            while let Some(joined) = handles.next().await {
                let res = joined.unwrap_or_else(|e| Err(Error::Task(e.to_string())));
                if let Err(e) = res {
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
