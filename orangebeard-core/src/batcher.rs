//! # Log Batcher
//!
//! Logs are the high-volume leaf of the hierarchy, so they are buffered and
//! sent through `log/batch` instead of one request per line.
//!
//! ```text
//!  enqueue(id, log) ──► buffer (insertion ordered)
//!                          │ len == threshold, or flush()
//!                          ▼
//!                   swap buffer for an empty one ──► LogBatch
//!                                                     │ submit()
//!                                                     ▼
//!     wait parents of all logs at once ──► POST log/batch ──► ids matched by position
//! ```

use futures::future::join_all;
use http::Method;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::*;

use crate::{
    dispatcher::{extract_id, json, Context},
    entity::Log,
    resolver::Resolution,
    CorrelationId, Error, ResolvedId, Result,
};

pub struct LogBatcher {
    buffer: Mutex<IndexMap<CorrelationId, Log>>,
    threshold: usize,
}

impl LogBatcher {
    /// A threshold of `0` or `1` turns batching off: every log is drained as
    /// soon as it is enqueued and sent to the single-log endpoint.
    pub fn new(threshold: usize) -> LogBatcher {
        LogBatcher {
            buffer: Mutex::new(IndexMap::new()),
            threshold: threshold.max(1),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, IndexMap<CorrelationId, Log>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Buffer a log. Returns the drained batch once the buffer reaches the threshold.
    pub fn enqueue(&self, id: CorrelationId, log: Log) -> Option<LogBatch> {
        let mut buffer = self.buffer();
        buffer.insert(id, log);
        if buffer.len() < self.threshold {
            return None;
        }
        Some(self.drain(&mut buffer))
    }

    /// Drain whatever is buffered. `None` if there is nothing to send.
    pub fn flush(&self) -> Option<LogBatch> {
        let mut buffer = self.buffer();
        if buffer.is_empty() {
            return None;
        }
        Some(self.drain(&mut buffer))
    }

    fn drain(&self, buffer: &mut IndexMap<CorrelationId, Log>) -> LogBatch {
        LogBatch {
            entries: std::mem::take(buffer),
            single: self.threshold == 1,
        }
    }
}

/// Logs taken out of the buffer in one swap.
#[derive(Debug)]
pub struct LogBatch {
    entries: IndexMap<CorrelationId, Log>,
    single: bool,
}

impl LogBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Correlation ids in insertion order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        self.entries.keys().copied().collect()
    }

    /// Send the batch and return one resolution per log, in insertion order.
    ///
    /// Logs whose parents failed are left out of the request and take the
    /// parent's failure; the rest of the batch is still sent. All parents are
    /// awaited together, so a stuck parent costs the batch one timeout.
    pub(crate) async fn submit(self, ctx: &Context) -> Result<Vec<Resolution>> {
        let mut resolutions: Vec<Resolution> = vec![Ok(None); self.entries.len()];
        let mut payload = Vec::with_capacity(self.entries.len());
        let mut slots = Vec::with_capacity(self.entries.len());

        let waited = join_all(self.entries.values().map(|log| parents(ctx, log))).await;
        for (slot, ((id, log), resolved)) in self.entries.into_iter().zip(waited).enumerate() {
            match resolved {
                Ok((test_run, test, step)) => {
                    payload.push(log.with_ids(test_run, test, step));
                    slots.push(slot);
                }
                Err(e) => {
                    debug!("dropping {} log {id} from batch: {e}", log.log_level);
                    resolutions[slot] = Err(e);
                }
            }
        }

        if payload.is_empty() {
            return Ok(resolutions);
        }

        let sent = if self.single {
            send_one_by_one(ctx, payload).await
        } else {
            send_batch(ctx, payload).await
        };

        match sent {
            Ok(ids) => {
                let mut ids = ids.into_iter();
                for slot in slots {
                    resolutions[slot] = ids.next().unwrap_or_else(|| {
                        Err(Error::Decode("log/batch response is shorter than the batch".into()))
                    });
                }
            }
            Err(e) => {
                for slot in slots {
                    resolutions[slot] = Err(e.clone());
                }
            }
        }
        Ok(resolutions)
    }
}

async fn parents(
    ctx: &Context,
    log: &Log,
) -> Result<(ResolvedId, ResolvedId, Option<ResolvedId>)> {
    futures::try_join!(
        ctx.resolver.wait_resolved(log.test_run),
        ctx.resolver.wait_resolved(log.test),
        ctx.resolver.wait_optional(log.step),
    )
}

async fn send_batch(ctx: &Context, payload: Vec<Log<ResolvedId>>) -> Result<Vec<Resolution>> {
    debug!("sending {} logs in one batch", payload.len());
    let res = ctx
        .send(Method::POST, "log/batch", json(&payload)?)
        .await?;

    match res {
        Some(Value::Array(ids)) => Ok(ids
            .into_iter()
            .map(|id| extract_id(Some(id), "logUUID"))
            .collect()),
        Some(other) => Err(Error::Decode(format!(
            "log/batch should return a list, got {other}"
        ))),
        None => Ok(Vec::new()),
    }
}

async fn send_one_by_one(ctx: &Context, payload: Vec<Log<ResolvedId>>) -> Result<Vec<Resolution>> {
    let mut ids = Vec::with_capacity(payload.len());
    for log in payload {
        let res = ctx.send(Method::POST, "log", json(&log)?).await;
        ids.push(res.and_then(|res| extract_id(res, "logUUID")));
    }
    Ok(ids)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        entity::LogLevel,
        executor::{
            test::{fast_retry, ScriptedTransport},
            Executor,
        },
        Resolver,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn context(transport: std::sync::Arc<ScriptedTransport>) -> Context {
        Context::new(
            Resolver::new(Duration::from_millis(200)),
            Executor::new(transport, fast_retry(1)),
            "demo",
        )
    }

    fn buffered(ctx: &Context, message: &str) -> (CorrelationId, Log) {
        let run = ctx.resolver.adopt(ResolvedId::new("run"));
        let test = ctx.resolver.adopt(ResolvedId::new("test"));
        (
            ctx.resolver.allocate(),
            Log::new(run, test, LogLevel::Info, message),
        )
    }

    #[test]
    fn threshold_drains_exactly_one_batch() {
        let ctx = context(ScriptedTransport::new(vec![]));
        let batcher = LogBatcher::new(10);

        let batches: Vec<_> = (0..11)
            .filter_map(|i| {
                let (id, log) = buffered(&ctx, &format!("line {i}"));
                batcher.enqueue(id, log)
            })
            .collect();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batcher.len(), 1);

        let rest = batcher.flush();
        assert_eq!(rest.map(|batch| batch.len()), Some(1));
        assert!(batcher.is_empty());
        assert!(batcher.flush().is_none());
    }

    #[tokio::test]
    async fn batch_response_is_matched_by_position() -> eyre::Result<()> {
        let ctx = context(ScriptedTransport::new(vec![Ok((
            200,
            r#"["log-a", {"logUUID": "log-b"}]"#,
        ))]));
        let batcher = LogBatcher::new(10);
        let (a, first) = buffered(&ctx, "a");
        let (b, second) = buffered(&ctx, "b");
        let _ = batcher.enqueue(a, first);
        let _ = batcher.enqueue(b, second);

        let batch = batcher.flush().ok_or_else(|| eyre::eyre!("nothing buffered"))?;
        assert_eq!(batch.ids(), vec![a, b]);

        let resolutions = batch.submit(&ctx).await?;
        assert_eq!(resolutions[0].clone()?, Some(ResolvedId::new("log-a")));
        assert_eq!(resolutions[1].clone()?, Some(ResolvedId::new("log-b")));
        Ok(())
    }

    #[tokio::test]
    async fn log_with_failed_parent_is_dropped_from_batch() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok((200, r#"["log-ok"]"#))]);
        let ctx = context(transport.clone());
        let batcher = LogBatcher::new(10);

        let (ok_id, ok_log) = buffered(&ctx, "fine");
        let broken_test = ctx.resolver.allocate();
        ctx.resolver
            .resolve(broken_test, Err(Error::ConnectionInvalid("down".into())))?;
        let broken_id = ctx.resolver.allocate();
        let broken_log = Log::new(ok_log.test_run, broken_test, LogLevel::Error, "lost");

        let _ = batcher.enqueue(broken_id, broken_log);
        let _ = batcher.enqueue(ok_id, ok_log);
        let resolutions = batcher
            .flush()
            .ok_or_else(|| eyre::eyre!("nothing buffered"))?
            .submit(&ctx)
            .await?;

        assert!(matches!(resolutions[0], Err(Error::ConnectionInvalid(_))));
        assert_eq!(resolutions[1].clone()?, Some(ResolvedId::new("log-ok")));
        assert_eq!(transport.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn short_batch_response_fails_unmatched_logs() -> eyre::Result<()> {
        let ctx = context(ScriptedTransport::new(vec![Ok((200, r#"["only"]"#))]));
        let batcher = LogBatcher::new(10);
        for message in ["a", "b"] {
            let (id, log) = buffered(&ctx, message);
            let _ = batcher.enqueue(id, log);
        }

        let resolutions = batcher
            .flush()
            .ok_or_else(|| eyre::eyre!("nothing buffered"))?
            .submit(&ctx)
            .await?;
        assert_eq!(resolutions[0].clone()?, Some(ResolvedId::new("only")));
        assert!(matches!(resolutions[1], Err(Error::Decode(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stuck_parent_costs_one_timeout_per_batch() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![]);
        let ctx = context(transport.clone());
        let batcher = LogBatcher::new(10);

        let run = ctx.resolver.adopt(ResolvedId::new("run"));
        let stuck = ctx.resolver.allocate();
        for i in 0..10 {
            let log = Log::new(run, stuck, LogLevel::Info, format!("line {i}"));
            let _ = batcher.enqueue(ctx.resolver.allocate(), log);
        }

        let started = std::time::Instant::now();
        let resolutions = batcher
            .flush()
            .ok_or_else(|| eyre::eyre!("nothing buffered"))?
            .submit(&ctx)
            .await?;

        // One await timeout is 200ms; ten sequential waits would take two seconds.
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(resolutions.len(), 10);
        assert!(resolutions
            .iter()
            .all(|res| matches!(res, Err(Error::Timeout { .. }))));
        assert_eq!(transport.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn threshold_of_one_uses_single_log_endpoint() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok((200, r#"{"logUUID":"single"}"#))]);
        let ctx = context(transport.clone());
        let batcher = LogBatcher::new(1);

        let (id, log) = buffered(&ctx, "one");
        let batch = batcher
            .enqueue(id, log)
            .ok_or_else(|| eyre::eyre!("threshold of one should drain immediately"))?;
        let resolutions = batch.submit(&ctx).await?;

        assert_eq!(resolutions[0].clone()?, Some(ResolvedId::new("single")));
        assert_eq!(transport.calls(), 1);
        Ok(())
    }
}
