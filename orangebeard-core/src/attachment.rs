//! # Attachment Uploader
//!
//! An attachment hangs off a log, which may still sit in the log buffer. The
//! client flushes the buffer before scheduling the upload, then the upload
//! waits for all four parents and posts a multipart body.

use serde_json::Value;
use tracing::*;

use crate::{
    dispatcher::Context,
    entity::Attachment,
    http::{Body, FilePart},
    resolver::Resolution,
    ResolvedId,
};

pub(crate) async fn upload(ctx: &Context, attachment: Attachment) -> Resolution {
    let Attachment { file, meta } = attachment;

    let test_run = ctx.resolver.wait_resolved(meta.test_run).await?;
    let test = ctx.resolver.wait_resolved(meta.test).await?;
    let step = ctx.resolver.wait_optional(meta.step).await?;
    let log = ctx.resolver.wait_resolved(meta.log).await?;
    let meta = meta.with_ids(test_run, test, step, log);

    debug!("uploading attachment {} ({})", file.name, file.content_type);
    let body = Body::multipart(
        serde_json::to_string(&meta)?,
        FilePart {
            name: file.name,
            content_type: file.content_type,
            content: file.content,
        },
    );
    let text = ctx.executor.upload(&ctx.path("attachment"), body).await?;

    Ok(parse_attachment_id(&text))
}

/// The listener answers with the bare id, a JSON string, or an
/// `{"attachmentUUID": ..}` object depending on its version.
fn parse_attachment_id(text: &str) -> Option<ResolvedId> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(id)) => Some(ResolvedId::new(id)),
        Ok(Value::Object(object)) => object
            .get("attachmentUUID")
            .and_then(Value::as_str)
            .map(ResolvedId::new),
        _ => Some(ResolvedId::new(text)),
    }
}
