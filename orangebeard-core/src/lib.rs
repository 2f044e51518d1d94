//! # Orangebeard Core
//!
//! Asynchronous reporting of test results to an Orangebeard listener.
//!
//! Test frameworks fire events in program order (run, suite, test, step, log,
//! attachment) and get a [`CorrelationId`] back at once. The requests behind
//! those ids run in the background, each one waiting until the server ids of
//! its parents are known.
//!
//! ## Architecture (block diagram)
//!
//! ```text
//! +---------------------+      +---------------------+      +---------------------+
//! | OrangebeardClient   | ---> | dispatcher          | ---> | executor            |
//! | start_*/finish_*    |      | spawned units wait  |      | retries + sticky    |
//! | log/send_attachment |      | for parent ids      |      | connection health   |
//! +---------------------+      +---------------------+      +---------------------+
//!            |                      ^         |                        |
//!            v                      |         v                        v
//! +---------------------+           |  +---------------------+  +---------------------+
//! | batcher             | ----------+  | resolver            |  | http::Transport     |
//! | buffered logs       |              | CorrelationId ->    |  | reqwest, bearer     |
//! +---------------------+              | ResolvedId          |  | token               |
//!                                      +---------------------+  +---------------------+
//! ```
//!
//! Most users should use the main `orangebeard` crate rather than importing
//! `orangebeard-core` directly.

pub(crate) mod attachment;
pub mod batcher;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod executor;
pub mod http;
pub mod masking;
pub mod resolver;

// Re-export error handling crates
pub use eyre;

pub use client::OrangebeardClient;
pub use config::{ClientConfig, Config, RetryConfig};
pub use error::{Error, Result};
pub use resolver::{CorrelationId, Resolution, ResolvedId, Resolver};
