//! Payloads exchanged with the Orangebeard listener API.
//!
//! Records that reference a parent entity are generic over the reference type.
//! Callers build them with [`CorrelationId`]s; the dispatcher swaps those for
//! [`ResolvedId`]s once the parents are known, and only the resolved form is
//! ever serialized.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, ResolvedId};

/// Substituted for blank log messages, which the listener rejects.
const EMPTY_MESSAGE: &str = "_empty_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Stopped,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestType {
    #[default]
    Test,
    Before,
    After,
}

/// Key/value label attached to runs, suites and tests. A bare value has no key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Attribute {
        Attribute {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    pub fn value(value: impl Into<String>) -> Attribute {
        Attribute {
            key: None,
            value: value.into(),
        }
    }

    /// Parse `"key:value;plain"` into attributes. Empty segments are skipped.
    pub fn parse_list(s: &str) -> Vec<Attribute> {
        s.split(';')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once(':') {
                Some((key, value)) if !key.is_empty() => Attribute::new(key, value),
                Some((_, value)) => Attribute::value(value),
                None => Attribute::value(segment),
            })
            .collect()
    }
}

/// A component of the system under test, reported with a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SutComponent {
    pub component_id: String,
    pub component_name: String,
    pub version: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date_time: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_date_time: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestRun {
    pub test_set_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Local>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sut_components: Vec<SutComponent>,
}

impl StartTestRun {
    pub fn new(test_set_name: impl Into<String>) -> StartTestRun {
        StartTestRun {
            test_set_name: test_set_name.into(),
            description: None,
            start_time: Local::now(),
            attributes: Vec::new(),
            sut_components: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> StartTestRun {
        self.description = Some(description.into());
        self
    }

    pub fn attributes(mut self, attributes: Vec<Attribute>) -> StartTestRun {
        self.attributes = attributes;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTestRun {
    pub end_time: DateTime<Local>,
}

impl FinishTestRun {
    pub fn now() -> FinishTestRun {
        FinishTestRun {
            end_time: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSuite<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    #[serde(rename = "parentSuiteUUID", skip_serializing_if = "Option::is_none")]
    pub parent_suite: Option<I>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    pub suite_names: Vec<String>,
}

impl StartSuite {
    pub fn new(test_run: CorrelationId, suite_names: Vec<String>) -> StartSuite {
        StartSuite {
            test_run,
            parent_suite: None,
            description: None,
            attributes: Vec::new(),
            suite_names,
        }
    }

    /// Split a `/` or `.` delimited suite path into one level per segment.
    pub fn from_path(test_run: CorrelationId, path: &str) -> StartSuite {
        let names = path
            .split(['/', '.'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        StartSuite::new(test_run, names)
    }

    pub fn parent(mut self, parent_suite: CorrelationId) -> StartSuite {
        self.parent_suite = Some(parent_suite);
        self
    }

    pub(crate) fn with_ids(
        self,
        test_run: ResolvedId,
        parent_suite: Option<ResolvedId>,
    ) -> StartSuite<ResolvedId> {
        StartSuite {
            test_run,
            parent_suite,
            description: self.description,
            attributes: self.attributes,
            suite_names: self.suite_names,
        }
    }
}

/// One entry of the `suite/start` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    #[serde(rename = "suiteUUID")]
    pub suite_uuid: ResolvedId,
    #[serde(rename = "parentUUID", default)]
    pub parent_uuid: Option<ResolvedId>,
    #[serde(default)]
    pub local_suite_name: String,
    #[serde(default)]
    pub full_suite_path: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTest<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    #[serde(rename = "suiteUUID")]
    pub suite: I,
    pub test_name: String,
    pub test_type: TestType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    pub start_time: DateTime<Local>,
}

impl StartTest {
    pub fn new(
        test_run: CorrelationId,
        suite: CorrelationId,
        test_name: impl Into<String>,
        test_type: TestType,
    ) -> StartTest {
        StartTest {
            test_run,
            suite,
            test_name: test_name.into(),
            test_type,
            description: None,
            attributes: Vec::new(),
            start_time: Local::now(),
        }
    }

    pub(crate) fn with_ids(self, test_run: ResolvedId, suite: ResolvedId) -> StartTest<ResolvedId> {
        StartTest {
            test_run,
            suite,
            test_name: self.test_name,
            test_type: self.test_type,
            description: self.description,
            attributes: self.attributes,
            start_time: self.start_time,
        }
    }
}

/// Closes a test or a step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finish<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    pub status: TestStatus,
    pub end_time: DateTime<Local>,
}

pub type FinishTest<I = CorrelationId> = Finish<I>;
pub type FinishStep<I = CorrelationId> = Finish<I>;

impl Finish {
    pub fn new(test_run: CorrelationId, status: TestStatus) -> Finish {
        Finish {
            test_run,
            status,
            end_time: Local::now(),
        }
    }

    pub(crate) fn with_ids(self, test_run: ResolvedId) -> Finish<ResolvedId> {
        Finish {
            test_run,
            status: self.status,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStep<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    #[serde(rename = "testUUID")]
    pub test: I,
    #[serde(rename = "parentStepUUID", skip_serializing_if = "Option::is_none")]
    pub parent_step: Option<I>,
    pub step_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Local>,
}

impl StartStep {
    pub fn new(test_run: CorrelationId, test: CorrelationId, step_name: impl Into<String>) -> StartStep {
        StartStep {
            test_run,
            test,
            parent_step: None,
            step_name: step_name.into(),
            description: None,
            start_time: Local::now(),
        }
    }

    pub fn parent(mut self, parent_step: CorrelationId) -> StartStep {
        self.parent_step = Some(parent_step);
        self
    }

    pub(crate) fn with_ids(
        self,
        test_run: ResolvedId,
        test: ResolvedId,
        parent_step: Option<ResolvedId>,
    ) -> StartStep<ResolvedId> {
        StartStep {
            test_run,
            test,
            parent_step,
            step_name: self.step_name,
            description: self.description,
            start_time: self.start_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Log<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    #[serde(rename = "testUUID")]
    pub test: I,
    #[serde(rename = "stepUUID", skip_serializing_if = "Option::is_none")]
    pub step: Option<I>,
    pub message: String,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub log_time: DateTime<Local>,
}

impl Log {
    pub fn new(
        test_run: CorrelationId,
        test: CorrelationId,
        log_level: LogLevel,
        message: impl Into<String>,
    ) -> Log {
        Log {
            test_run,
            test,
            step: None,
            message: message.into(),
            log_level,
            log_format: LogFormat::default(),
            log_time: Local::now(),
        }
    }

    pub fn step(mut self, step: CorrelationId) -> Log {
        self.step = Some(step);
        self
    }

    pub fn format(mut self, log_format: LogFormat) -> Log {
        self.log_format = log_format;
        self
    }

    pub(crate) fn with_ids(
        self,
        test_run: ResolvedId,
        test: ResolvedId,
        step: Option<ResolvedId>,
    ) -> Log<ResolvedId> {
        let message = if self.message.trim().is_empty() {
            EMPTY_MESSAGE.to_string()
        } else {
            self.message
        };
        Log {
            test_run,
            test,
            step,
            message,
            log_level: self.log_level,
            log_format: self.log_format,
            log_time: self.log_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

impl AttachmentFile {
    /// The content type is guessed from the file name.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> AttachmentFile {
        let name = name.into();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        AttachmentFile {
            name,
            content: content.into(),
            content_type,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetaData<I = CorrelationId> {
    #[serde(rename = "testRunUUID")]
    pub test_run: I,
    #[serde(rename = "testUUID")]
    pub test: I,
    #[serde(rename = "stepUUID", skip_serializing_if = "Option::is_none")]
    pub step: Option<I>,
    #[serde(rename = "logUUID")]
    pub log: I,
    pub attachment_time: DateTime<Local>,
}

impl AttachmentMetaData {
    pub fn new(test_run: CorrelationId, test: CorrelationId, log: CorrelationId) -> AttachmentMetaData {
        AttachmentMetaData {
            test_run,
            test,
            step: None,
            log,
            attachment_time: Local::now(),
        }
    }

    pub fn step(mut self, step: CorrelationId) -> AttachmentMetaData {
        self.step = Some(step);
        self
    }

    pub(crate) fn with_ids(
        self,
        test_run: ResolvedId,
        test: ResolvedId,
        step: Option<ResolvedId>,
        log: ResolvedId,
    ) -> AttachmentMetaData<ResolvedId> {
        AttachmentMetaData {
            test_run,
            test,
            step,
            log,
            attachment_time: self.attachment_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file: AttachmentFile,
    pub meta: AttachmentMetaData,
}
