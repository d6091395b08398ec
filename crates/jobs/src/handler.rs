//! Handler contract: the pluggable business logic that processes one job.

use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::types::Job;

/// Outcome category reported by a handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// Everything went fine
    Success,
    /// Something went wrong but may work next time
    Failed,
    /// Something went badly wrong, don't try again
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job handling result code: {0}")]
pub struct UnknownResultCode(pub i32);

impl ResultCode {
    pub const fn code(self) -> i32 {
        match self {
            ResultCode::Success => 1,
            ResultCode::Failed => 10,
            ResultCode::Error => 100,
        }
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = UnknownResultCode;

    fn try_from(code: i32) -> Result<Self, UnknownResultCode> {
        match code {
            1 => Ok(ResultCode::Success),
            10 => Ok(ResultCode::Failed),
            100 => Ok(ResultCode::Error),
            other => Err(UnknownResultCode(other)),
        }
    }
}

/// Structured result of handling one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlingResult {
    pub result_code: ResultCode,
    pub message: Option<String>,
    pub additional_data: Option<JsonValue>,
}

impl HandlingResult {
    pub fn new(result_code: ResultCode) -> Self {
        Self {
            result_code,
            message: None,
            additional_data: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ResultCode::Failed).with_message(message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResultCode::Error).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_additional_data(mut self, data: JsonValue) -> Self {
        self.additional_data = Some(data);
        self
    }

    /// Synthetic `Failed` result for a handler that returned an error.
    ///
    /// The full cause chain ends up in `additional_data`.
    pub fn from_handler_error(error: &anyhow::Error) -> Self {
        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
        Self::failed(error.to_string()).with_additional_data(json!({
            "error": error.to_string(),
            "causes": causes,
            "debug": format!("{error:?}"),
        }))
    }

    /// Synthetic `Failed` result for a handler that panicked.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = panic_message(payload);
        Self::failed(format!("handler panicked: {message}")).with_additional_data(json!({
            "panic": message,
        }))
    }
}

/// Try to pull a readable message out of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A unit of business logic that processes one fully-claimed job.
///
/// Returning `Err` is treated the same as returning a `Failed` result: the job
/// goes back to the queue if it has attempts left.
pub trait JobHandler: Send + Sync + 'static {
    fn handle_job(&self, job: &Job) -> anyhow::Result<HandlingResult>;
}

impl<F> JobHandler for F
where
    F: Fn(&Job) -> anyhow::Result<HandlingResult> + Send + Sync + 'static,
{
    fn handle_job(&self, job: &Job) -> anyhow::Result<HandlingResult> {
        self(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn numeric_codes_round_trip() {
        for code in [ResultCode::Success, ResultCode::Failed, ResultCode::Error] {
            assert_eq!(ResultCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(ResultCode::try_from(0), Err(UnknownResultCode(0)));
        assert_eq!(ResultCode::try_from(500), Err(UnknownResultCode(500)));
    }

    #[test]
    fn handler_error_becomes_failed_with_cause_chain() {
        let err: anyhow::Error = Err::<(), _>(std::io::Error::other("disk gone"))
            .context("writing report")
            .unwrap_err();

        let result = HandlingResult::from_handler_error(&err);
        assert_eq!(result.result_code, ResultCode::Failed);
        assert_eq!(result.message.as_deref(), Some("writing report"));
        let data = result.additional_data.unwrap();
        assert_eq!(data["causes"][0], "disk gone");
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        let result = HandlingResult::from_panic(payload.as_ref());
        assert_eq!(result.result_code, ResultCode::Failed);
        assert_eq!(result.message.as_deref(), Some("handler panicked: kaboom"));

        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |job: &Job| -> anyhow::Result<HandlingResult> {
            Ok(HandlingResult::success().with_additional_data(job.payload.clone()))
        };
        let job = Job::new(jobloom_core::JobTypeId::new(), json!({"n": 1}), json!({}));
        let result = handler.handle_job(&job).unwrap();
        assert_eq!(result.additional_data, Some(json!({"n": 1})));
    }
}
