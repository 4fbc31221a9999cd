// SPDX-License-Identifier: MIT

//! Tasks that talk to observers: run events and topics

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::params;
use crate::sdk::error::StepFailure;
use crate::sdk::task::{StepInput, StepOutput, Task};

// --- Emit ---

#[derive(Deserialize)]
struct EmitArgs {
    message: Value,
}

/// Emits `params.message` as a custom run event
pub struct EmitTask;

#[async_trait]
impl Task for EmitTask {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let args: EmitArgs = params(&input)?;
        Ok(StepOutput::new().emit(args.message))
    }
}

// --- Publish ---

#[derive(Deserialize)]
struct PublishArgs {
    topic: String,
    message: Value,
}

/// Publishes `params.message` on topic `params.topic`
pub struct PublishTask;

#[async_trait]
impl Task for PublishTask {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let args: PublishArgs = params(&input)?;
        let delivered = input.topics.emit(&args.topic, args.message).await;
        log::debug!(
            "Step '{}' published to '{}' ({} subscriber(s))",
            input.step,
            args.topic,
            delivered
        );
        Ok(StepOutput::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::task::tests::input_with_state;
    use crate::sdk::task::Record;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_emit() {
        let mut input = input_with_state(Record::new());
        input.params = Arc::new(json!({"message": {"level": "info"}}));
        let out = EmitTask.run(input).await.unwrap();
        assert_eq!(out.messages, vec![json!({"level": "info"})]);
        assert!(out.update.is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let mut input = input_with_state(Record::new());
        input.params = Arc::new(json!({"topic": "alerts", "message": "hello"}));
        let mut sub = input.topics.recv("alerts").await;

        let out = PublishTask.run(input).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(sub.next().await, Some(json!("hello")));
    }
}
