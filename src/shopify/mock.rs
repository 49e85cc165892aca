use crate::media::BinaryFile;
use crate::shopify::ShopifyError;
use crate::shopify::client::{AdminTransport, GraphQlErrorEntry, GraphQlResponse, operation_name};
use crate::shopify::staged::StagedTarget;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    Errors(Vec<String>),
    Transport(String),
}

/// Scripted Admin API. Replies are queued per operation name; the last one
/// queued for an operation keeps answering once the others are consumed.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Value)>>,
    failing_uploads: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, operation: &str, reply: Reply) {
        self.replies
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Drops anything queued for `operation` and answers with `reply` from now on.
    pub fn replace(&self, operation: &str, reply: Reply) {
        self.replies
            .lock()
            .insert(operation.to_string(), VecDeque::from([reply]));
    }

    pub fn fail_upload(&self, filename: &str) {
        self.failing_uploads.lock().insert(filename.to_string());
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == operation)
            .count()
    }

    pub fn variables(&self, operation: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == operation)
            .map(|(_, vars)| vars.clone())
            .collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl AdminTransport for MockTransport {
    async fn execute(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<GraphQlResponse, ShopifyError> {
        let operation = operation_name(query).unwrap_or("anonymous").to_string();
        self.calls.lock().push((operation.clone(), variables));

        let reply = {
            let mut replies = self.replies.lock();
            let queue = replies.get_mut(&operation);
            match queue {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Data(data)) => Ok(GraphQlResponse {
                data: Some(data),
                errors: None,
            }),
            Some(Reply::Errors(messages)) => Ok(GraphQlResponse {
                data: None,
                errors: Some(
                    messages
                        .into_iter()
                        .map(|message| GraphQlErrorEntry { message })
                        .collect(),
                ),
            }),
            Some(Reply::Transport(message)) => Err(ShopifyError::Request(message)),
            None => Err(ShopifyError::Request(format!(
                "no scripted reply for {operation}"
            ))),
        }
    }

    async fn upload(
        &self,
        _target: &StagedTarget,
        filename: &str,
        _file: &BinaryFile,
    ) -> Result<(), ShopifyError> {
        if self.failing_uploads.lock().contains(filename) {
            return Err(ShopifyError::Upload(format!("HTTP 403 Forbidden: {filename}")));
        }
        self.uploads.lock().push(filename.to_string());
        Ok(())
    }
}
