//! Collaborator doubles shared by the unit tests

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::hooks::{EventHooks, HookContext};
use crate::reconcile::RecordChange;
use crate::verify::{RemoteVerifier, VerifyError};

/// Verifier that knows a fixed set of event ids, or always fails
pub struct ScriptedVerifier {
    known: HashSet<String>,
    failure: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn knowing(ids: &[&str]) -> Self {
        Self {
            known: ids.iter().map(|id| id.to_string()).collect(),
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            known: HashSet::new(),
            failure: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RemoteVerifier for ScriptedVerifier {
    async fn retrieve(&self, id: &str) -> Result<(), VerifyError> {
        self.calls.lock().await.push(id.to_string());
        if let Some(message) = &self.failure {
            return Err(VerifyError::Api(message.clone()));
        }
        if self.known.contains(id) {
            Ok(())
        } else {
            Err(VerifyError::NotFound(id.to_string()))
        }
    }
}

/// (event type, change, record id) for every hook invocation
#[derive(Default)]
pub struct RecordingHooks {
    seen: Mutex<Vec<(String, RecordChange, Option<String>)>>,
    fail_with: Option<String>,
}

impl RecordingHooks {
    pub fn failing(message: &str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub async fn seen(&self) -> Vec<(String, RecordChange, Option<String>)> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl EventHooks for RecordingHooks {
    async fn after_event(&self, ctx: HookContext<'_>) -> SyncResult<()> {
        self.seen.lock().await.push((
            ctx.event_type.to_string(),
            ctx.change,
            ctx.record.map(|r| r.id.clone()),
        ));
        match &self.fail_with {
            Some(message) => Err(SyncError::Hook(message.clone())),
            None => Ok(()),
        }
    }
}
