// SPDX-License-Identifier: PMPL-1.0-or-later
//! Saga coordinator for writes spanning several stores.
//!
//! No store participates in a transaction with another, so a multi-store
//! write is a sequence of steps, each optionally paired with a
//! compensation that undoes it. When a step fails the completed steps are
//! compensated newest first.
//!
//! # State machine
//!
//! ```text
//! ┌─────────┐  complete()   ┌───────────┐
//! │ Running │ ────────────> │ Completed │
//! └─────────┘               └───────────┘
//!      │
//!      │ step fails
//!      ▼
//!  every completed step undone? ──yes──> Compensated
//!      │
//!      no (forward-only step, compensation error, or compensation disabled)
//!      ▼
//!   Failed  (recorded in the SagaJournal for repair)
//! ```

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::identity::CanonicalKey;
use crate::{ConsolidationError, StoreKind};

/// Undo action for one completed step.
pub type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ConsolidationError>> + Send>;

/// Box an async closure as a [`Compensation`].
pub fn compensation<F, Fut>(f: F) -> Compensation
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ConsolidationError>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaState {
    Running,
    Completed,
    Compensated,
    Failed,
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaState::Running => write!(f, "RUNNING"),
            SagaState::Completed => write!(f, "COMPLETED"),
            SagaState::Compensated => write!(f, "COMPENSATED"),
            SagaState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A saga that left stores inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub saga_id: Uuid,
    pub saga: String,
    /// Client whose cached view may now be stale
    pub client_key: Option<CanonicalKey>,
    pub completed: Vec<String>,
    /// Completed steps that were not undone
    pub uncompensated: Vec<String>,
    pub failed_step: String,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Shared record of failed sagas awaiting repair.
#[derive(Debug, Clone, Default)]
pub struct SagaJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl SagaJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: JournalEntry) {
        self.entries.lock().await.push(entry);
    }

    /// Snapshot of pending entries, oldest first
    pub async fn pending(&self) -> Vec<JournalEntry> {
        self.entries.lock().await.clone()
    }

    /// Remove and return every pending entry
    pub async fn take_pending(&self) -> Vec<JournalEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

struct CompletedStep {
    name: String,
    store: StoreKind,
    compensation: Option<Compensation>,
}

/// One multi-store write in progress.
pub struct Saga {
    id: Uuid,
    name: String,
    client_key: Option<CanonicalKey>,
    state: SagaState,
    steps: Vec<CompletedStep>,
    compensate: bool,
    journal: SagaJournal,
    started_at: DateTime<Utc>,
}

impl Saga {
    /// Start a saga. With `compensate` false a failure never undoes
    /// anything and always ends `Failed`.
    pub fn new(name: impl Into<String>, compensate: bool, journal: SagaJournal) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            client_key: None,
            state: SagaState::Running,
            steps: Vec::new(),
            compensate,
            journal,
            started_at: Utc::now(),
        }
    }

    /// Attach the client whose stores this saga writes.
    pub fn for_client(mut self, key: &CanonicalKey) -> Self {
        self.client_key = Some(key.clone());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn completed_steps(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Run one step against `store`.
    ///
    /// On success, `undo` is handed the step's output and may return the
    /// compensation for it (`None` marks the step forward-only). On failure
    /// the saga aborts: with nothing completed the step's own error is
    /// returned, otherwise [`ConsolidationError::PartialWriteFailure`].
    pub async fn step<T, E, Fut, U>(
        &mut self,
        name: &str,
        store: StoreKind,
        action: Fut,
        undo: U,
    ) -> Result<T, ConsolidationError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<ConsolidationError>,
        U: FnOnce(&T) -> Option<Compensation>,
    {
        if self.state != SagaState::Running {
            return Err(ConsolidationError::Store {
                store,
                message: format!("saga {} is {}, cannot run step '{}'", self.name, self.state, name),
            });
        }

        match action.await {
            Ok(output) => {
                let compensation = undo(&output);
                debug!(saga = %self.name, step = name, store = %store, "Saga step completed");
                self.steps.push(CompletedStep {
                    name: name.to_string(),
                    store,
                    compensation,
                });
                Ok(output)
            }
            Err(e) => Err(self.abort(name, e.into()).await),
        }
    }

    /// Mark every step done.
    pub fn complete(&mut self) {
        if self.state == SagaState::Running {
            self.state = SagaState::Completed;
            let elapsed = Utc::now() - self.started_at;
            debug!(
                saga = %self.name,
                steps = self.steps.len(),
                elapsed_ms = elapsed.num_milliseconds(),
                "Saga completed"
            );
        }
    }

    async fn abort(&mut self, failed_step: &str, cause: ConsolidationError) -> ConsolidationError {
        if self.steps.is_empty() {
            self.state = SagaState::Compensated;
            debug!(saga = %self.name, step = failed_step, "Saga failed before any write");
            return cause;
        }

        let completed = self.completed_steps();
        let mut uncompensated = Vec::new();

        for step in self.steps.drain(..).rev() {
            match step.compensation {
                Some(undo) if self.compensate => {
                    if let Err(e) = undo().await {
                        warn!(saga = %self.name, step = %step.name, store = %step.store, error = %e, "Compensation failed");
                        uncompensated.push(step.name);
                    }
                }
                _ => uncompensated.push(step.name),
            }
        }

        self.state = if uncompensated.is_empty() {
            SagaState::Compensated
        } else {
            SagaState::Failed
        };

        warn!(
            saga = %self.name,
            step = failed_step,
            state = %self.state,
            error = %cause,
            "Saga aborted"
        );

        if self.state == SagaState::Failed {
            self.journal
                .record(JournalEntry {
                    saga_id: self.id,
                    saga: self.name.clone(),
                    client_key: self.client_key.clone(),
                    completed: completed.clone(),
                    uncompensated,
                    failed_step: failed_step.to_string(),
                    error: cause.to_string(),
                    recorded_at: Utc::now(),
                })
                .await;
        }

        ConsolidationError::PartialWriteFailure {
            saga: self.name.clone(),
            failed_step: failed_step.to_string(),
            completed,
            compensated: self.state == SagaState::Compensated,
            cause: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn undo_logging(log: &Log, label: &str) -> Compensation {
        let log = Arc::clone(log);
        let label = label.to_string();
        compensation(move || async move {
            log.lock().unwrap().push(label);
            Ok(())
        })
    }

    async fn ok(value: u32) -> Result<u32, ConsolidationError> {
        Ok(value)
    }

    async fn fail() -> Result<u32, ConsolidationError> {
        Err(ConsolidationError::StoreUnavailable {
            store: StoreKind::Graph,
            message: "down".into(),
        })
    }

    #[tokio::test]
    async fn test_all_steps_complete() {
        let journal = SagaJournal::new();
        let mut saga = Saga::new("create", true, journal.clone());
        let a = saga.step("a", StoreKind::Relational, ok(1), |_| None).await.unwrap();
        let b = saga.step("b", StoreKind::Document, ok(2), |_| None).await.unwrap();
        saga.complete();

        assert_eq!(a + b, 3);
        assert_eq!(saga.state(), SagaState::Completed);
        assert_eq!(saga.completed_steps(), vec!["a", "b"]);
        assert!(journal.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse() {
        let log: Log = Arc::default();
        let journal = SagaJournal::new();
        let mut saga = Saga::new("create", true, journal.clone());

        saga.step("a", StoreKind::Relational, ok(1), |_| Some(undo_logging(&log, "undo a")))
            .await
            .unwrap();
        saga.step("b", StoreKind::Document, ok(2), |_| Some(undo_logging(&log, "undo b")))
            .await
            .unwrap();
        let err = saga
            .step("c", StoreKind::Graph, fail(), |_| None)
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["undo b", "undo a"]);
        assert_eq!(saga.state(), SagaState::Compensated);
        match err {
            ConsolidationError::PartialWriteFailure {
                failed_step,
                completed,
                compensated,
                ..
            } => {
                assert_eq!(failed_step, "c");
                assert_eq!(completed, vec!["a", "b"]);
                assert!(compensated);
            }
            other => panic!("expected PartialWriteFailure, got {:?}", other),
        }
        assert!(journal.is_empty().await);
    }

    #[tokio::test]
    async fn test_first_step_failure_returns_plain_error() {
        let journal = SagaJournal::new();
        let mut saga = Saga::new("create", true, journal.clone());
        let err = saga.step("a", StoreKind::Graph, fail(), |_| None).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(journal.is_empty().await);

        // An aborted saga refuses further steps.
        assert!(saga.step("b", StoreKind::Kv, ok(1), |_| None).await.is_err());
    }

    #[tokio::test]
    async fn test_forward_only_step_is_journaled() {
        let journal = SagaJournal::new();
        let key = CanonicalKey::from_stored("k-1");
        let mut saga = Saga::new("delete", true, journal.clone()).for_client(&key);

        saga.step("a", StoreKind::Relational, ok(1), |_| None).await.unwrap();
        let err = saga.step("b", StoreKind::Graph, fail(), |_| None).await.unwrap_err();

        assert!(matches!(
            err,
            ConsolidationError::PartialWriteFailure { compensated: false, .. }
        ));
        assert_eq!(saga.state(), SagaState::Failed);

        let pending = journal.take_pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].client_key, Some(key));
        assert_eq!(pending[0].uncompensated, vec!["a"]);
        assert!(journal.is_empty().await);
    }

    #[tokio::test]
    async fn test_compensation_disabled() {
        let log: Log = Arc::default();
        let journal = SagaJournal::new();
        let mut saga = Saga::new("update", false, journal.clone());

        saga.step("a", StoreKind::Relational, ok(1), |_| Some(undo_logging(&log, "undo a")))
            .await
            .unwrap();
        saga.step("b", StoreKind::Graph, fail(), |_| None).await.unwrap_err();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(saga.state(), SagaState::Failed);
        assert_eq!(journal.len().await, 1);
    }

    #[tokio::test]
    async fn test_failing_compensation_marks_failed() {
        let journal = SagaJournal::new();
        let mut saga = Saga::new("create", true, journal.clone());

        saga.step("a", StoreKind::Relational, ok(1), |_| {
            Some(compensation(|| async {
                Err(ConsolidationError::NotFound("gone".into()))
            }))
        })
        .await
        .unwrap();
        saga.step("b", StoreKind::Graph, fail(), |_| None).await.unwrap_err();

        assert_eq!(saga.state(), SagaState::Failed);
        assert_eq!(journal.pending().await[0].failed_step, "b");
    }
}
