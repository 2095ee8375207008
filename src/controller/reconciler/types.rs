//! # Reconciler Types
//!
//! The reconciler context, its outcome and its error taxonomy.

use crate::config::ControllerConfig;
use crate::controller::association::{AnnotationAssociationResolver, AssociationResolver};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::certificates::{CertRotation, CertificateError};
use crate::controller::events::EventRecorder;
use crate::controller::reconciler::validation::{DefaultSpecValidator, SpecValidator, ValidationError};
use crate::controller::store::{ObjectKey, Store, StoreError};
use crate::controller::watches::WatchRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Result of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Run again after this delay even without events
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    /// Terminal outcome: wait for the next event
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Another writer changed an object during the pass
    #[error("conflict: {0}")]
    Conflict(StoreError),

    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] CertificateError),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("referenced {kind} {key} not found")]
    MissingReference { kind: String, key: ObjectKey },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<StoreError> for ReconcileError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => {
                ReconcileError::Conflict(error)
            }
            other => ReconcileError::Storage(other),
        }
    }
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_))
    }

    /// Short label used for metrics and event reasons
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::Conflict(_) => "conflict",
            ReconcileError::CertGeneration(_) => "certificate",
            ReconcileError::Storage(_) => "storage",
            ReconcileError::MissingReference { .. } => "missing-reference",
            ReconcileError::Config(_) => "config",
        }
    }
}

/// Per-resource error backoff
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

/// Settings the reconciler derives dependents from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerParams {
    pub controller_version: String,
    pub image_repository: String,
    pub cert_rotation: CertRotation,
}

impl From<&ControllerConfig> for ReconcilerParams {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            controller_version: config.controller_version.clone(),
            image_repository: config.image_repository.clone(),
            cert_rotation: config.cert_rotation,
        }
    }
}

impl Default for ReconcilerParams {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

/// Reconciler context shared by every pass
pub struct Reconciler<S> {
    pub store: S,
    pub watches: Arc<WatchRegistry>,
    pub events: Arc<dyn EventRecorder>,
    pub association: Arc<dyn AssociationResolver>,
    pub validator: Arc<dyn SpecValidator>,
    pub params: ReconcilerParams,
    /// Error backoff per `namespace/name`, maintained by the error policy
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
    /// One pass at a time per key, whichever task triggered it
    pub(crate) pass_locks: Mutex<HashMap<ObjectKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, params: ReconcilerParams, events: Arc<dyn EventRecorder>) -> Self {
        Self {
            store,
            watches: Arc::new(WatchRegistry::new()),
            events,
            association: Arc::new(AnnotationAssociationResolver),
            validator: Arc::new(DefaultSpecValidator),
            params,
            backoff_states: Mutex::new(HashMap::new()),
            pass_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_watches(mut self, watches: Arc<WatchRegistry>) -> Self {
        self.watches = watches;
        self
    }

    #[must_use]
    pub fn with_association(mut self, association: Arc<dyn AssociationResolver>) -> Self {
        self.association = association;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SpecValidator>) -> Self {
        self.validator = validator;
        self
    }
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
