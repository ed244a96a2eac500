//! State shared between the reclaimer (single writer) and the metrics exporter
//! (many readers).

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::monitor::usage::DiskUsage;

/// Most recently published snapshot plus the last reclamation time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ExporterState {
    pub usage: DiskUsage,
    /// `None` until the first reclamation.
    pub last_reclamation_at: Option<DateTime<Utc>>,
}

/// Handle onto the one lock guarding [`ExporterState`].
///
/// Locks are held only to swap or copy the value; callers never perform I/O
/// while holding one.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<ExporterState>>,
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, usage: DiskUsage) {
        self.inner.write().usage = usage;
    }

    pub fn record_reclamation(&self, at: DateTime<Utc>) {
        self.inner.write().last_reclamation_at = Some(at);
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ExporterState {
        *self.inner.read()
    }
}
