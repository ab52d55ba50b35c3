//! Patch state shared between the installer and the harness.
//!
//! The one piece of shared state the patcher keeps, handed around as an
//! `Arc` by whoever installs the transformer. The transformer writes
//! it during the target class load; the verification harness reads it after
//! its behavioral cases have finished. Each field is written at most once
//! per load and read by any number of threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PatchState {
    installed: AtomicBool,
    applied: AtomicBool,
    last_error: OnceLock<String>,
}

/// Point-in-time copy for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchStateSnapshot {
    pub installed: bool,
    pub applied: bool,
    pub last_error: Option<String>,
}

impl PatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_installed(&self) {
        self.installed.store(true, Ordering::Release);
    }

    pub fn mark_applied(&self) {
        self.applied.store(true, Ordering::Release);
    }

    /// Keep the first error of this load; later ones are dropped.
    pub fn record_error(&self, detail: impl Into<String>) -> bool {
        self.last_error.set(detail.into()).is_ok()
    }

    pub fn installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.get().map(String::as_str)
    }

    pub fn snapshot(&self) -> PatchStateSnapshot {
        PatchStateSnapshot {
            installed: self.installed(),
            applied: self.applied(),
            last_error: self.last_error().map(str::to_owned),
        }
    }
}
