//! Reporter trait for dependency injection
//!
//! The engine reports per-package progress through this trait so that the
//! CLI, an MCP server or a test harness can render it however they like.

use aam_schema::{PackageName, Version};

use crate::ops::flow::Stage;

pub trait Reporter: Send + Sync {
    /// A package entered a pipeline stage.
    fn stage(&self, name: &PackageName, version: Option<&Version>, stage: Stage);

    /// A network operation failed and will be retried.
    fn retrying(&self, subject: &str, attempt: u32, reason: &str);

    /// A package reached `Committed`.
    fn done(&self, name: &PackageName, version: &Version, detail: &str);

    /// A package reached `Failed`.
    fn failed(&self, name: &PackageName, version: Option<&Version>, reason: &str);

    /// A package was left untouched.
    fn skipped(&self, name: &PackageName, reason: &str);

    /// A package is being undeployed.
    fn removing(&self, name: &PackageName, version: &Version);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of a batch.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn stage(&self, name: &PackageName, version: Option<&Version>, stage: Stage) {
        (**self).stage(name, version, stage);
    }
    fn retrying(&self, subject: &str, attempt: u32, reason: &str) {
        (**self).retrying(subject, attempt, reason);
    }
    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, version: Option<&Version>, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn skipped(&self, name: &PackageName, reason: &str) {
        (**self).skipped(name, reason);
    }
    fn removing(&self, name: &PackageName, version: &Version) {
        (**self).removing(name, version);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn stage(&self, _: &PackageName, _: Option<&Version>, _: Stage) {}
    fn retrying(&self, _: &str, _: u32, _: &str) {}
    fn done(&self, _: &PackageName, _: &Version, _: &str) {}
    fn failed(&self, _: &PackageName, _: Option<&Version>, _: &str) {}
    fn skipped(&self, _: &PackageName, _: &str) {}
    fn removing(&self, _: &PackageName, _: &Version) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}

/// Forwards every event to `tracing`, for headless callers.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn stage(&self, name: &PackageName, version: Option<&Version>, stage: Stage) {
        let version = version.map(ToString::to_string).unwrap_or_default();
        if stage.is_terminal() {
            tracing::info!(package = %name, version, %stage, "stage");
        } else {
            tracing::debug!(package = %name, version, %stage, "stage");
        }
    }

    fn retrying(&self, subject: &str, attempt: u32, reason: &str) {
        tracing::warn!(subject, attempt, reason, "retrying");
    }

    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        tracing::info!(package = %name, version = %version, detail, "committed");
    }

    fn failed(&self, name: &PackageName, version: Option<&Version>, reason: &str) {
        let version = version.map(ToString::to_string).unwrap_or_default();
        tracing::error!(package = %name, version, reason, "failed");
    }

    fn skipped(&self, name: &PackageName, reason: &str) {
        tracing::warn!(package = %name, reason, "skipped");
    }

    fn removing(&self, name: &PackageName, version: &Version) {
        tracing::info!(package = %name, version = %version, "removing");
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        tracing::info!(count, action, elapsed_secs, "batch finished");
    }
}
