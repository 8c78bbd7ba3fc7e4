//! Screen-driven automation of Android emulator instances
//!
//! Each instance is driven by an [`Orchestrator`] that captures its screen,
//! finds UI elements by template matching, injects input in device pixels and
//! walks a checkpointed workflow to a single terminal [`WorkflowOutcome`].
//! Many instances run side by side through a [`WorkerPool`].

pub mod context;
pub mod declutter;
pub mod detect;
pub mod errors;
pub mod input;
pub mod ledger;
pub mod lifecycle;
pub mod ocr;
pub mod platforms;
pub mod pool;
pub mod screen;
pub mod settings;
pub mod vision;
pub mod wait;
pub mod watchdog;
pub mod workflow;
#[cfg(test)]
mod tests;

pub use context::{InstanceContext, Normalizer, Resolution};
pub use errors::AutomationError;
pub use ledger::{RunLedger, RunRecord, RunStatus};
pub use lifecycle::InstanceManager;
pub use platforms::{DeviceShell, InstanceControl, InstanceStatus, MemucController};
pub use pool::WorkerPool;
pub use settings::Settings;
pub use vision::{MatchResult, TemplateStore, VisualMatcher};
pub use wait::{WaitOptions, Waiter};
pub use watchdog::{FreezeWatchdog, Health};
pub use workflow::{Collaborators, Orchestrator, WorkflowOutcome, WorkflowReport};
