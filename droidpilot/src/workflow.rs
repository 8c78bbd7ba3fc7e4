//! Checkpointed workflow execution for one instance.
//!
//! A workflow is a linear list of [`Checkpoint`]s declared in settings. The
//! orchestrator boots the instance, runs each checkpoint in order and stops at
//! the first terminal condition. Exactly one [`WorkflowOutcome`] is produced
//! per run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::context::InstanceContext;
use crate::declutter::Declutter;
use crate::detect::FaultDetector;
use crate::errors::AutomationError;
use crate::input::InputDispatcher;
use crate::ledger::{RunLedger, RunStatus};
use crate::lifecycle::InstanceManager;
use crate::ocr::TextRecognizer;
use crate::platforms::{DeviceShell, InstanceControl};
use crate::screen::ScreenCapture;
use crate::settings::{secs, Settings};
use crate::vision::{TemplateStore, VisualMatcher};
use crate::wait::{WaitOptions, Waiter};
use crate::watchdog::FreezeWatchdog;

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(2);

fn default_interval_ms() -> u64 {
    150
}

fn default_duration_ms() -> u64 {
    800
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    #[serde(flatten)]
    pub action: Action,
    /// A missing element at an optional checkpoint does not fail the run.
    #[serde(default)]
    pub optional: bool,
    /// Clear overlays before running this checkpoint.
    #[serde(default)]
    pub declutter_before: bool,
    /// Pause after the checkpoint completes.
    #[serde(default)]
    pub settle_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    WaitFor {
        template: String,
        #[serde(default)]
        timeout_secs: Option<f64>,
        #[serde(default)]
        threshold: Option<f32>,
        #[serde(default)]
        click: bool,
    },
    Tap {
        x: u32,
        y: u32,
        #[serde(default)]
        real: bool,
    },
    DoubleTap {
        x: u32,
        y: u32,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default)]
        real: bool,
    },
    LongPress {
        x: u32,
        y: u32,
        #[serde(default = "default_duration_ms")]
        duration_ms: u64,
        #[serde(default)]
        real: bool,
    },
    Swipe {
        from: (u32, u32),
        to: (u32, u32),
        #[serde(default = "default_duration_ms")]
        duration_ms: u64,
        #[serde(default)]
        real: bool,
    },
    /// Clears the focused field with `backspaces` deletes, then types `text`.
    TypeText {
        text: String,
        #[serde(default)]
        backspaces: u32,
    },
    Declutter {
        #[serde(default)]
        iterations: Option<u32>,
    },
    /// Ends the run with [`WorkflowOutcome::Recycle`] when a fault screen shows.
    CheckFault,
    Delay {
        seconds: f64,
    },
    /// For `duration_secs`, taps whichever of `templates` is visible every
    /// `interval_secs`, with a freeze check on every pass.
    Cycle {
        templates: Vec<String>,
        duration_secs: f64,
        interval_secs: f64,
        #[serde(default)]
        threshold: Option<f32>,
    },
    /// For `duration_secs`, checks every `interval_secs` that `template` is
    /// still on screen. Ends early when it disappears.
    Hold {
        template: String,
        duration_secs: f64,
        interval_secs: f64,
        #[serde(default)]
        threshold: Option<f32>,
    },
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowOutcome {
    Success,
    /// The instance is unusable and gets destroyed.
    Recycle,
    Failed,
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowOutcome::Success => "SUCCESS",
            WorkflowOutcome::Recycle => "RECYCLE",
            WorkflowOutcome::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub instance_id: u32,
    pub workflow: String,
    pub outcome: WorkflowOutcome,
    pub reason: String,
    /// Checkpoint that ended the run, if it did not run to completion.
    pub checkpoint: Option<String>,
    pub completed_checkpoints: usize,
    pub duration_ms: u64,
}

/// How a single checkpoint ended.
#[derive(Debug, Clone, PartialEq)]
enum StepVerdict {
    Advance,
    Missing(String),
    Fault,
}

struct Terminal {
    outcome: WorkflowOutcome,
    reason: String,
    checkpoint: Option<String>,
}

impl Terminal {
    fn new(outcome: WorkflowOutcome, reason: impl Into<String>, checkpoint: Option<&str>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
            checkpoint: checkpoint.map(str::to_string),
        }
    }
}

/// External collaborators shared by all workers.
#[derive(Clone)]
pub struct Collaborators {
    pub shell: Arc<dyn DeviceShell>,
    pub control: Arc<dyn InstanceControl>,
    pub ledger: Arc<RunLedger>,
    pub templates: Arc<TemplateStore>,
    pub ocr: Option<Arc<dyn TextRecognizer>>,
}

/// Runs the configured workflow against one instance.
pub struct Orchestrator {
    context: Arc<InstanceContext>,
    settings: Arc<Settings>,
    shell: Arc<dyn DeviceShell>,
    lifecycle: InstanceManager,
    ledger: Arc<RunLedger>,
    input: InputDispatcher,
    waiter: Waiter,
    declutter: Declutter,
    detector: FaultDetector,
    watchdog: FreezeWatchdog,
    stop: CancellationToken,
    completed: usize,
}

impl Orchestrator {
    /// Boots the instance, reads its resolution and wires every component
    /// for it.
    #[instrument(skip(settings, collaborators, stop))]
    pub async fn build(
        instance_id: u32,
        settings: Arc<Settings>,
        collaborators: Collaborators,
        stop: CancellationToken,
    ) -> Result<Self, AutomationError> {
        let lifecycle = InstanceManager::new(
            collaborators.control.clone(),
            settings.emulator.title_prefix.clone(),
        );
        lifecycle
            .ensure_running(instance_id, Duration::from_secs(settings.emulator.boot_timeout_secs))
            .await?;

        let actual = collaborators.shell.screen_resolution(instance_id).await?;
        let context = Arc::new(InstanceContext::new(
            instance_id,
            settings.reference_resolution,
            actual,
            settings.package.clone(),
        )?);
        info!(
            "Instance {instance_id}: reference {} -> actual {}",
            context.base_resolution, context.actual_resolution
        );

        Ok(Self::assemble(context, settings, collaborators, lifecycle, stop))
    }

    /// Wires components for an already-known context.
    pub fn assemble(
        context: Arc<InstanceContext>,
        settings: Arc<Settings>,
        collaborators: Collaborators,
        lifecycle: InstanceManager,
        stop: CancellationToken,
    ) -> Self {
        let shell = collaborators.shell.clone();
        let capture = ScreenCapture::new(
            shell.clone(),
            context.instance_id,
            settings.paths.screens_dir.clone(),
            settings.paths.errors_dir.clone(),
        );
        let matcher = VisualMatcher::new(capture.clone(), collaborators.templates.clone());
        let input = InputDispatcher::new(shell.clone(), context.clone());
        let waiter = Waiter::new(matcher.clone(), input.clone());
        let declutter = Declutter::new(matcher.clone(), input.clone(), &settings.declutter);
        let detector = FaultDetector::new(
            matcher,
            context.clone(),
            collaborators.ocr.clone(),
            &settings.detector,
        );
        let watchdog = FreezeWatchdog::new(
            shell.clone(),
            context.clone(),
            capture,
            Duration::from_secs(settings.watchdog.staleness_secs),
        );

        Self {
            context,
            settings,
            shell,
            lifecycle,
            ledger: collaborators.ledger,
            input,
            waiter,
            declutter,
            detector,
            watchdog,
            stop,
            completed: 0,
        }
    }

    pub fn context(&self) -> &InstanceContext {
        &self.context
    }

    /// Runs the workflow to its terminal outcome and applies that outcome:
    /// the ledger is updated, a successful run stops the app and a recycled
    /// instance is destroyed.
    #[instrument(skip(self), fields(instance = self.context.instance_id))]
    pub async fn run(&mut self) -> WorkflowReport {
        let started = Instant::now();
        let instance_id = self.context.instance_id;
        let workflow = self.settings.workflow.name.clone();
        info!("Starting workflow '{workflow}' on instance {instance_id}");

        if let Err(e) = self.ledger.register(&workflow, instance_id).await {
            error!("Could not register run for instance {instance_id}: {e}");
        }

        let terminal = self.execute().await;
        self.finish(&terminal).await;

        WorkflowReport {
            instance_id,
            workflow,
            outcome: terminal.outcome,
            reason: terminal.reason,
            checkpoint: terminal.checkpoint,
            completed_checkpoints: self.completed,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn execute(&mut self) -> Terminal {
        if let Err(e) = self.boot().await {
            return Terminal::new(WorkflowOutcome::Failed, format!("boot failed: {e}"), Some("boot"));
        }

        let checkpoints = self.settings.workflow.checkpoints.clone();
        let total = checkpoints.len();
        for (index, checkpoint) in checkpoints.iter().enumerate() {
            if self.stop.is_cancelled() {
                return Terminal::new(
                    WorkflowOutcome::Failed,
                    "stop requested",
                    Some(&checkpoint.name),
                );
            }

            info!("[{}/{total}] {}", index + 1, checkpoint.name);
            match self.run_checkpoint(checkpoint).await {
                Ok(StepVerdict::Advance) => {}
                Ok(StepVerdict::Fault) => {
                    return Terminal::new(
                        WorkflowOutcome::Recycle,
                        "fault screen detected",
                        Some(&checkpoint.name),
                    );
                }
                Ok(StepVerdict::Missing(what)) if checkpoint.optional => {
                    info!("Optional checkpoint '{}' skipped: {what}", checkpoint.name);
                }
                Ok(StepVerdict::Missing(what)) => {
                    // A missing element is often explained by a fault screen.
                    if matches!(self.detector.is_detected().await, Ok(true)) {
                        return Terminal::new(
                            WorkflowOutcome::Recycle,
                            format!("fault screen detected ({what})"),
                            Some(&checkpoint.name),
                        );
                    }
                    return Terminal::new(
                        WorkflowOutcome::Failed,
                        what,
                        Some(&checkpoint.name),
                    );
                }
                Err(e @ AutomationError::TemplateNotFound(_)) => {
                    error!("Missing asset at checkpoint '{}': {e}", checkpoint.name);
                    return Terminal::new(
                        WorkflowOutcome::Failed,
                        e.to_string(),
                        Some(&checkpoint.name),
                    );
                }
                Err(e) => {
                    return Terminal::new(
                        WorkflowOutcome::Failed,
                        e.to_string(),
                        Some(&checkpoint.name),
                    );
                }
            }

            self.completed += 1;
            tokio::time::sleep(secs(checkpoint.settle_secs)).await;
        }

        Terminal::new(WorkflowOutcome::Success, "all checkpoints passed", None)
    }

    async fn boot(&mut self) -> Result<(), AutomationError> {
        self.shell
            .start_app(self.context.instance_id, &self.context.package_name)
            .await?;
        let settle = self
            .settings
            .timing("after_launch", self.settings.workflow.launch_settle_secs);
        tokio::time::sleep(settle).await;
        Ok(())
    }

    /// Runs a checkpoint, repeating it when the command transport fails.
    async fn run_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<StepVerdict, AutomationError> {
        let retries = self.settings.workflow.transport_retries;
        let mut attempt = 0;
        loop {
            if checkpoint.declutter_before {
                self.declutter.clean(self.settings.declutter.iterations).await?;
            }
            match self.perform(&checkpoint.action).await {
                Err(e) if e.is_transport() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Transport failure at '{}' (attempt {attempt}/{retries}): {e}",
                        checkpoint.name
                    );
                    tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    async fn perform(&mut self, action: &Action) -> Result<StepVerdict, AutomationError> {
        let vision = self.settings.vision.clone();
        match action {
            Action::WaitFor {
                template,
                timeout_secs,
                threshold,
                click,
            } => {
                let options = WaitOptions::from_settings(&vision)
                    .timeout(secs(timeout_secs.unwrap_or(vision.timeout_secs)))
                    .threshold(threshold.unwrap_or(vision.threshold))
                    .click(*click);
                Ok(match self.waiter.wait_for(template, options).await? {
                    Some(_) => StepVerdict::Advance,
                    None => StepVerdict::Missing(format!("'{template}' not found")),
                })
            }
            Action::Tap { x, y, real } => {
                self.input.tap(*x, *y, *real).await?;
                Ok(StepVerdict::Advance)
            }
            Action::DoubleTap {
                x,
                y,
                interval_ms,
                real,
            } => {
                self.input
                    .double_tap(*x, *y, Duration::from_millis(*interval_ms), *real)
                    .await?;
                Ok(StepVerdict::Advance)
            }
            Action::LongPress {
                x,
                y,
                duration_ms,
                real,
            } => {
                self.input.long_press(*x, *y, *duration_ms, *real).await?;
                Ok(StepVerdict::Advance)
            }
            Action::Swipe {
                from,
                to,
                duration_ms,
                real,
            } => {
                self.input.swipe(*from, *to, *duration_ms, *real).await?;
                Ok(StepVerdict::Advance)
            }
            Action::TypeText { text, backspaces } => {
                self.input.replace_text(text, *backspaces).await?;
                Ok(StepVerdict::Advance)
            }
            Action::Declutter { iterations } => {
                let rounds = iterations.unwrap_or(self.settings.declutter.iterations);
                self.declutter.clean(rounds).await?;
                Ok(StepVerdict::Advance)
            }
            Action::CheckFault => Ok(if self.detector.is_detected().await? {
                StepVerdict::Fault
            } else {
                StepVerdict::Advance
            }),
            Action::Delay { seconds } => {
                tokio::time::sleep(secs(*seconds)).await;
                Ok(StepVerdict::Advance)
            }
            Action::Cycle {
                templates,
                duration_secs,
                interval_secs,
                threshold,
            } => {
                let threshold = threshold.unwrap_or(vision.threshold);
                self.cycle(templates, secs(*duration_secs), secs(*interval_secs), threshold)
                    .await
            }
            Action::Hold {
                template,
                duration_secs,
                interval_secs,
                threshold,
            } => {
                let threshold = threshold.unwrap_or(vision.threshold);
                self.hold(template, secs(*duration_secs), secs(*interval_secs), threshold)
                    .await
            }
        }
    }

    async fn cycle(
        &mut self,
        templates: &[String],
        duration: Duration,
        interval: Duration,
        threshold: f32,
    ) -> Result<StepVerdict, AutomationError> {
        let started = Instant::now();
        let mut passes = 0u64;
        while started.elapsed() < duration {
            if self.stop.is_cancelled() {
                break;
            }
            if !self.watchdog.check_and_recover().await?.is_healthy() {
                warn!("Application restarted during cycle, continuing");
            }
            for template in templates {
                let result = self.waiter.matcher().locate(template, threshold).await?;
                if let Some((x, y)) = result.center() {
                    self.input.tap(x, y, true).await?;
                }
            }
            passes += 1;
            tokio::time::sleep(interval).await;
        }
        info!("Cycle finished after {passes} passes");
        Ok(StepVerdict::Advance)
    }

    async fn hold(
        &mut self,
        template: &str,
        duration: Duration,
        interval: Duration,
        threshold: f32,
    ) -> Result<StepVerdict, AutomationError> {
        let started = Instant::now();
        while started.elapsed() < duration {
            if self.stop.is_cancelled() {
                break;
            }
            let result = self.waiter.matcher().locate(template, threshold).await?;
            if !result.found {
                return Ok(StepVerdict::Missing(format!("'{template}' left the screen")));
            }
            tokio::time::sleep(interval).await;
        }
        Ok(StepVerdict::Advance)
    }

    async fn finish(&self, terminal: &Terminal) {
        let instance_id = self.context.instance_id;
        let (status, detail) = match terminal.outcome {
            WorkflowOutcome::Success => (RunStatus::Completed, None),
            WorkflowOutcome::Recycle => (RunStatus::Recycled, Some(terminal.reason.clone())),
            WorkflowOutcome::Failed => (RunStatus::Failed, Some(terminal.reason.clone())),
        };

        match terminal.outcome {
            WorkflowOutcome::Success => info!(
                "Instance {instance_id} finished: {} ({})",
                terminal.outcome, terminal.reason
            ),
            WorkflowOutcome::Recycle => warn!(
                "Instance {instance_id} recycled at {:?}: {}",
                terminal.checkpoint, terminal.reason
            ),
            WorkflowOutcome::Failed => error!(
                "Instance {instance_id} failed at {:?}: {}",
                terminal.checkpoint, terminal.reason
            ),
        }

        if let Err(e) = self.ledger.update_status(instance_id, status, detail).await {
            error!("Could not record outcome for instance {instance_id}: {e}");
        }

        match terminal.outcome {
            WorkflowOutcome::Success => {
                if let Err(e) = self
                    .shell
                    .stop_app(instance_id, &self.context.package_name)
                    .await
                {
                    warn!("Could not stop {} after success: {e}", self.context.package_name);
                }
            }
            WorkflowOutcome::Recycle => {
                if let Err(e) = self.lifecycle.destroy(instance_id).await {
                    error!("Could not destroy instance {instance_id}: {e}");
                }
            }
            WorkflowOutcome::Failed => {}
        }
    }
}
