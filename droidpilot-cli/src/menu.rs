//! Interactive operator console.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use droidpilot::{
    AutomationError, Collaborators, InstanceManager, Orchestrator, Settings, WorkerPool,
    WorkflowReport,
};

pub struct Console {
    settings: Arc<Settings>,
    collaborators: Collaborators,
    manager: InstanceManager,
    pool: WorkerPool,
    stop: CancellationToken,
}

impl Console {
    pub fn new(settings: Arc<Settings>, collaborators: Collaborators, stop: CancellationToken) -> Self {
        let manager = InstanceManager::new(
            collaborators.control.clone(),
            settings.emulator.title_prefix.clone(),
        );
        let pool = WorkerPool::from_settings(&settings.pool);
        Self {
            settings,
            collaborators,
            manager,
            pool,
            stop,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            print_menu(&self.settings);
            let Some(choice) = self.prompt(&mut lines, "Choice: ").await? else {
                break;
            };
            match choice.trim() {
                "1" => {
                    let Some(raw) = self.prompt(&mut lines, "Instance index: ").await? else {
                        break;
                    };
                    match parse_ids(&raw).first() {
                        Some(&id) => self.run_one(id).await,
                        None => println!("No valid instance index given"),
                    }
                }
                "2" => {
                    let Some(raw) = self
                        .prompt(&mut lines, "Instance indexes (e.g. 1,2,5): ")
                        .await?
                    else {
                        break;
                    };
                    let ids = parse_ids(&raw);
                    if ids.is_empty() {
                        println!("No valid instance indexes given");
                    } else {
                        self.run_many(ids).await;
                    }
                }
                "3" => self.clone_base().await,
                "4" => self.list_instances().await,
                "0" | "q" | "quit" | "exit" => break,
                other => println!("Unknown option '{other}'"),
            }
        }
        info!("Console closed");
        Ok(())
    }

    /// Reads one line, giving up when the operator interrupts.
    async fn prompt(&self, lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
        print!("{label}");
        std::io::stdout().flush()?;
        tokio::select! {
            _ = self.stop.cancelled() => Ok(None),
            line = lines.next_line() => Ok(line?),
        }
    }

    async fn run_one(&self, instance_id: u32) {
        match run_instance(
            instance_id,
            self.settings.clone(),
            self.collaborators.clone(),
            self.stop.clone(),
        )
        .await
        {
            Ok(report) => print_report(&report),
            Err(e) => {
                error!("Instance {instance_id} could not start: {e}");
                println!("Instance {instance_id}: could not start ({e})");
            }
        }
    }

    async fn run_many(&self, instance_ids: Vec<u32>) {
        info!(
            "Running {} instances, at most {} at a time",
            instance_ids.len(),
            self.pool.max_workers()
        );
        let settings = self.settings.clone();
        let collaborators = self.collaborators.clone();
        let stop = self.stop.clone();
        let results = self
            .pool
            .run_all(instance_ids, move |instance_id| {
                run_instance(instance_id, settings.clone(), collaborators.clone(), stop.clone())
            })
            .await;

        for (instance_id, result) in results {
            match result {
                Ok(report) => print_report(&report),
                Err(e) => println!("Instance {instance_id}: could not start ({e})"),
            }
        }
    }

    async fn clone_base(&self) {
        let base = self.settings.emulator.base_instance;
        match self.manager.create_from_base(base).await {
            Ok(new_id) => println!("Created instance {new_id} from base {base}"),
            Err(e) => {
                error!("Cloning base instance {base} failed: {e}");
                println!("Could not clone base instance {base}: {e}");
            }
        }
    }

    async fn list_instances(&self) {
        let instances = match self.manager.list().await {
            Ok(instances) => instances,
            Err(e) => {
                println!("Could not list instances: {e}");
                return;
            }
        };
        if instances.is_empty() {
            println!("No instances found");
            return;
        }
        println!("{:<6} {:<24} {:<8} {}", "Index", "Title", "State", "Proxy");
        for instance in instances {
            let proxy = if instance.running {
                match self.collaborators.shell.proxy(instance.index).await {
                    Ok(Some(proxy)) => proxy,
                    Ok(None) => "-".to_string(),
                    Err(_) => "?".to_string(),
                }
            } else {
                "-".to_string()
            };
            println!(
                "{:<6} {:<24} {:<8} {}",
                instance.index,
                instance.title,
                instance.state_label(),
                proxy
            );
        }
    }
}

async fn run_instance(
    instance_id: u32,
    settings: Arc<Settings>,
    collaborators: Collaborators,
    stop: CancellationToken,
) -> Result<WorkflowReport, AutomationError> {
    let mut orchestrator = Orchestrator::build(instance_id, settings, collaborators, stop).await?;
    Ok(orchestrator.run().await)
}

fn print_menu(settings: &Settings) {
    println!();
    println!("=== droidpilot: workflow '{}' ===", settings.workflow.name);
    println!("1) Run workflow on one instance");
    println!("2) Run workflow on several instances");
    println!("3) Clone a new instance from base {}", settings.emulator.base_instance);
    println!("4) List instances");
    println!("0) Exit");
}

fn print_report(report: &WorkflowReport) {
    let at = report
        .checkpoint
        .as_deref()
        .map(|name| format!(" at '{name}'"))
        .unwrap_or_default();
    println!(
        "Instance {}: {}{at} after {:.1}s, {} checkpoints passed ({})",
        report.instance_id,
        report.outcome,
        report.duration_ms as f64 / 1000.0,
        report.completed_checkpoints,
        report.reason
    );
}

/// Parses a comma or whitespace separated list of instance indexes, keeping
/// the first occurrence of each.
fn parse_ids(raw: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if let Ok(id) = token.trim().parse::<u32>() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::parse_ids;

    #[test]
    fn parses_mixed_separators() {
        assert_eq!(parse_ids("1, 2 5,,7"), vec![1, 2, 5, 7]);
    }

    #[test]
    fn skips_garbage_and_duplicates() {
        assert_eq!(parse_ids("3,x,-1,3,4"), vec![3, 4]);
        assert!(parse_ids("").is_empty());
    }
}
