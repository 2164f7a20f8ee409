#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use cortex::{
    CapabilityExecutor, Command, CommandId, CommandOutcome, CortexConfig, EchoExecutor,
    ExecutionSnapshot, PlanCompiler, PrimitiveRegistry, Scheduler,
};

/// Echo executor whose gated primitives block until permits are released.
pub struct GatedExecutor {
    inner: EchoExecutor,
    gated: HashSet<String>,
    gate: Semaphore,
}

impl GatedExecutor {
    pub fn new(inner: EchoExecutor) -> Self {
        Self {
            inner,
            gated: HashSet::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn gate(mut self, primitive: &str) -> Self {
        self.gated.insert(primitive.to_string());
        self
    }

    /// Let `count` blocked commands through, in arrival order.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn dispatched(&self) -> Vec<CommandId> {
        self.inner.dispatched()
    }
}

#[async_trait]
impl CapabilityExecutor for GatedExecutor {
    async fn execute(&self, command: &Command) -> CommandOutcome {
        if self.gated.contains(command.primitive()) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.inner.execute(command).await
    }
}

pub fn scheduler_with(
    compiler: impl PlanCompiler + 'static,
    executor: Arc<dyn CapabilityExecutor>,
) -> Scheduler {
    Scheduler::new(
        CortexConfig::default(),
        Arc::new(PrimitiveRegistry::with_builtins().unwrap()),
        Arc::new(compiler),
        executor,
    )
}

/// Poll the scheduler until `predicate` holds.
pub async fn wait_for(
    scheduler: &Scheduler,
    what: &str,
    predicate: impl Fn(&ExecutionSnapshot) -> bool,
) -> ExecutionSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = scheduler.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Step indices per stage of the installed queue.
pub fn stage_shape(snapshot: &ExecutionSnapshot) -> Vec<Vec<usize>> {
    snapshot
        .command_queue
        .as_ref()
        .map(|queue| {
            queue
                .stages()
                .iter()
                .map(|stage| stage.commands.iter().map(|c| c.step_index).collect())
                .collect()
        })
        .unwrap_or_default()
}
