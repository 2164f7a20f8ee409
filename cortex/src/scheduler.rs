//! Stage Executor / Scheduler
//!
//! Drives one directive at a time through parse, compile, assemble and staged
//! execution. All commands of the current stage are dispatched together; their
//! results come back over a single channel and the scheduler advances only
//! once every one of them has resolved.
//!
//! Every run is tagged with a generation. Starting a new directive, cancelling
//! or resetting bumps it, which wakes a parked driver and turns every result of
//! the old run into a stale one that is dropped on arrival.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assembler::CommandAssembler;
use crate::compiler::{validate_plan, PlanCompiler};
use crate::config::CortexConfig;
use crate::error::{CortexError, PipelineError};
use crate::events::{EventBus, PipelineEvent};
use crate::executor::{execute_guarded, CapabilityExecutor};
use crate::generation::GenerationCounter;
use crate::primitives::PrimitiveRegistry;
use crate::state::{CommandResolution, ExecutionSnapshot, ExecutionState, Recorded};
use crate::status::PipelineStatus;
use crate::types::{Command, CommandQueue, Directive, Generation, Plan};

/// How a stage barrier was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Barrier {
    Passed,
    Failed,
    Superseded,
}

/// Per-command resolution callback for capability layers that report results
/// out of band. Results for commands that already resolved are ignored.
#[derive(Debug, Clone)]
pub struct ResolutionHandle {
    sender: mpsc::UnboundedSender<CommandResolution>,
}

impl ResolutionHandle {
    /// Returns false once the scheduler is gone.
    pub fn deliver(&self, resolution: CommandResolution) -> bool {
        self.sender.send(resolution).is_ok()
    }
}

struct Inner {
    registry: Arc<PrimitiveRegistry>,
    compiler: Arc<dyn PlanCompiler>,
    executor: Arc<dyn CapabilityExecutor>,
    assembler: CommandAssembler,
    config: CortexConfig,
    state: Mutex<ExecutionState>,
    generations: GenerationCounter,
    results_tx: mpsc::UnboundedSender<CommandResolution>,
    results_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CommandResolution>>,
    events: EventBus,
}

/// Handle to one execution core. Clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: CortexConfig,
        registry: Arc<PrimitiveRegistry>,
        compiler: Arc<dyn PlanCompiler>,
        executor: Arc<dyn CapabilityExecutor>,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            registry,
            compiler,
            executor,
            assembler: CommandAssembler::from_config(&config),
            events: EventBus::new(config.event_capacity),
            config,
            state: Mutex::new(ExecutionState::default()),
            generations: GenerationCounter::new(),
            results_tx,
            results_rx: tokio::sync::Mutex::new(results_rx),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn registry(&self) -> &Arc<PrimitiveRegistry> {
        &self.inner.registry
    }

    pub fn generation(&self) -> Generation {
        self.inner.generations.current()
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.with_state(|state| state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn resolution_handle(&self) -> ResolutionHandle {
        ResolutionHandle {
            sender: self.inner.results_tx.clone(),
        }
    }

    /// Run `directive` until it completes, fails or is superseded.
    ///
    /// A run still in flight is cancelled first. Failures are reported through
    /// the returned snapshot's status and `last_error`. The run is driven by
    /// its own task, so dropping this future does not stall it.
    pub async fn run_directive(&self, directive: Directive) -> ExecutionSnapshot {
        let (generation, driver) = self.spawn_directive(directive);
        if let Err(err) = driver.await {
            error!(generation, %err, "pipeline driver aborted");
        }
        self.snapshot()
    }

    /// Start `directive` on a spawned driver task and return its generation.
    pub fn spawn_directive(&self, directive: Directive) -> (Generation, JoinHandle<()>) {
        let generation = self.begin(&directive);
        info!(
            generation,
            directive_id = %directive.id,
            directive_type = %directive.directive_type,
            "directive received"
        );
        let scheduler = self.clone();
        let driver = tokio::spawn(async move { scheduler.drive(generation, &directive).await });
        (generation, driver)
    }

    /// Abandon the run in flight. Returns false when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        self.with_state(|state| {
            if state.status == PipelineStatus::Idle {
                return false;
            }
            let cancelled = state.generation;
            self.supersede(state);
            info!(generation = cancelled, "pipeline run cancelled");
            true
        })
    }

    /// Return to idle and forget the last run entirely, including its error.
    pub fn reset(&self) {
        self.with_state(|state| {
            self.supersede(state);
            state.last_error = None;
            debug!(generation = state.generation, "pipeline reset");
        });
    }

    fn begin(&self, directive: &Directive) -> Generation {
        self.with_state(|state| {
            if state.status.is_active() {
                info!(
                    generation = state.generation,
                    status = %state.status,
                    "superseding previous run"
                );
                self.supersede(state);
            } else if state.status.is_terminal() {
                // nothing left to abandon, the new run's bump is enough
                self.transition(state, PipelineStatus::Idle);
                state.clear_run();
            }
            state.generation = self.inner.generations.bump();
            state.last_error = None;
            state.active_directive = Some(directive.clone());
            self.transition(state, PipelineStatus::ParsingDirective);
            state.generation
        })
    }

    async fn drive(&self, generation: Generation, directive: &Directive) {
        if let Err(err) = self.check_directive(directive) {
            self.fail(generation, err);
            return;
        }

        let Some(plan) = self.compile(generation, directive).await else {
            return;
        };

        let queue = match self.assemble(generation, &plan) {
            Some(Ok(queue)) => queue,
            Some(Err(err)) => {
                self.fail(generation, err);
                return;
            }
            None => return,
        };

        if queue.is_empty() {
            self.with_current(generation, |state| {
                state.finish_queue();
                self.transition(state, PipelineStatus::Completed);
            });
            return;
        }

        self.execute(generation, queue).await;
    }

    fn check_directive(&self, directive: &Directive) -> Result<(), CortexError> {
        if !self.inner.config.accepts(&directive.directive_type) {
            return Err(CortexError::DirectiveRejected(format!(
                "unsupported directive type '{}'",
                directive.directive_type
            )));
        }
        if directive.content.trim().is_empty() {
            return Err(CortexError::DirectiveRejected(
                "directive content is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile and validate. `None` means the run failed or was superseded.
    async fn compile(&self, generation: Generation, directive: &Directive) -> Option<Plan> {
        self.with_current(generation, |state| {
            self.transition(state, PipelineStatus::CompilingPlan)
        })
        .filter(|moved| *moved)?;

        let compiled = tokio::select! {
            _ = self.inner.generations.superseded(generation) => {
                debug!(generation, "compilation abandoned");
                return None;
            }
            compiled = self.inner.compiler.compile(directive) => compiled,
        };

        let plan = match compiled {
            Ok(plan) => plan,
            Err(err) => {
                self.fail(generation, err);
                return None;
            }
        };
        debug!(generation, goal = %plan.goal, steps = plan.steps.len(), "plan compiled");

        self.with_current(generation, |state| state.active_plan = Some(plan.clone()))?;
        if let Err(err) = validate_plan(&plan, &self.inner.registry) {
            self.fail(generation, err);
            return None;
        }
        Some(plan)
    }

    fn assemble(
        &self,
        generation: Generation,
        plan: &Plan,
    ) -> Option<Result<Arc<CommandQueue>, CortexError>> {
        self.with_current(generation, |state| {
            if !self.transition(state, PipelineStatus::AssemblingCommands) {
                return None;
            }
            let assembled = self
                .inner
                .assembler
                .assemble(plan, &self.inner.registry, generation)
                .map(Arc::new);
            if let Ok(queue) = &assembled {
                state.command_queue = Some(queue.clone());
            }
            Some(assembled)
        })
        .flatten()
    }

    async fn execute(&self, generation: Generation, queue: Arc<CommandQueue>) {
        let mut results = self.inner.results_rx.lock().await;

        for (index, stage) in queue.stages().iter().enumerate() {
            let opened = self.with_current(generation, |state| {
                if !self.transition(state, PipelineStatus::Executing) {
                    return false;
                }
                state.open_stage(index).is_some()
            });
            if opened != Some(true) {
                return;
            }

            let command_ids = stage.commands.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
            info!(generation, stage = index, commands = command_ids.len(), "stage dispatched");
            self.inner.events.emit(PipelineEvent::StageDispatched {
                generation,
                stage_index: index,
                command_ids,
            });
            for command in &stage.commands {
                self.dispatch(generation, command.clone());
            }

            match self.await_barrier(generation, &mut results).await {
                Barrier::Passed => info!(generation, stage = index, "stage resolved"),
                Barrier::Failed => {
                    info!(generation, stage = index, "stage resolved with failure");
                    return;
                }
                Barrier::Superseded => {
                    debug!(generation, stage = index, "stage abandoned");
                    return;
                }
            }
        }

        self.with_current(generation, |state| {
            state.finish_queue();
            self.transition(state, PipelineStatus::Completed);
        });
        info!(generation, stages = queue.len(), "pipeline completed");
    }

    fn dispatch(&self, generation: Generation, command: Command) {
        let executor = self.inner.executor.clone();
        let results = self.inner.results_tx.clone();
        tokio::spawn(async move {
            let outcome = execute_guarded(executor.as_ref(), &command).await;
            // the receiver only closes when the scheduler is dropped
            let _ = results.send(CommandResolution {
                generation,
                command_id: command.id,
                outcome,
            });
        });
    }

    async fn await_barrier(
        &self,
        generation: Generation,
        results: &mut mpsc::UnboundedReceiver<CommandResolution>,
    ) -> Barrier {
        loop {
            let resolution = tokio::select! {
                _ = self.inner.generations.superseded(generation) => return Barrier::Superseded,
                received = results.recv() => match received {
                    Some(resolution) => resolution,
                    None => return Barrier::Superseded,
                },
            };
            if let Some(barrier) = self.record(generation, resolution) {
                return barrier;
            }
        }
    }

    /// Apply one result. Returns the barrier outcome once the stage is fully resolved.
    fn record(&self, generation: Generation, resolution: CommandResolution) -> Option<Barrier> {
        self.with_state(|state| {
            if state.generation != generation {
                return Some(Barrier::Superseded);
            }
            let recorded = match state.record(&resolution) {
                Ok(recorded) => recorded,
                Err(err) => {
                    debug!(command_id = %resolution.command_id, %err, "dropping stale result");
                    self.inner.events.emit(PipelineEvent::StaleResultDropped {
                        command_id: resolution.command_id,
                        result_generation: resolution.generation,
                        current_generation: state.generation,
                    });
                    return None;
                }
            };

            match recorded {
                Recorded::Duplicate => {
                    warn!(generation, command_id = %resolution.command_id, "duplicate result ignored");
                    return None;
                }
                Recorded::Unknown => {
                    warn!(
                        generation,
                        command_id = %resolution.command_id,
                        "result for a command outside the current stage ignored"
                    );
                    return None;
                }
                Recorded::Succeeded => {
                    debug!(generation, command_id = %resolution.command_id, "command succeeded");
                }
                Recorded::Failed => {
                    let message = resolution.outcome.clone().err().unwrap_or_default();
                    warn!(generation, command_id = %resolution.command_id, %message, "command failed");
                    if state.status == PipelineStatus::Executing {
                        let err = CortexError::CommandExecutionError {
                            command_id: resolution.command_id.clone(),
                            message,
                        };
                        state.last_error = Some(PipelineError::from(&err));
                        self.transition(state, PipelineStatus::Failed);
                    }
                }
            }
            self.inner.events.emit(PipelineEvent::CommandResolved {
                generation,
                command_id: resolution.command_id,
                success: recorded == Recorded::Succeeded,
            });

            if !state.stage_resolved() {
                return None;
            }
            Some(match state.status {
                PipelineStatus::Failed => Barrier::Failed,
                _ => Barrier::Passed,
            })
        })
    }

    fn fail(&self, generation: Generation, err: CortexError) {
        self.with_current(generation, |state| {
            warn!(generation, kind = %err.kind(), %err, "pipeline run failed");
            state.last_error = Some(PipelineError::from(&err));
            self.transition(state, PipelineStatus::Failed);
        });
    }

    /// Bump the generation, return to idle and drop the run's directive, plan and queue.
    fn supersede(&self, state: &mut ExecutionState) {
        state.generation = self.inner.generations.bump();
        if state.status != PipelineStatus::Idle {
            self.transition(state, PipelineStatus::Idle);
        }
        state.clear_run();
    }

    fn transition(&self, state: &mut ExecutionState, to: PipelineStatus) -> bool {
        match state.transition(to) {
            Ok(from) => {
                if from != to {
                    debug!(generation = state.generation, %from, %to, "pipeline status changed");
                    self.inner
                        .events
                        .emit(PipelineEvent::status_changed(state.generation, from, to));
                }
                true
            }
            Err(err) => {
                error!(generation = state.generation, %err, "pipeline transition refused");
                false
            }
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ExecutionState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Run `f` only while `generation` is still the current run.
    fn with_current<R>(
        &self,
        generation: Generation,
        f: impl FnOnce(&mut ExecutionState) -> R,
    ) -> Option<R> {
        self.with_state(|state| (state.generation == generation).then(|| f(state)))
    }
}
