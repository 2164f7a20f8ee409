mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{scheduler_with, wait_for, GatedExecutor};
use cortex::{
    CommandId, CommandResolution, Directive, EchoExecutor, PipelineEvent, PipelineStatus, Plan,
    Resolution, StaticPlanCompiler, Step,
};

fn slow_fetch_plan() -> Plan {
    Plan::new("slow read").with_step(
        Step::new("Fetch", "fetch").with_params(json!({ "source": "https://example.org/slow" })),
    )
}

fn reply_plan() -> Plan {
    Plan::new("reply")
        .with_step(Step::new("Reply", "respond").with_params(json!({ "message": "right away" })))
}

#[tokio::test]
async fn test_cancel_unsticks_a_stalled_stage() {
    let executor = Arc::new(GatedExecutor::new(EchoExecutor::new()).gate("fetch"));
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("goal", slow_fetch_plan()),
        executor.clone(),
    );

    let run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_directive(Directive::new("goal", "read")).await })
    };
    let executing = wait_for(&scheduler, "execution", |s| s.status == PipelineStatus::Executing).await;

    assert!(scheduler.cancel());
    let snapshot = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("cancel should wake the driver")
        .unwrap();

    assert_eq!(snapshot.status, PipelineStatus::Idle);
    assert_eq!(snapshot.generation, executing.generation + 1);
    assert!(snapshot.active_directive.is_none());
    assert!(snapshot.command_queue.is_none());
    assert!(snapshot.current_stage_commands.is_empty());
    assert!(!scheduler.cancel());
}

#[tokio::test]
async fn test_run_outlives_a_caller_that_gives_up() {
    let executor = Arc::new(GatedExecutor::new(EchoExecutor::new()).gate("fetch"));
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("goal", slow_fetch_plan()),
        executor.clone(),
    );

    let gave_up = tokio::time::timeout(
        Duration::from_millis(50),
        scheduler.run_directive(Directive::new("goal", "read")),
    )
    .await;
    assert!(gave_up.is_err());
    let executing = wait_for(&scheduler, "execution", |s| s.status == PipelineStatus::Executing).await;

    executor.release(1);
    let snapshot = wait_for(&scheduler, "completion", |s| s.status == PipelineStatus::Completed).await;
    assert_eq!(snapshot.generation, executing.generation);
    assert!(matches!(
        snapshot.resolved_commands[0].resolution,
        Resolution::Succeeded(_)
    ));
}

#[tokio::test]
async fn test_spawned_directive_reports_through_its_handle() {
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("query", reply_plan()),
        Arc::new(EchoExecutor::new()),
    );

    let (generation, driver) = scheduler.spawn_directive(Directive::new("query", "hello"));
    assert_eq!(generation, scheduler.generation());
    driver.await.unwrap();

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.status, PipelineStatus::Completed);
    assert_eq!(snapshot.generation, generation);
}

#[tokio::test]
async fn test_stale_results_never_touch_the_new_run() {
    let executor = Arc::new(GatedExecutor::new(EchoExecutor::new()).gate("fetch"));
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("goal", slow_fetch_plan()),
        executor.clone(),
    );
    let handle = scheduler.resolution_handle();

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_directive(Directive::new("goal", "first")).await })
    };
    let old = wait_for(&scheduler, "first run", |s| s.status == PipelineStatus::Executing).await;
    assert!(scheduler.cancel());
    first.await.unwrap();

    let mut events = scheduler.subscribe();
    let second = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_directive(Directive::new("goal", "second")).await })
    };
    let current = wait_for(&scheduler, "second run", |s| {
        s.status == PipelineStatus::Executing && s.generation > old.generation
    })
    .await;

    let stale_id = CommandId::new(old.generation, 0);
    assert!(handle.deliver(CommandResolution::failure(old.generation, stale_id.clone(), "late")));

    let dropped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(PipelineEvent::StaleResultDropped { command_id, current_generation, .. }) =
                events.recv().await
            {
                return (command_id, current_generation);
            }
        }
    })
    .await
    .expect("stale result should be reported");
    assert_eq!(dropped, (stale_id, current.generation));

    let untouched = scheduler.snapshot();
    assert_eq!(untouched.status, PipelineStatus::Executing);
    assert!(untouched.last_error.is_none());
    assert_eq!(untouched.current_stage_commands[0].resolution, Resolution::Pending);

    // the abandoned fetch from the first run is queued ahead of the new one
    executor.release(2);
    let snapshot = second.await.unwrap();
    assert_eq!(snapshot.status, PipelineStatus::Completed);
    assert_eq!(snapshot.generation, current.generation);
    assert!(snapshot.last_error.is_none());
    assert_eq!(
        snapshot.resolved_commands[0].command_id,
        CommandId::new(current.generation, 0)
    );
}

#[tokio::test]
async fn test_new_directive_supersedes_the_run_in_flight() {
    let executor = Arc::new(GatedExecutor::new(EchoExecutor::new()).gate("fetch"));
    let scheduler = scheduler_with(
        StaticPlanCompiler::new()
            .with_type_plan("goal", slow_fetch_plan())
            .with_type_plan("query", reply_plan()),
        executor.clone(),
    );

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_directive(Directive::new("goal", "read")).await })
    };
    let old = wait_for(&scheduler, "first run", |s| s.status == PipelineStatus::Executing).await;

    let replaced = scheduler.run_directive(Directive::new("query", "answer now")).await;
    assert_eq!(replaced.status, PipelineStatus::Completed);
    // one bump to abandon the old run, one for the new directive
    assert_eq!(replaced.generation, old.generation + 2);
    assert_eq!(replaced.active_directive.as_ref().unwrap().content, "answer now");

    tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("superseded driver should return")
        .unwrap();

    executor.release(1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.snapshot(), replaced);
}

#[tokio::test]
async fn test_duplicate_resolution_is_ignored() {
    let plan = Plan::new("research")
        .with_step(
            Step::new("Fetch", "fetch").with_params(json!({ "source": "https://example.org/slow" })),
        )
        .with_step(Step::new("Search", "search").with_params(json!({ "query": "rust" })));
    let executor = Arc::new(GatedExecutor::new(EchoExecutor::new()).gate("fetch"));
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("goal", plan),
        executor.clone(),
    );
    let handle = scheduler.resolution_handle();

    let run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_directive(Directive::new("goal", "research")).await })
    };
    let partial = wait_for(&scheduler, "search to resolve", |s| {
        s.current_stage_commands
            .get(1)
            .map_or(false, |slot| !slot.resolution.is_pending())
    })
    .await;
    let generation = partial.generation;

    handle.deliver(CommandResolution::failure(
        generation,
        CommandId::new(generation, 1),
        "second opinion",
    ));
    handle.deliver(CommandResolution::success(
        generation,
        CommandId::new(generation, 0),
        json!({ "body": "delivered out of band" }),
    ));

    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.status, PipelineStatus::Completed);
    assert_eq!(
        snapshot.resolved_commands[0].resolution,
        Resolution::Succeeded(json!({ "body": "delivered out of band" }))
    );
    assert!(matches!(
        snapshot.resolved_commands[1].resolution,
        Resolution::Succeeded(_)
    ));
    executor.release(1);
}

#[tokio::test]
async fn test_reset_after_failure_allows_a_fresh_run() {
    let scheduler = scheduler_with(
        StaticPlanCompiler::new().with_type_plan("query", reply_plan()),
        Arc::new(EchoExecutor::new().failing("respond")),
    );

    let failed = scheduler.run_directive(Directive::new("query", "hello")).await;
    assert_eq!(failed.status, PipelineStatus::Failed);

    scheduler.reset();
    let reset = scheduler.snapshot();
    assert_eq!(reset.status, PipelineStatus::Idle);
    assert!(reset.last_error.is_none());
    assert_eq!(reset.generation, failed.generation + 1);
}
