use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use cadence_core::event::{EventBus, WorkflowEventKind};
use cadence_core::types::{Content, ExecutorKind, LoopState, RunStatus, StepInput, StepOutput};
use cadence_engine::{Condition, Loop, Parallel, Router, Step, Steps, Workflow};
use cadence_test_utils::{
    CountingExecutor, EchoExecutor, FailingExecutor, IncrementExecutor, SlowExecutor,
    StateWriterExecutor, StreamingExecutor,
};

#[tokio::test]
async fn test_failed_step_halts_group_and_run() {
    let step_b = CountingExecutor::new("b", "never");
    let calls_b = step_b.counter();
    let workflow = Workflow::new(
        "halting",
        vec![Steps::new(
            "group",
            vec![
                Step::from_fn("stepA", |_input| Ok(StepOutput::failure("stepA", "bad input"))).into(),
                Step::new("stepB", step_b).into(),
            ],
        )
        .into()],
    );

    let run = workflow.run("go").await.unwrap();

    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(calls_b.load(std::sync::atomic::Ordering::SeqCst), 0);
    let halted = &run.step_responses[0];
    assert_eq!(halted.step_name, "stepA");
    assert!(!halted.success);
    assert_eq!(halted.error.as_deref(), Some("bad input"));
    let failure = run.failure.unwrap();
    assert_eq!(failure.step_name, "stepA");
}

#[tokio::test]
async fn test_loop_converges_exactly_at_the_cap() {
    let workflow = Workflow::new(
        "counter",
        vec![Loop::new("count", vec![Step::new("increment", IncrementExecutor::new("inc")).into()])
            .with_max_iterations(3)
            .with_end_condition(|outputs: &[StepOutput]| {
                let last = outputs
                    .last()
                    .and_then(|o| o.content.as_ref())
                    .and_then(Content::as_f64)
                    .unwrap_or(0.0);
                Ok(last >= 3.0)
            })
            .into()],
    );

    let run = workflow.run(Content::Number(0.0)).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.content, Some(Content::Number(3.0)));
    let output = &run.step_responses[0];
    assert_eq!(output.step_name, "count");
    assert_eq!(output.executor_type, ExecutorKind::Loop);
    let termination = output.loop_termination.as_ref().unwrap();
    assert_eq!(termination.state, LoopState::Converged);
    assert_eq!(termination.iterations, 3);
}

#[tokio::test]
async fn test_parallel_reports_each_child() {
    let workflow = Workflow::new(
        "fan-out",
        vec![Parallel::new(
            "both",
            vec![
                Step::new("stepX", FailingExecutor::new("x", "x broke")).into(),
                Step::new("stepY", EchoExecutor::new("y")).into(),
            ],
        )
        .into()],
    );

    let run = workflow.run("payload").await.unwrap();

    let output = &run.step_responses[0];
    assert!(!output.success);
    let children = output.parallel_step_outputs.as_ref().unwrap();
    assert!(!children["stepX"].success);
    assert!(children["stepY"].success);
    assert_eq!(children["stepY"].content, Some(Content::from("payload")));
    assert!(output.error.as_deref().unwrap().contains("stepX"));

    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.failure.unwrap().step_name, "both");

    let metrics = &run.metrics.steps["both"];
    assert!(metrics.metrics.is_none());
    let nested = metrics.parallel_steps.as_ref().unwrap();
    assert!(nested.contains_key("stepX"));
    assert!(nested.contains_key("stepY"));
}

#[tokio::test]
async fn test_router_runs_only_the_selected_branch() {
    let branch_a = CountingExecutor::new("a", "from a");
    let branch_b = CountingExecutor::new("b", "from b");
    let (calls_a, calls_b) = (branch_a.counter(), branch_b.counter());

    let workflow = Workflow::new(
        "routing",
        vec![Router::new(
            "pick",
            |input: &StepInput| {
                let message = input.message_as_text().unwrap_or_default();
                Ok(if message == "a" { "branchA" } else { "branchB" })
            },
            vec![
                Step::new("branchA", branch_a).into(),
                Step::new("branchB", branch_b).into(),
            ],
        )
        .into()],
    );

    let run = workflow.run("a").await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(calls_a.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(std::sync::atomic::Ordering::SeqCst), 0);
    let output = &run.step_responses[0];
    assert_eq!(output.step_name, "branchA");
    assert_eq!(output.executor_name, "a");
    assert_eq!(output.content, Some(Content::from("from a")));
}

#[tokio::test]
async fn test_condition_false_skips_children() {
    let inner = CountingExecutor::new("inner", "ran");
    let calls = inner.counter();
    let workflow = Workflow::new(
        "guarded",
        vec![
            Condition::constant("never", false, vec![Step::new("inner", inner).into()]).into(),
            Step::new("echo", EchoExecutor::new("echo")).into(),
        ],
    );

    let run = workflow.run("unchanged").await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(run.content, Some(Content::from("unchanged")));
}

#[tokio::test]
async fn test_early_stop_completes_run() {
    let after = CountingExecutor::new("after", "late");
    let calls = after.counter();
    let workflow = Workflow::new(
        "stopping",
        vec![
            Step::from_fn("gate", |_input| Ok(StepOutput::content("enough").with_stop())).into(),
            Step::new("after", after).into(),
        ],
    );

    let run = workflow.run("go").await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.content, Some(Content::from("enough")));
    assert_eq!(run.step_responses.len(), 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_delivers_events_in_order() {
    let workflow = Workflow::new(
        "streaming",
        vec![
            Step::new("draft", StreamingExecutor::new("writer", &["Hello", ", ", "world"])).into(),
            Step::new("echo", EchoExecutor::new("echo")).into(),
        ],
    );

    let stream = workflow.run_stream("hi");
    let events: Vec<_> = stream.collect().await;

    assert!(matches!(events.first().unwrap().kind, WorkflowEventKind::RunStarted { .. }));
    assert!(matches!(
        events.last().unwrap().kind,
        WorkflowEventKind::RunCompleted { status: RunStatus::Completed, .. }
    ));
    assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);

    let deltas: String = events
        .iter()
        .filter_map(|e| match &e.kind {
            WorkflowEventKind::StepContentDelta { delta, .. } => Some(delta.to_text_lossy()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, "Hello, world");

    let position = |wanted: fn(&WorkflowEventKind) -> bool| {
        events.iter().position(|e| wanted(&e.kind)).unwrap()
    };
    let draft_started = position(|k| {
        matches!(k, WorkflowEventKind::StepStarted { step_name, .. } if step_name == "draft")
    });
    let first_delta = position(|k| matches!(k, WorkflowEventKind::StepContentDelta { .. }));
    let draft_done = position(|k| {
        matches!(k, WorkflowEventKind::StepCompleted { step_name, .. } if step_name == "draft")
    });
    let echo_started = position(|k| {
        matches!(k, WorkflowEventKind::StepStarted { step_name, .. } if step_name == "echo")
    });
    assert!(draft_started < first_delta);
    assert!(first_delta < draft_done);
    assert!(draft_done < echo_started);
}

#[tokio::test]
async fn test_cancelled_stream_reports_cancellation() {
    let workflow = Workflow::new(
        "slow",
        vec![
            Step::new("wait", SlowExecutor::new("sleeper", Duration::from_secs(30), "late")).into(),
            Step::new("after", EchoExecutor::new("after")).into(),
        ],
    );

    let mut stream = workflow.run_stream("go");
    while let Some(event) = stream.next().await {
        if matches!(event.kind, WorkflowEventKind::StepStarted { .. }) {
            stream.cancel();
            break;
        }
    }

    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event);
    }
    assert!(matches!(last.unwrap().kind, WorkflowEventKind::RunCancelled));

    let run = stream.finish().await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.content.is_none());
}

#[tokio::test]
async fn test_event_bus_sees_every_run() {
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let workflow = Workflow::new("observed", vec![Step::new("echo", EchoExecutor::new("e")).into()])
        .with_event_bus(bus.clone());

    let first = workflow.run("one").await.unwrap();
    let second = workflow.run("two").await.unwrap();

    let mut completed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.kind.is_terminal() {
            completed.push(event.run_id);
        }
    }
    assert_eq!(completed, vec![first.run_id, second.run_id]);
}

#[tokio::test]
async fn test_state_written_in_a_run_carries_to_the_next() {
    let workflow = Workflow::new(
        "stateful",
        vec![Step::new("remember", StateWriterExecutor::new("w", "seen", json!(true))).into()],
    );

    workflow.run("first").await.unwrap();
    assert_eq!(workflow.session_state().get("seen"), Some(json!(true)));

    let reader = Workflow::new(
        "reader",
        vec![Step::from_fn("read", |_input| Ok(StepOutput::content("unused"))).into()],
    );
    assert!(reader.session_state().get("seen").is_none());
}

fn lookup_report(input: &StepInput, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("{}={}", name, input.get_step_output(name).is_some()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn test_steps_see_only_earlier_outputs() {
    let workflow = Workflow::new(
        "lookups",
        vec![
            Step::from_fn("s1", |input| Ok(StepOutput::content(lookup_report(input, &["s3"])))).into(),
            Step::new("s2", EchoExecutor::new("echo")).into(),
            Step::from_fn("s3", |input| {
                let first = input
                    .get_step_content("s1")
                    .map(|c| c.to_text_lossy())
                    .unwrap_or_default();
                Ok(StepOutput::content(format!(
                    "{} first:{}",
                    lookup_report(input, &["s1", "s2"]),
                    first
                )))
            })
            .into(),
            Parallel::new(
                "fan",
                vec![
                    Step::from_fn("px", |input| {
                        Ok(StepOutput::content(lookup_report(input, &["s3", "py"])))
                    })
                    .into(),
                    Step::from_fn("py", |input| {
                        Ok(StepOutput::content(lookup_report(input, &["s3", "px"])))
                    })
                    .into(),
                ],
            )
            .into(),
        ],
    );

    let run = workflow.run("go").await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let content_of = |name: &str| {
        run.step_responses
            .iter()
            .find(|o| o.step_name == name)
            .and_then(|o| o.content.as_ref())
            .map(Content::to_text_lossy)
            .unwrap()
    };
    assert_eq!(content_of("s1"), "s3=false");
    assert_eq!(content_of("s3"), "s1=true s2=true first:s3=false");

    let fan = run.step_responses.iter().find(|o| o.step_name == "fan").unwrap();
    let children = fan.parallel_step_outputs.as_ref().unwrap();
    let child = |name: &str| children[name].content.as_ref().map(Content::to_text_lossy).unwrap();
    assert_eq!(child("px"), "s3=true py=false");
    assert_eq!(child("py"), "s3=true px=false");
}
