//! Bundled demo workflow.
//!
//! A small content pipeline built only from closures, so it runs offline:
//! research, then outline and keywords in parallel, an optional review loop,
//! and finally a router picking the publishing channel.

use std::io::{self, Write};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::{WorkflowEvent, WorkflowEventKind};
use cadence_core::traits::{Executor, ExecutorContext, StreamItem};
use cadence_core::types::{Content, ExecutorKind, StepInput, StepOutput, WorkflowRun};
use cadence_engine::{Condition, FnExecutor, Loop, Node, Parallel, Router, Step, Steps, Workflow};

/// Messages longer than this many words go through the review loop.
const REVIEW_THRESHOLD_WORDS: usize = 4;

pub fn build() -> Workflow {
    let research = Step::new(
        "research",
        FnExecutor::new("researcher", |input: StepInput, ctx: ExecutorContext| async move {
            let topic = input.message_as_text().unwrap_or_else(|| "nothing".into());
            // Pretend to do some work
            tokio::time::sleep(Duration::from_millis(50)).await;
            let notes = format!("Notes on {}", topic);
            ctx.session_state.set("topic", json!(topic));
            Ok(StepOutput::content(notes).with_metrics(json!({ "sources": 3 })))
        })
        .with_kind(ExecutorKind::Agent),
    )
    .with_description("Collect notes on the topic");

    let outline = Step::from_fn("outline", |input| {
        let notes = text_of(input.previous_step_content.as_ref());
        Ok(StepOutput::content(format!(
            "1. Introduction\n2. {}\n3. Conclusion",
            notes
        )))
    });

    let keywords = Step::from_fn("keywords", |input| {
        let words: Vec<_> = input
            .message_as_text()
            .unwrap_or_default()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| json!(w.to_lowercase()))
            .collect();
        Ok(StepOutput::content(Content::List(words)))
    });

    let drafts = Parallel::new("drafts", vec![outline.into(), keywords.into()])
        .with_description("Outline and keywords side by side");

    let revise = Step::from_fn("revise", |input| {
        let draft = input
            .get_step_content("revise")
            .or_else(|| {
                input
                    .get_step_output("drafts")
                    .and_then(|d| d.parallel_step_outputs.as_ref())
                    .and_then(|children| children.get("outline"))
                    .and_then(|o| o.content.clone())
            })
            .map(|c| c.to_text_lossy())
            .unwrap_or_default();
        Ok(StepOutput::content(format!("{} (revised)", draft)))
    });

    let polish = Loop::new("polish", vec![revise.into()])
        .with_max_iterations(3)
        .with_end_condition(|outputs: &[StepOutput]| {
            let revisions = outputs
                .last()
                .and_then(|o| o.content.as_ref())
                .map(|c| c.to_text_lossy().matches("(revised)").count())
                .unwrap_or(0);
            Ok(revisions >= 2)
        });

    let review = Condition::new(
        "review",
        |input: &StepInput| {
            let words = input
                .message_as_text()
                .map(|m| m.split_whitespace().count())
                .unwrap_or(0);
            Ok(words > REVIEW_THRESHOLD_WORDS)
        },
        vec![polish.into()],
    )
    .with_description("Only long briefs get polished");

    let blog = Step::new("blog", BlogWriter);
    let newsletter = Steps::new(
        "newsletter",
        vec![
            Step::from_fn("summarize", |input| {
                let body = text_of(input.previous_step_content.as_ref());
                Ok(StepOutput::content(format!("This week: {}", body)))
            })
            .into(),
            Step::from_fn("sign_off", |input| {
                let body = text_of(input.previous_step_content.as_ref());
                Ok(StepOutput::content(format!("{}\n\n-- The editors", body)))
            })
            .into(),
        ],
    );

    let publish = Router::new(
        "publish",
        |input: &StepInput| {
            let channel = input
                .additional_data
                .get("channel")
                .and_then(|v| v.as_str())
                .unwrap_or("blog");
            Ok(channel.to_string())
        },
        vec![blog.into(), Node::from(newsletter)],
    );

    Workflow::new(
        "content-pipeline",
        vec![
            research.into(),
            drafts.into(),
            review.into(),
            publish.into(),
        ],
    )
    .with_workflow_id("demo-content-pipeline")
    .with_description("Research a topic and publish it")
}

/// Streams its post one line at a time.
#[derive(Debug)]
struct BlogWriter;

impl BlogWriter {
    fn lines(input: &StepInput) -> Vec<String> {
        let body = input.get_all_previous_content();
        std::iter::once("# Blog post\n".to_string())
            .chain(body.lines().map(|l| format!("\n{}", l)))
            .collect()
    }
}

impl Executor for BlogWriter {
    fn name(&self) -> &str {
        "blog-writer"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Agent
    }

    fn execute(&self, input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        let post = Self::lines(&input).concat();
        Box::pin(async move { Ok(StepOutput::content(post)) })
    }

    fn execute_stream(
        &self,
        input: StepInput,
        _ctx: ExecutorContext,
    ) -> BoxStream<'_, Result<StreamItem>> {
        let lines = Self::lines(&input);
        let post = lines.concat();
        let partials = futures::stream::iter(lines).then(|line| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, CadenceError>(StreamItem::Partial(StepOutput::content(line)))
        });
        let last = futures::stream::once(async move {
            Ok::<_, CadenceError>(StreamItem::Final(StepOutput::content(post)))
        });
        Box::pin(partials.chain(last))
    }
}

fn text_of(content: Option<&Content>) -> String {
    content.map(Content::to_text_lossy).unwrap_or_default()
}

/// Stream one run of `workflow` to the terminal and return its record.
///
/// Ctrl-C cancels the run; the cancellation is still reported.
pub async fn stream_to_terminal(
    workflow: &Workflow,
    input: cadence_core::types::WorkflowExecutionInput,
) -> Result<WorkflowRun> {
    let mut stream = workflow.run_stream(input);
    eprintln!("[run {}]", stream.run_id());

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[cancelling]");
                stream.cancel();
            }
        }
    }

    stream.finish().await
}

fn print_event(event: &WorkflowEvent) {
    match &event.kind {
        WorkflowEventKind::RunStarted { workflow_name } => {
            eprintln!("[workflow: {}]", workflow_name);
        }
        WorkflowEventKind::StepStarted { step_name, kind } => {
            eprintln!("[{} {}: started]", kind.as_str(), step_name);
        }
        WorkflowEventKind::StepContentDelta { delta, .. } => {
            print!("{}", delta.to_text_lossy());
            io::stdout().flush().ok();
        }
        WorkflowEventKind::StepCompleted {
            step_name,
            success,
            error,
            ..
        } => {
            if *success {
                eprintln!("[{}: ok]", step_name);
            } else {
                eprintln!(
                    "[{}: ERROR] {}",
                    step_name,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        WorkflowEventKind::LoopIterationStarted {
            step_name,
            iteration,
            max_iterations,
        } => {
            eprintln!("[{}: iteration {}/{}]", step_name, iteration, max_iterations);
        }
        WorkflowEventKind::LoopIterationCompleted {
            step_name,
            iteration,
            should_continue,
        } => {
            if !should_continue {
                eprintln!("[{}: done after {} iterations]", step_name, iteration);
            }
        }
        WorkflowEventKind::ParallelStarted {
            step_name,
            children,
        } => {
            eprintln!("[{}: running {}]", step_name, children.join(", "));
        }
        WorkflowEventKind::ParallelCompleted { .. } => {}
        WorkflowEventKind::ConditionEvaluated { step_name, result } => {
            eprintln!("[{}: {}]", step_name, result);
        }
        WorkflowEventKind::RouterSelected {
            step_name,
            selected,
        } => {
            eprintln!("[{} -> {}]", step_name, selected);
        }
        WorkflowEventKind::RunCompleted { content, .. } => {
            if let Some(content) = content {
                println!("\n{}", content.to_text_lossy());
            }
        }
        WorkflowEventKind::RunCancelled => eprintln!("[run cancelled]"),
        WorkflowEventKind::RunError { step_name, message } => match step_name {
            Some(step) => eprintln!("[run failed at {}] {}", step, message),
            None => eprintln!("[run failed] {}", message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{RunStatus, WorkflowExecutionInput};

    #[tokio::test]
    async fn test_short_brief_skips_review_and_blogs() {
        let run = build().run("rust async").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let text = run.content.unwrap().to_text_lossy();
        assert!(text.starts_with("# Blog post"));
        assert!(text.contains("Notes on rust async"));

        let review = run
            .step_responses
            .iter()
            .find(|o| o.step_name == "review")
            .unwrap();
        assert_eq!(review.executor_type, ExecutorKind::Condition);
        assert_eq!(run.metrics.total_steps, 4);
    }

    #[tokio::test]
    async fn test_long_brief_polishes_and_routes_to_newsletter() {
        let input = WorkflowExecutionInput::new("a much longer brief about workflow engines")
            .with_data("channel", json!("newsletter"));
        let run = build().run(input).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let text = run.content.unwrap().to_text_lossy();
        assert!(text.starts_with("This week:"));
        assert!(text.ends_with("-- The editors"));
        assert!(text.contains("(revised) (revised)"));
    }

    #[tokio::test]
    async fn test_streamed_post_matches_final_content() {
        let mut stream = build().run_stream("rust async");
        let mut streamed = String::new();
        while let Some(event) = stream.next().await {
            if let WorkflowEventKind::StepContentDelta { step_name, delta } = event.kind {
                assert_eq!(step_name, "blog");
                streamed.push_str(&delta.to_text_lossy());
            }
        }
        let run = stream.finish().await.unwrap();
        assert_eq!(run.content.unwrap().to_text_lossy(), streamed);
    }

    #[tokio::test]
    async fn test_unknown_channel_fails_the_run() {
        let input = WorkflowExecutionInput::new("brief").with_data("channel", json!("fax"));
        let run = build().run(input).await.unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.failure.unwrap().step_name, "publish");
    }
}
