//! Awaits, operator pause/resume, deadlines, cancellation, and signal
//! delivery errors — the interrupt protocol end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axon::types::{AwaitRequest, CompletionStatus, RunPolicy, ToolCall};
use axon::{
    AgentRegistration, ClarificationAnswer, ExternalToolResults, LocalEngine, Message, PlanResult,
    ProvidedToolResult, RunSubmission, Runtime, RuntimeError,
};
use serde_json::json;

use common::{
    assert_pause_resume_balanced, pause_resume_markers, toolset, Collector, ScriptedPlanner,
    StaticTool,
};

fn runtime() -> (Runtime, Arc<Collector>) {
    let runtime = Runtime::new(Arc::new(LocalEngine::new()));
    let collector = Collector::new();
    let _sub = runtime.bus().register(collector.clone());
    (runtime, collector)
}

#[tokio::test]
async fn clarification_answer_resumes_the_run() {
    let (runtime, collector) = runtime();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::awaiting(AwaitRequest::Clarification {
            id: "c1".into(),
            question: "which one?".into(),
        }),
        PlanResult::final_text("the second one, then"),
    ]);
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner.clone()))
        .unwrap();

    let handle = runtime
        .start_run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("pick")])
                .with_run_id("r-clar"),
        )
        .await
        .unwrap();

    // Give the run a moment to reach the await, then answer.
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime
        .provide_clarification(
            &"r-clar".into(),
            ClarificationAnswer {
                id: Some("c1".into()),
                answer: "the second one".into(),
            },
        )
        .await
        .unwrap();

    let output = handle.wait().await.unwrap();
    assert_eq!(output.status, CompletionStatus::Success);
    // The resume bumps the attempt counter for the next plan turn.
    assert_eq!(planner.attempts_seen.lock().unwrap().as_slice(), &[1, 2]);

    let events = collector.events_for(&"r-clar".into());
    assert_eq!(
        pause_resume_markers(&events),
        vec!["pause:await_clarification", "resume:clarification"]
    );
    assert_pause_resume_balanced(&events);
}

#[tokio::test]
async fn clarification_timeout_finalizes_with_balanced_pauses() {
    let (runtime, collector) = runtime();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::awaiting(AwaitRequest::Clarification {
            id: "c1".into(),
            question: "which?".into(),
        }),
        PlanResult::final_text("went with the default"),
    ]);
    let policy = RunPolicy {
        run_time_budget: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner.clone()).with_policy(policy))
        .unwrap();

    let output = runtime
        .run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("pick")])
                .with_run_id("r-deadline"),
        )
        .await
        .unwrap();

    assert_eq!(output.status, CompletionStatus::Success);
    assert_eq!(
        planner.finalize_seen.lock().unwrap().as_slice(),
        &[axon::types::FinalizeReason::TimeBudget]
    );

    let events = collector.events_for(&"r-deadline".into());
    assert_eq!(
        pause_resume_markers(&events),
        vec![
            "pause:await_clarification",
            "resume:clarification_timeout",
            "pause:finalize",
            "resume:finalize",
        ]
    );
    assert_pause_resume_balanced(&events);
    let last = serde_json::to_value(events.last().unwrap()).unwrap();
    assert_eq!(last["type"], "run_completed");
}

#[tokio::test]
async fn operator_pause_then_deadline() {
    let (runtime, collector) = runtime();
    let tool = StaticTool::slow(json!({"ok": true}), Duration::from_millis(50));
    runtime
        .register_toolset(toolset("helpers", "work", tool))
        .unwrap();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::calls(vec![ToolCall {
            id: "t1".into(),
            name: "helpers.work".into(),
            payload: json!({}),
        }]),
        // Never reached before the pause drains; the finalize turn answers.
        PlanResult::final_text("wrapped up"),
    ]);
    let policy = RunPolicy {
        run_time_budget: Some(Duration::from_millis(400)),
        ..Default::default()
    };
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner).with_policy(policy))
        .unwrap();

    let handle = runtime
        .start_run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("work")])
                .with_run_id("r-pause"),
        )
        .await
        .unwrap();

    // Pause lands while the tool batch is in flight; the loop drains it at
    // its next safe point and blocks on resume until the budget elapses.
    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime
        .pause_run(&"r-pause".into(), Some("human".into()))
        .await
        .unwrap();

    let output = handle.wait().await.unwrap();
    assert_eq!(output.status, CompletionStatus::Success);

    let events = collector.events_for(&"r-pause".into());
    let markers = pause_resume_markers(&events);
    assert_eq!(markers[0], "pause:human");
    assert_eq!(markers[1], "resume:deadline_exceeded");
    assert_pause_resume_balanced(&events);
    let finalizing = events.iter().any(|e| {
        serde_json::to_value(e).unwrap()["phase"] == "finalizing"
    });
    assert!(finalizing);
}

#[tokio::test]
async fn operator_resume_continues_the_run() {
    let (runtime, collector) = runtime();
    let tool = StaticTool::slow(json!({"ok": true}), Duration::from_millis(50));
    runtime
        .register_toolset(toolset("helpers", "work", tool))
        .unwrap();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::calls(vec![ToolCall {
            id: "t1".into(),
            name: "helpers.work".into(),
            payload: json!({}),
        }]),
        PlanResult::final_text("done"),
    ]);
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner.clone()))
        .unwrap();

    let handle = runtime
        .start_run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("work")])
                .with_run_id("r-resume"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime.pause_run(&"r-resume".into(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.resume_run(&"r-resume".into(), None).await.unwrap();

    let output = handle.wait().await.unwrap();
    assert_eq!(output.status, CompletionStatus::Success);
    assert_eq!(planner.attempts_seen.lock().unwrap().as_slice(), &[1, 2]);
    assert_eq!(
        pause_resume_markers(&collector.events_for(&"r-resume".into())),
        vec!["pause:human", "resume:operator"]
    );
}

#[tokio::test]
async fn external_tool_results_flow_back_to_the_planner() {
    let (runtime, collector) = runtime();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::awaiting(AwaitRequest::ExternalTools {
            calls: vec![ToolCall {
                id: "x1".into(),
                name: "client.lookup".into(),
                payload: json!({"q": "weather"}),
            }],
        }),
        PlanResult::final_text("sunny, apparently"),
    ]);
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner))
        .unwrap();

    let handle = runtime
        .start_run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("weather?")])
                .with_run_id("r-ext"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime
        .provide_tool_results(
            &"r-ext".into(),
            ExternalToolResults {
                results: vec![ProvidedToolResult {
                    call_id: "x1".into(),
                    content: json!({"forecast": "sunny"}),
                    is_error: false,
                }],
            },
        )
        .await
        .unwrap();

    let output = handle.wait().await.unwrap();
    assert_eq!(output.status, CompletionStatus::Success);
    assert_eq!(output.tool_events.len(), 1);
    assert!(!output.tool_events[0].is_error());

    let events = collector.events_for(&"r-ext".into());
    assert_eq!(
        pause_resume_markers(&events),
        vec!["pause:await_external_tools", "resume:tool_results"]
    );
}

#[tokio::test]
async fn cancel_balances_pause_and_reports_canceled() {
    let (runtime, collector) = runtime();
    let planner = ScriptedPlanner::new(vec![PlanResult::awaiting(AwaitRequest::Clarification {
        id: "c1".into(),
        question: "which?".into(),
    })]);
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner))
        .unwrap();

    let handle = runtime
        .start_run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("pick")])
                .with_run_id("r-cancel"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.cancel_run(&"r-cancel".into()).await.unwrap();

    let output = handle.wait().await.unwrap();
    assert_eq!(output.status, CompletionStatus::Canceled);
    assert!(output.public_error.is_none());

    let events = collector.events_for(&"r-cancel".into());
    assert_eq!(
        pause_resume_markers(&events),
        vec!["pause:await_clarification", "resume:canceled"]
    );
    let last = serde_json::to_value(events.last().unwrap()).unwrap();
    assert_eq!(last["type"], "run_completed");
    assert_eq!(last["status"], "canceled");
}

#[tokio::test]
async fn signals_to_finished_and_unknown_runs_are_typed() {
    let (runtime, _collector) = runtime();
    let planner = ScriptedPlanner::new(vec![PlanResult::final_text("done")]);
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner))
        .unwrap();

    runtime
        .run(RunSubmission::new("svc.chat", "s1", vec![Message::user("hi")]).with_run_id("r-done"))
        .await
        .unwrap();

    let err = runtime
        .provide_clarification(&"r-done".into(), ClarificationAnswer::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::NotAwaitable {
            kind: axon::runtime::NotAwaitableKind::CompletedRun,
            ..
        }
    ));

    let err = runtime
        .resume_run(&"r-ghost".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::NotAwaitable {
            kind: axon::runtime::NotAwaitableKind::UnknownRun,
            ..
        }
    ));
}

#[tokio::test]
async fn interrupts_disallowed_downgrades_awaits() {
    let (runtime, collector) = runtime();
    let planner = ScriptedPlanner::new(vec![
        PlanResult::awaiting(AwaitRequest::Clarification {
            id: "c1".into(),
            question: "which?".into(),
        }),
        PlanResult::final_text("picked for you"),
    ]);
    let policy = RunPolicy {
        interrupts_allowed: false,
        ..Default::default()
    };
    runtime
        .register_agent(AgentRegistration::new("svc.chat", planner.clone()).with_policy(policy))
        .unwrap();

    let output = runtime
        .run(
            RunSubmission::new("svc.chat", "s1", vec![Message::user("pick")])
                .with_run_id("r-noint"),
        )
        .await
        .unwrap();

    // The run never paused; the planner got a hint and answered directly.
    assert_eq!(output.status, CompletionStatus::Success);
    assert!(pause_resume_markers(&collector.events_for(&"r-noint".into())).is_empty());
    assert_eq!(planner.hints_seen.lock().unwrap().len(), 1);
}
