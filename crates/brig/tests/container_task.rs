//! End-to-end container task runs against scripted doubles.

use brig::Turn;
use brig::api::{GenerateConfig, GenerateFuture, Generator};
use brig::container::ExecOutput;
use brig::context::{ContextLimits, WRAP_CONTEXT};
use brig::error::TaskError;
use brig::interact::{EventBus, EventObserver, TaskEvent};
use brig::secrets::{REDACTED, SecretRegistry};
use brig::signal::RunSignals;
use brig::task::{
    ContainerTaskOrchestrator, PROPOSE_CONTAINER_TASK, TaskConfig, TaskOutcome, TaskReport,
    TaskStatus,
};
use brig::testing::{FakeEngine, ScriptedGenerator, ScriptedInteraction};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

fn propose() -> ScriptedGenerator {
    ScriptedGenerator::new().then_call(
        PROPOSE_CONTAINER_TASK,
        json!({"image": "alpine:latest", "taskDescription": "print hello"}),
    )
}

fn stdout(text: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

/// An event bus that records every delivered event as text.
fn recording_bus() -> (EventBus, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = EventObserver::new(move |event: &TaskEvent<'_>| {
        sink.lock().unwrap().push(format!("{event:?}"));
    });
    (EventBus::new(Arc::new(observer), SecretRegistry::new()), seen)
}

async fn run_task(
    generator: ScriptedGenerator,
    engine: &FakeEngine,
    interaction: ScriptedInteraction,
    config: TaskConfig,
    events: EventBus,
) -> TaskReport {
    let orchestrator = ContainerTaskOrchestrator::new(
        Arc::new(generator),
        Arc::new(engine.clone()),
        Arc::new(interaction),
        events,
    )
    .with_config(config);
    let outcome = orchestrator
        .run(&[Turn::user("print hello in a container")], &RunSignals::new())
        .await
        .unwrap();
    match outcome {
        TaskOutcome::Finished(report) => report,
        TaskOutcome::Declined { .. } => panic!("task was declined"),
    }
}

fn responses(report: &TaskReport) -> Vec<String> {
    report
        .transcript
        .iter()
        .flat_map(|t| t.responses.iter().map(|r| r.content.clone()))
        .collect()
}

#[tokio::test]
async fn echo_then_complete_succeeds() {
    let generator = propose()
        .then_call("runCommand", json!({"command": "echo \"hello world\""}))
        .then_call("completeTask", json!({"summary": "printed hello"}));
    let engine = FakeEngine::new().on_exec("echo", stdout("hello world\n"));

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Success);
    assert_eq!(report.summary, "printed hello");
    assert_eq!(report.commands_executed, 2);
    assert!(responses(&report).iter().any(|r| r.contains("hello world")));
    assert_eq!(engine.exec_scripts(), vec!["echo \"hello world\""]);
    assert_eq!(engine.pulls(), 1);
    assert_eq!(engine.creates(), 1);
    assert_eq!(engine.stops(), 1);
    assert_eq!(engine.removes(), 1);
}

#[tokio::test]
async fn fail_task_first_never_runs_a_command() {
    let generator = propose().then_call("failTask", json!({"reason": "cannot proceed"}));
    let engine = FakeEngine::new();

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.summary, "cannot proceed");
    assert!(engine.exec_scripts().is_empty());
    assert_eq!(engine.stops(), 1);
}

#[tokio::test]
async fn pull_failure_skips_create() {
    let engine = FakeEngine::new().failing_pull("network unreachable");

    let report = run_task(
        propose(),
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.summary.contains("Image pull failed"));
    assert!(report.summary.contains("network unreachable"));
    assert_eq!(engine.creates(), 0);
    assert_eq!(engine.stops(), 0);
}

#[tokio::test]
async fn edit_with_both_modes_writes_nothing() {
    let generator = propose()
        .then_call(
            "editFile",
            json!({
                "path": "notes.txt",
                "newContent": "replacement\n",
                "patch": "@@ -1 +1 @@\n-a\n+b\n"
            }),
        )
        .then_call("completeTask", json!({"summary": "gave up on the edit"}));
    let engine = FakeEngine::new();

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Success);
    let edit_reply = &responses(&report)[0];
    assert!(edit_reply.starts_with("Error:"), "{edit_reply}");
    assert!(engine.uploads().is_empty());
}

#[tokio::test]
async fn exec_panic_still_cleans_up_once() {
    let generator = propose().then_call("runCommand", json!({"command": "make"}));
    let engine = FakeEngine::new().panicking_exec();

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.summary.contains("exec exploded"));
    assert_eq!(engine.stops(), 1);
    assert_eq!(engine.removes(), 1);
}

#[tokio::test]
async fn command_cap_fails_and_cleans_up() {
    let generator = propose()
        .then_call("runCommand", json!({"command": "true"}))
        .then_call("runCommand", json!({"command": "true"}))
        .then_call("runCommand", json!({"command": "true"}));
    let engine = FakeEngine::new();

    let report = run_task(
        generator.clone(),
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default().with_max_commands(2),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.summary.contains("maximum of 2 commands"));
    assert_eq!(report.commands_executed, 2);
    assert_eq!(engine.exec_scripts().len(), 2);
    assert_eq!(generator.remaining(), 1);
    assert_eq!(engine.stops(), 1);
}

#[tokio::test]
async fn secrets_never_leave_the_container() {
    let secret = "tok-4f9c2a7e";
    let generator = propose()
        .then_call(
            "requestSecret",
            json!({"prompt": "registry token", "containerPath": ".token"}),
        )
        .then_call("runCommand", json!({"command": "cat .token"}))
        .then_call("completeTask", json!({"summary": format!("logged in with {secret}")}));
    let engine = FakeEngine::new().on_exec("cat", stdout(secret));
    let interaction = ScriptedInteraction::new().with_secret(Some(secret));
    let (events, seen) = recording_bus();

    let report = run_task(generator, &engine, interaction, TaskConfig::default(), events).await;

    assert_eq!(report.status, TaskStatus::Success);
    let transcript = serde_json::to_string(&report.transcript).unwrap();
    assert!(!transcript.contains(secret));
    assert!(transcript.contains(REDACTED));
    assert!(!report.summary.contains(secret));

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|e| !e.contains(secret)), "{seen:?}");

    // The secret itself is written into the container, owner-only.
    let uploads = engine.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "/workspace");
}

/// An archive with one entry whose name is taken verbatim.
fn archive_with_entry(name: &str, body: &[u8]) -> Vec<u8> {
    let mut header = Header::new_gnu();
    header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_entry_type(EntryType::Regular);
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    let mut builder = Builder::new(Vec::new());
    builder.append(&header, body).unwrap();
    builder.into_inner().unwrap()
}

#[tokio::test]
async fn escaping_archive_entry_is_rejected() {
    let host = TempDir::new().unwrap();
    let generator = propose()
        .then_call(
            "copyFromContainer",
            json!({"containerPath": "dist", "hostPath": "out"}),
        )
        .then_call("completeTask", json!({"summary": "done"}));
    let engine = FakeEngine::new().with_download(archive_with_entry("../../evil", b"pwned"));

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default().with_host_root(host.path()),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Success);
    let reply = &responses(&report)[0];
    assert!(reply.starts_with("Error:"), "{reply}");
    assert!(reply.contains("../../evil"), "{reply}");
    assert!(!host.path().join("evil").exists());
    assert!(!host.path().join("out").join("evil").exists());
}

#[tokio::test]
async fn repeated_wraps_stay_bounded() {
    let mut generator = propose();
    for i in 0..6 {
        generator = generator.then_call("runCommand", json!({"command": format!("step {i}")}));
    }
    let generator = generator
        .then_call(WRAP_CONTEXT, json!({"summary": "ran six steps"}))
        .then_call(WRAP_CONTEXT, json!({"summary": "still six steps"}))
        .then_call("completeTask", json!({"summary": "wrapped twice"}));
    let engine = FakeEngine::new().with_exec_output(stdout("ok"));

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Success);
    // Pinned prompt, two wrap pairs, the completeTask pair.
    assert_eq!(report.transcript.len(), 7);
    let replies = responses(&report);
    let last_wrap = &replies[replies.len() - 2];
    assert!(last_wrap.contains("Context is within limits"), "{last_wrap}");
}

#[tokio::test]
async fn breach_forces_wrap_before_anything_else() {
    let generator = propose()
        .then_call("runCommand", json!({"command": "cat big.log"}))
        .then_call(WRAP_CONTEXT, json!({"summary": "read the log"}))
        .then_call("completeTask", json!({"summary": "done"}));
    let engine = FakeEngine::new().with_exec_output(stdout(&"x".repeat(2000)));
    let config =
        TaskConfig::default().with_limits(ContextLimits::default().with_max_tokens(300));

    let report = run_task(
        generator.clone(),
        &engine,
        ScriptedInteraction::new(),
        config,
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Success);
    let requests = generator.requests();
    // Proposal, runCommand turn, forced wrap turn, completion turn.
    assert_eq!(requests.len(), 4);
    assert!(requests[1].config.required_name.is_none());
    assert_eq!(requests[2].config.required_name.as_deref(), Some(WRAP_CONTEXT));
    assert!(requests[3].config.required_name.is_none());
}

#[tokio::test]
async fn aborted_report_counts_commands_that_ran() {
    let generator = propose()
        .then_call("runCommand", json!({"command": "ls"}))
        .then_call("runCommand", json!({"command": "pwd"}))
        .then_error("model overloaded");
    let engine = FakeEngine::new();

    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.summary.contains("model overloaded"));
    assert_eq!(report.commands_executed, 2);

    let generator = propose()
        .then_call("runCommand", json!({"command": "ls"}))
        .then_panic("tokenizer blew up");
    let engine = FakeEngine::new();
    let report = run_task(
        generator,
        &engine,
        ScriptedInteraction::new(),
        TaskConfig::default(),
        EventBus::noop(),
    )
    .await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.summary.contains("tokenizer blew up"));
    assert_eq!(report.commands_executed, 1);
    assert_eq!(engine.stops(), 1);
}

/// Cancels the run when asked for its `cancel_on`-th response (1-based).
struct CancelOnRequest {
    inner: ScriptedGenerator,
    signals: RunSignals,
    cancel_on: usize,
}

impl Generator for CancelOnRequest {
    fn generate<'a>(
        &'a self,
        transcript: &'a [Turn],
        config: &'a GenerateConfig,
    ) -> GenerateFuture<'a> {
        if self.inner.requests().len() + 1 == self.cancel_on {
            self.signals.cancel();
        }
        self.inner.generate(transcript, config)
    }
}

#[tokio::test]
async fn cancellation_mid_task_still_cleans_up_once() {
    let scripted = propose()
        .then_call("runCommand", json!({"command": "make build"}))
        .then_call("runCommand", json!({"command": "make test"}))
        .then_call("completeTask", json!({"summary": "never reached"}));
    let signals = RunSignals::new();
    let generator = CancelOnRequest {
        inner: scripted.clone(),
        signals: signals.clone(),
        cancel_on: 3,
    };
    let engine = FakeEngine::new();
    let orchestrator = ContainerTaskOrchestrator::new(
        Arc::new(generator),
        Arc::new(engine.clone()),
        Arc::new(ScriptedInteraction::new()),
        EventBus::noop(),
    );

    let result = orchestrator
        .run(&[Turn::user("build and test")], &signals)
        .await;

    assert!(matches!(result, Err(TaskError::Cancelled)));
    assert_eq!(engine.exec_scripts(), vec!["make build"]);
    assert_eq!(engine.stops(), 1);
    assert_eq!(engine.removes(), 1);
}
