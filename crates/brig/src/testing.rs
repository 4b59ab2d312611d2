//! Scripted doubles for driving the loops without a model, a container
//! engine or a person.
//!
//! - [`ScriptedGenerator`] replays queued responses and records each request.
//! - [`FakeEngine`] records every engine call and answers from canned data.
//! - [`ScriptedInteraction`] answers prompts from queues.

use crate::api::{GenerateConfig, GenerateFuture, Generator, Part};
use crate::commands::CommandContext;
use crate::container::archive::pack_file;
use crate::container::{
    AllowedImage, ContainerEngine, ContainerSession, ContainerSpec, EngineFuture, ExecOutput,
    ExecRequest, SessionStatus, split_container_path,
};
use crate::error::TaskError;
use crate::interact::{ConfirmRequest, Confirmation, EventBus, InteractFuture, Interaction};
use crate::{Call, Turn, generate_call_id};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Generator ──────────────────────────────────────────────────────

enum Scripted {
    Parts(Vec<Part>),
    Error(String),
    Panic(String),
}

/// One recorded generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub transcript: Vec<Turn>,
    pub config: GenerateConfig,
}

/// Replays queued responses in order. An exhausted script yields no parts.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<GenerateRequest>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single call.
    pub fn then_call(self, name: &str, args: serde_json::Value) -> Self {
        let call = Call::new(generate_call_id("scripted"), name, args);
        self.then_parts(vec![Part::Call(call)])
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then_parts(vec![Part::Text(text.to_string())])
    }

    pub fn then_parts(self, parts: Vec<Part>) -> Self {
        locked(&self.script).push_back(Scripted::Parts(parts));
        self
    }

    pub fn then_error(self, message: &str) -> Self {
        locked(&self.script).push_back(Scripted::Error(message.to_string()));
        self
    }

    /// Queue a response that panics while being generated.
    pub fn then_panic(self, message: &str) -> Self {
        locked(&self.script).push_back(Scripted::Panic(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        locked(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        locked(&self.script).len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate<'a>(
        &'a self,
        transcript: &'a [Turn],
        config: &'a GenerateConfig,
    ) -> GenerateFuture<'a> {
        Box::pin(async move {
            locked(&self.requests).push(GenerateRequest {
                transcript: transcript.to_vec(),
                config: config.clone(),
            });
            let next = locked(&self.script).pop_front();
            match next {
                Some(Scripted::Parts(parts)) => Ok(parts),
                Some(Scripted::Error(e)) => Err(e),
                Some(Scripted::Panic(msg)) => panic!("{msg}"),
                None => Ok(Vec::new()),
            }
        })
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pull(AllowedImage),
    Create(String),
    Start(String),
    Exec(Vec<String>),
    Upload(String),
    Download(String),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    uploads: Vec<(String, Vec<u8>)>,
    exec_rules: Vec<(String, ExecOutput)>,
    default_exec: ExecOutput,
    files: HashMap<String, String>,
    download: Option<Vec<u8>>,
    fail_pull: Option<String>,
    fail_start: Option<String>,
    fail_exec: Option<String>,
    panic_exec: bool,
}

/// In-memory [`ContainerEngine`] that records every call. Clones share state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output for every exec no rule matches.
    pub fn with_exec_output(self, output: ExecOutput) -> Self {
        locked(&self.state).default_exec = output;
        self
    }

    /// Output for execs whose command line contains `needle`.
    pub fn on_exec(self, needle: &str, output: ExecOutput) -> Self {
        locked(&self.state).exec_rules.push((needle.to_string(), output));
        self
    }

    pub fn failing_exec(self, message: &str) -> Self {
        locked(&self.state).fail_exec = Some(message.to_string());
        self
    }

    pub fn panicking_exec(self) -> Self {
        locked(&self.state).panic_exec = true;
        self
    }

    pub fn failing_pull(self, message: &str) -> Self {
        locked(&self.state).fail_pull = Some(message.to_string());
        self
    }

    pub fn failing_start(self, message: &str) -> Self {
        locked(&self.state).fail_start = Some(message.to_string());
        self
    }

    /// A file that `download` returns as a one-entry archive.
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        locked(&self.state)
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    /// Raw archive returned by every `download`.
    pub fn with_download(self, archive: Vec<u8>) -> Self {
        locked(&self.state).download = Some(archive);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        locked(&self.state).calls.clone()
    }

    /// `(dest_dir, archive)` for every upload.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        locked(&self.state).uploads.clone()
    }

    /// Scripts passed to `sh -c`, in order.
    pub fn exec_scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Exec(cmd) if cmd.len() == 3 && cmd[0] == "sh" && cmd[1] == "-c" => {
                    cmd.into_iter().nth(2)
                }
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn pulls(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Pull(_)))
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Create(_)))
    }

    pub fn starts(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Start(_)))
    }

    pub fn stops(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Stop(_)))
    }

    pub fn removes(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Remove(_)))
    }

    fn record(&self, call: EngineCall) {
        locked(&self.state).calls.push(call);
    }
}

impl ContainerEngine for FakeEngine {
    fn pull(&self, image: AllowedImage) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.record(EngineCall::Pull(image));
            match locked(&self.state).fail_pull.clone() {
                Some(reason) => Err(TaskError::ImagePull {
                    image: image.reference().to_string(),
                    reason,
                }),
                None => Ok(()),
            }
        })
    }

    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> EngineFuture<'a, String> {
        Box::pin(async move {
            self.record(EngineCall::Create(spec.name.clone()));
            Ok(format!("fake-{}", spec.name))
        })
    }

    fn start<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(EngineCall::Start(id.to_string()));
            match locked(&self.state).fail_start.clone() {
                Some(reason) => Err(TaskError::ContainerCreate(format!("failed to start: {reason}"))),
                None => Ok(()),
            }
        })
    }

    fn exec<'a>(&'a self, _id: &'a str, request: &'a ExecRequest) -> EngineFuture<'a, ExecOutput> {
        Box::pin(async move {
            self.record(EngineCall::Exec(request.command.clone()));
            let state = locked(&self.state);
            if state.panic_exec {
                drop(state);
                panic!("exec exploded");
            }
            if let Some(reason) = &state.fail_exec {
                return Err(TaskError::CommandExecution(reason.clone()));
            }
            let line = request.command.join(" ");
            let output = state
                .exec_rules
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| state.default_exec.clone());
            Ok(output)
        })
    }

    fn upload<'a>(
        &'a self,
        _id: &'a str,
        dest_dir: &'a str,
        archive: Vec<u8>,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(EngineCall::Upload(dest_dir.to_string()));
            locked(&self.state)
                .uploads
                .push((dest_dir.to_string(), archive));
            Ok(())
        })
    }

    fn download<'a>(&'a self, _id: &'a str, path: &'a str) -> EngineFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.record(EngineCall::Download(path.to_string()));
            let state = locked(&self.state);
            if let Some(archive) = &state.download {
                return Ok(archive.clone());
            }
            let contents = state
                .files
                .get(path)
                .ok_or_else(|| TaskError::Engine(format!("no such file: {path}")))?;
            let name = split_container_path(path)
                .map(|(_, name)| name)
                .unwrap_or_else(|| path.to_string());
            Ok(pack_file(&name, contents.as_bytes(), 0o644)?)
        })
    }

    fn stop<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(EngineCall::Stop(id.to_string()));
            Ok(())
        })
    }

    fn remove<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(EngineCall::Remove(id.to_string()));
            Ok(())
        })
    }
}

// ── Interaction ────────────────────────────────────────────────────

#[derive(Default)]
struct InteractionState {
    confirmations: VecDeque<Confirmation>,
    inputs: VecDeque<String>,
    secrets: VecDeque<Option<String>>,
    prompts: Vec<String>,
}

/// Answers from queues. With nothing queued it confirms, replies "ok" and
/// declines secrets.
#[derive(Clone, Default)]
pub struct ScriptedInteraction {
    state: Arc<Mutex<InteractionState>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirmation(self, confirmed: bool, answer: Option<&str>) -> Self {
        locked(&self.state).confirmations.push_back(Confirmation {
            confirmed,
            answer: answer.map(str::to_string),
        });
        self
    }

    pub fn with_input(self, answer: &str) -> Self {
        locked(&self.state).inputs.push_back(answer.to_string());
        self
    }

    pub fn with_secret(self, secret: Option<&str>) -> Self {
        locked(&self.state)
            .secrets
            .push_back(secret.map(str::to_string));
        self
    }

    /// Every prompt shown, in order.
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.state).prompts.clone()
    }
}

impl Interaction for ScriptedInteraction {
    fn confirm_with_answer<'a>(
        &'a self,
        request: &'a ConfirmRequest,
    ) -> InteractFuture<'a, Confirmation> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.prompts.push(request.prompt.clone());
            Ok(state.confirmations.pop_front().unwrap_or(Confirmation {
                confirmed: true,
                answer: None,
            }))
        })
    }

    fn ask_for_input<'a>(&'a self, _label: &'a str, prompt: &'a str) -> InteractFuture<'a, String> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.prompts.push(prompt.to_string());
            Ok(state.inputs.pop_front().unwrap_or_else(|| "ok".to_string()))
        })
    }

    fn ask_for_secret<'a>(&'a self, prompt: &'a str) -> InteractFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.prompts.push(prompt.to_string());
            Ok(state.secrets.pop_front().flatten())
        })
    }
}

// ── Context ────────────────────────────────────────────────────────

/// A running session on `alpine:latest` in `/workspace`.
pub fn fake_session() -> ContainerSession {
    ContainerSession {
        id: "fake-session".into(),
        image: AllowedImage::Alpine,
        working_dir: "/workspace".into(),
        status: SessionStatus::Running,
    }
}

/// A command context over the given doubles with a silent event bus.
pub fn context_with(engine: FakeEngine, interaction: ScriptedInteraction) -> CommandContext {
    CommandContext::new(
        fake_session(),
        Arc::new(engine),
        Arc::new(interaction),
        EventBus::noop(),
    )
}
