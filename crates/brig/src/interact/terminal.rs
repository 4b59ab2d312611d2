//! Line-oriented terminal prompts over stdin/stdout.
//!
//! Secrets are read key by key in raw mode so they are never echoed. When
//! stdin is not a terminal the secret falls back to a visible line read.

use super::{ConfirmRequest, Confirmation, InteractFuture, Interaction};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{IsTerminal, Write};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Prompts on stdout and reads answers from stdin, one line at a time.
pub struct TerminalInteraction {
    input: Mutex<BufReader<Stdin>>,
}

impl Default for TerminalInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalInteraction {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    async fn prompt_line(&self, prompt: &str) -> Result<String, String> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| format!("failed to write prompt: {e}"))?;
        stdout
            .flush()
            .await
            .map_err(|e| format!("failed to flush prompt: {e}"))?;

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| format!("failed to read input: {e}"))?;
        if read == 0 {
            return Err("stdin closed".into());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn prompt_hidden(&self, prompt: &str) -> Result<Option<String>, String> {
        // Held so no line read interleaves with the raw-mode read.
        let _input = self.input.lock().await;
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || read_hidden(&prompt))
            .await
            .map_err(|e| format!("secret prompt failed: {e}"))?
    }
}

/// What a single key does to a secret being typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretKey {
    /// Keep reading.
    Continue,
    /// Enter pressed; the buffer holds the secret.
    Done,
    /// Esc or Ctrl-C; the user declined.
    Cancelled,
}

/// Apply one key event to the secret buffer.
pub fn apply_secret_key(buffer: &mut String, key: KeyEvent) -> SecretKey {
    if key.kind == KeyEventKind::Release {
        return SecretKey::Continue;
    }
    match key.code {
        KeyCode::Enter => SecretKey::Done,
        KeyCode::Esc => SecretKey::Cancelled,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            SecretKey::Cancelled
        }
        KeyCode::Backspace => {
            buffer.pop();
            SecretKey::Continue
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            SecretKey::Continue
        }
        _ => SecretKey::Continue,
    }
}

fn read_hidden(prompt: &str) -> Result<Option<String>, String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{prompt}")
        .and_then(|()| stdout.flush())
        .map_err(|e| format!("failed to write prompt: {e}"))?;

    enable_raw_mode().map_err(|e| format!("failed to disable echo: {e}"))?;
    let mut buffer = String::new();
    let outcome = loop {
        match event::read() {
            Ok(Event::Key(key)) => match apply_secret_key(&mut buffer, key) {
                SecretKey::Continue => {}
                SecretKey::Done => break Ok(Some(buffer)),
                SecretKey::Cancelled => break Ok(None),
            },
            Ok(_) => {}
            Err(e) => break Err(format!("failed to read input: {e}")),
        }
    };
    let restored = disable_raw_mode().map_err(|e| format!("failed to restore terminal: {e}"));
    // Raw mode swallowed the newline.
    let _ = write!(stdout, "\r\n").and_then(|()| stdout.flush());
    restored?;
    outcome.map(|secret| secret.filter(|s| !s.is_empty()))
}

/// Parse `yes`/`no` (or the custom labels) followed by an optional reason.
///
/// An empty line selects the default. A line that starts with neither answer
/// is treated as a rejection whose reason is the whole line.
pub fn parse_confirmation(line: &str, request: &ConfirmRequest) -> Confirmation {
    let line = line.trim();
    if line.is_empty() {
        return Confirmation {
            confirmed: request.default,
            answer: None,
        };
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let head = head.trim_end_matches([',', ':', '.']).to_lowercase();
    let answer = (!rest.is_empty()).then(|| rest.to_string());

    let yes = ["y", "yes", request.yes_label.to_lowercase().as_str()].contains(&head.as_str());
    let no = ["n", "no", request.no_label.to_lowercase().as_str()].contains(&head.as_str());
    match (yes, no) {
        (true, _) => Confirmation {
            confirmed: true,
            answer,
        },
        (false, true) => Confirmation {
            confirmed: false,
            answer,
        },
        (false, false) => Confirmation {
            confirmed: false,
            answer: Some(line.to_string()),
        },
    }
}

impl Interaction for TerminalInteraction {
    fn confirm_with_answer<'a>(
        &'a self,
        request: &'a ConfirmRequest,
    ) -> InteractFuture<'a, Confirmation> {
        Box::pin(async move {
            let hint = if request.default {
                format!("[{}]/{}", request.yes_label, request.no_label)
            } else {
                format!("{}/[{}]", request.yes_label, request.no_label)
            };
            let line = self
                .prompt_line(&format!("{}\n{hint} (optionally followed by a reason): ", request.prompt))
                .await?;
            Ok(parse_confirmation(&line, request))
        })
    }

    fn ask_for_input<'a>(&'a self, label: &'a str, prompt: &'a str) -> InteractFuture<'a, String> {
        Box::pin(async move { self.prompt_line(&format!("{prompt}\n{label}> ")).await })
    }

    fn ask_for_secret<'a>(&'a self, prompt: &'a str) -> InteractFuture<'a, Option<String>> {
        Box::pin(async move {
            if std::io::stdin().is_terminal() {
                return self
                    .prompt_hidden(&format!(
                        "{prompt}\nSecret, hidden (leave empty or press Esc to decline)> "
                    ))
                    .await;
            }
            let line = self
                .prompt_line(&format!(
                    "{prompt}\nSecret, input is VISIBLE (leave empty to decline)> "
                ))
                .await?;
            Ok((!line.is_empty()).then_some(line))
        })
    }
}
