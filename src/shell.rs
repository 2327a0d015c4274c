//! Presentation shell.
//!
//! Drives the [`Pipeline`] one request at a time and tracks where each
//! request is with a [`ShellState`]:
//!
//! ```text
//! Idle → AwaitingInput → Retrieving → Rendering → Completing → Displaying → Idle
//! ```
//!
//! Any state may fall back to `Idle` on error. The shell never accepts a
//! new request before the previous one is back at `Idle`, and never prints
//! partial output for a failed request.

use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::warn;

use crate::pipeline::{Pipeline, Request, Response, Stage};
use crate::prompt::Mode;

/// Line that ends the interactive loop (case-insensitive).
pub const EXIT_SENTINEL: &str = "exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Idle,
    AwaitingInput,
    Retrieving,
    Rendering,
    Completing,
    Displaying,
}

impl ShellState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ShellState) -> bool {
        use ShellState::*;
        matches!(
            (self, next),
            (Idle, AwaitingInput)
                | (AwaitingInput, Retrieving)
                | (Retrieving, Rendering)
                | (Rendering, Completing)
                | (Completing, Displaying)
                | (Displaying, Idle)
        ) || next == Idle
    }
}

impl From<Stage> for ShellState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Retrieving => ShellState::Retrieving,
            Stage::Rendering => ShellState::Rendering,
            Stage::Completing => ShellState::Completing,
        }
    }
}

pub struct Shell<'a> {
    pipeline: &'a Pipeline,
    state: ShellState,
    history: Vec<ShellState>,
}

fn advance(state: &mut ShellState, history: &mut Vec<ShellState>, next: ShellState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal shell transition {:?} -> {:?}",
        state,
        next
    );
    *state = next;
    history.push(next);
}

impl<'a> Shell<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self {
            pipeline,
            state: ShellState::Idle,
            history: vec![ShellState::Idle],
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[ShellState] {
        &self.history
    }

    fn transition(&mut self, next: ShellState) {
        advance(&mut self.state, &mut self.history, next);
    }

    /// Run one request through the pipeline and return to `Idle`.
    ///
    /// The caller displays the returned response; a failed request yields
    /// nothing to display.
    pub async fn run_once(&mut self, mode: Mode, input: &str) -> crate::Result<Response> {
        if self.state != ShellState::Idle {
            self.transition(ShellState::Idle);
        }
        self.transition(ShellState::AwaitingInput);

        let request = Request::new(mode, input);
        let pipeline = self.pipeline;
        let (state, history) = (&mut self.state, &mut self.history);
        let result = pipeline
            .handle_with(&request, |stage| advance(state, history, stage.into()))
            .await;

        match result {
            Ok(response) => {
                self.transition(ShellState::Displaying);
                self.transition(ShellState::Idle);
                Ok(response)
            }
            Err(e) => {
                self.transition(ShellState::Idle);
                Err(e)
            }
        }
    }

    /// Read one line per request from `input` until the exit sentinel or
    /// EOF, writing answers to `output`.
    ///
    /// The index is built before the first prompt. Request-scoped errors
    /// are reported and the loop continues; any other error ends the loop
    /// and is returned.
    pub async fn run_repl<R, W>(&mut self, mode: Mode, input: R, mut output: W) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        self.pipeline.ready().await?;
        writeln!(output, "\nChatbot is ready! Ask questions about your documents.\n")?;

        let mut lines = input.lines();
        loop {
            write!(output, "Ask me a question (or type '{}' to quit): ", EXIT_SENTINEL)?;
            output.flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => {
                    writeln!(output)?;
                    break;
                }
            };
            if line.trim().eq_ignore_ascii_case(EXIT_SENTINEL) {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            match self.run_once(mode, &line).await {
                Ok(response) => writeln!(output, "\n{}\n", response.text)?,
                Err(e) if e.is_request_scoped() => {
                    warn!(error = %e, "request failed");
                    writeln!(output, "\nError: {}\n", e)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        writeln!(output, "Goodbye!")?;
        Ok(())
    }
}

/// `docforge generate`: one request, printed to stdout.
pub async fn run_generate(pipeline: &Pipeline, mode: Mode, topic: &str, json: bool) -> Result<()> {
    let mut shell = Shell::new(pipeline);
    let response = shell.run_once(mode, topic).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.text);
    }
    Ok(())
}

/// `docforge chat`: interactive loop on stdin/stdout.
pub async fn run_chat(pipeline: &Pipeline, mode: Mode) -> Result<()> {
    let mut shell = Shell::new(pipeline);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    shell.run_repl(mode, stdin.lock(), stdout.lock()).await
}
