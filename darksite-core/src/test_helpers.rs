//! Test utilities: a scripted [`CommandExecutor`] and fixture builders

use crate::exec::{CommandExecutor, CommandOutput, CommandSpec, StreamOutcome};
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

/// Canned response for a scripted command
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(CommandOutput),
    /// `execute` fails with `TimedOut`, `stream` reports [`StreamOutcome::TimedOut`]
    TimedOut,
}

type Responder = Box<dyn Fn(&CommandSpec) -> Scripted + Send + Sync>;

enum Reply {
    /// Pops in order; the last response repeats
    Queue(VecDeque<Scripted>),
    Dynamic(Responder),
}

struct Rule {
    pattern: String,
    reply: Reply,
}

/// Executor that answers from rules instead of spawning processes.
///
/// A rule matches when its pattern is a substring of the command line
/// (`program arg1 arg2 ...`). Rules are tried in insertion order; unmatched
/// commands succeed with empty output. Every call is recorded.
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    fallback: Scripted,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fallback: Scripted::Output(output_ok("")),
        }
    }

    /// Answer for commands no rule matches
    pub fn with_fallback(mut self, fallback: Scripted) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn on(&self, pattern: &str, output: CommandOutput) {
        self.on_sequence(pattern, vec![Scripted::Output(output)]);
    }

    pub fn on_sequence(&self, pattern: &str, responses: Vec<Scripted>) {
        self.push(pattern, Reply::Queue(responses.into()));
    }

    /// Compute the answer from the command; handy for side effects on disk
    pub fn on_with<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&CommandSpec) -> Scripted + Send + Sync + 'static,
    {
        self.push(pattern, Reply::Dynamic(Box::new(responder)));
    }

    fn push(&self, pattern: &str, reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            reply,
        });
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(command_line).collect()
    }

    /// Number of recorded calls whose command line contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    fn respond(&self, spec: &CommandSpec) -> Scripted {
        self.calls.lock().unwrap().push(spec.clone());
        let line = command_line(spec);

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if !line.contains(&rule.pattern) {
                continue;
            }
            return match &mut rule.reply {
                Reply::Queue(queue) => {
                    if queue.len() > 1 {
                        queue.pop_front().unwrap_or_else(|| self.fallback.clone())
                    } else {
                        queue.front().cloned().unwrap_or_else(|| self.fallback.clone())
                    }
                }
                Reply::Dynamic(responder) => responder(spec),
            };
        }
        self.fallback.clone()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        match self.respond(spec) {
            Scripted::Output(output) => Ok(output),
            Scripted::TimedOut => Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout")),
        }
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> io::Result<StreamOutcome> {
        match self.respond(spec) {
            Scripted::Output(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    sink(line);
                }
                for line in String::from_utf8_lossy(&output.stderr).lines() {
                    sink(line);
                }
                Ok(StreamOutcome::Exited(output.exit_code))
            }
            Scripted::TimedOut => Ok(StreamOutcome::TimedOut),
        }
    }
}

/// `program arg1 arg2 ...`, unquoted
pub fn command_line(spec: &CommandSpec) -> String {
    std::iter::once(spec.program.as_str())
        .chain(spec.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn output_ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Failed command; `stdout` carries the text so mesh parsing can still see it
pub fn output_fail(code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// A syntactically valid WireGuard key derived from `seed` (44 chars, 32 bytes)
pub fn fake_wg_key(seed: u8) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode([seed; 32])
}
