//! Operator prompt port.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

/// Asks the operator a question and returns the raw answer.
pub trait Prompt {
    fn ask(&self, question: &str) -> io::Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
///
/// There is no timeout: an unattended run must use auto-deploy mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}: ")?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

/// Answers questions from a fixed script; records what was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, question: &str) -> io::Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
        // An exhausted script behaves like an empty line
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or_default();
        Ok(answer.trim().to_string())
    }
}

/// Normalise a yes/no answer.
///
/// `1`, `true`, `on`, `y`, `yes` mean yes; `0`, `false`, `off`, `n`, `no` and
/// the empty answer mean no. Anything else is undecided.
pub fn parse_yes_no(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "y" | "yes" => Some(true),
        "0" | "false" | "off" | "n" | "no" | "" => Some(false),
        _ => None,
    }
}
