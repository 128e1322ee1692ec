//! The interactive collaborator a run talks to.
//!
//! The engine never reads from a terminal itself. Prompts, printed output
//! and the final todo/note listing all go through a [`Runtime`], so the same
//! jobs run under the console, in tests, or with canned answers.

use std::collections::VecDeque;

use serde_json::Value;
use stencil_types::{ParameterOverride, PromptSpec};

use crate::context::Context;
use crate::error::{EngineError, EngineResult};

pub trait Runtime {
    /// Asks for a value described by `spec`. Returning
    /// [`EngineError::Interrupted`] aborts the run cleanly.
    fn ask(&mut self, spec: &PromptSpec) -> EngineResult<Value>;

    fn write(&mut self, message: &str);

    fn print_todos(&mut self, context: &Context);

    fn print_notes(&mut self, context: &Context);

    /// Overrides applied to parameter specs before they are processed.
    fn parameter_overrides(&self) -> &[ParameterOverride] {
        &[]
    }
}

/// Answers prompts from a queue and records everything written.
///
/// Prompts answer with the queued value, then with the prompt default; an
/// empty queue with no default is an interrupt.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    answers: VecDeque<Value>,
    overrides: Vec<ParameterOverride>,
    pub asked: Vec<PromptSpec>,
    pub output: Vec<String>,
    pub printed_todos: Vec<String>,
    pub printed_notes: Vec<String>,
}

impl ScriptedRuntime {
    pub fn new(answers: impl IntoIterator<Item = Value>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<ParameterOverride>) -> Self {
        self.overrides = overrides;
        self
    }
}

impl Runtime for ScriptedRuntime {
    fn ask(&mut self, spec: &PromptSpec) -> EngineResult<Value> {
        self.asked.push(spec.clone());
        match self.answers.pop_front() {
            Some(answer) => Ok(answer),
            None => spec.default.clone().ok_or(EngineError::Interrupted),
        }
    }

    fn write(&mut self, message: &str) {
        self.output.push(message.to_string());
    }

    fn print_todos(&mut self, context: &Context) {
        self.printed_todos.extend(context.todos().iter().cloned());
    }

    fn print_notes(&mut self, context: &Context) {
        self.printed_notes.extend(context.notes().iter().cloned());
    }

    fn parameter_overrides(&self) -> &[ParameterOverride] {
        &self.overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scripted_answers_then_defaults_then_interrupt() {
        let mut runtime = ScriptedRuntime::new([json!("john")]);
        let mut spec = PromptSpec {
            name: "user".into(),
            ..PromptSpec::default()
        };
        assert_eq!(runtime.ask(&spec).unwrap(), json!("john"));
        assert!(runtime.ask(&spec).unwrap_err().is_interrupted());
        spec.default = Some(json!("anon"));
        assert_eq!(runtime.ask(&spec).unwrap(), json!("anon"));
        assert_eq!(runtime.asked.len(), 3);
    }
}
