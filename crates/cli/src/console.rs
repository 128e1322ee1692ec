//! Terminal implementation of the engine's [`Runtime`].
//!
//! Prompts are line based: choices are picked by number or value,
//! checklists take a comma separated list, confirmations take yes/no.
//! Secure prompts read keys in raw mode so the answer is not echoed. End of
//! input, Ctrl-C and Esc interrupt the run.

use std::io::{self, BufRead, IsTerminal, StdinLock, Stdout, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::terminal;
use serde_json::Value;
use stencil_engine::values::to_text;
use stencil_engine::{Context, EngineError, EngineResult, ParameterOverride, ParameterType, PromptSpec, Runtime, str2bool, validate_answer};

pub struct ConsoleRuntime<R, W> {
    input: R,
    output: W,
    overrides: Vec<ParameterOverride>,
    raw_secure_input: bool,
}

impl ConsoleRuntime<StdinLock<'static>, Stdout> {
    pub fn stdio(overrides: Vec<ParameterOverride>) -> Self {
        let stdin = io::stdin();
        let raw_secure_input = stdin.is_terminal();
        Self {
            input: stdin.lock(),
            output: io::stdout(),
            overrides,
            raw_secure_input,
        }
    }
}

impl<R: BufRead, W: Write> ConsoleRuntime<R, W> {
    pub fn new(input: R, output: W, overrides: Vec<ParameterOverride>) -> Self {
        Self {
            input,
            output,
            overrides,
            raw_secure_input: false,
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, text: &str) {
        let _ = self.output.write_all(text.as_bytes());
        let _ = self.output.flush();
    }

    fn question(&mut self, spec: &PromptSpec, hint: &str) {
        let label = spec.label();
        self.say(&format!("{} {}{hint}: ", "?".green(), label.bold()));
    }

    fn read_line(&mut self) -> EngineResult<String> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|error| EngineError::io("failed to read answer", error))?;
        if read == 0 {
            return Err(EngineError::Interrupted);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_secret(&mut self) -> EngineResult<String> {
        if !self.raw_secure_input {
            return self.read_line();
        }
        terminal::enable_raw_mode().map_err(|error| EngineError::io("failed to enable raw mode", error))?;
        let secret = read_secret_keys();
        let _ = terminal::disable_raw_mode();
        self.say("\n");
        secret
    }

    fn ask_text(&mut self, spec: &PromptSpec) -> EngineResult<Option<Value>> {
        let hint = match default_of(spec) {
            Some(default) if !spec.secure => format!(" [{}]", to_text(default)),
            _ => String::new(),
        };
        self.question(spec, &hint);
        let line = if spec.secure { self.read_secret()? } else { self.read_line()? };
        if line.is_empty() {
            return Ok(default_of(spec).cloned());
        }
        Ok(Some(Value::String(line)))
    }

    fn ask_choice(&mut self, spec: &PromptSpec) -> EngineResult<Option<Value>> {
        self.list_choices(spec);
        let hint = default_of(spec).map(|default| format!(" [{}]", to_text(default))).unwrap_or_default();
        loop {
            self.question(spec, &hint);
            let line = self.read_line()?;
            if line.trim().is_empty() {
                return Ok(default_of(spec).cloned());
            }
            match pick_choice(&spec.choices, line.trim()) {
                Some(choice) => return Ok(Some(choice)),
                None => self.say("  choose one of the listed options\n"),
            }
        }
    }

    fn ask_checklist(&mut self, spec: &PromptSpec) -> EngineResult<Option<Value>> {
        self.list_choices(spec);
        loop {
            self.question(spec, " (comma separated)");
            let line = self.read_line()?;
            if line.trim().is_empty() {
                return Ok(Some(checklist_default(spec)));
            }
            let picked: Option<Vec<Value>> = line
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| {
                    if spec.choices.is_empty() {
                        Some(Value::String(item.to_string()))
                    } else {
                        pick_choice(&spec.choices, item)
                    }
                })
                .collect();
            match picked {
                Some(items) => return Ok(Some(Value::Array(items))),
                None => self.say("  choose from the listed options\n"),
            }
        }
    }

    fn ask_confirm(&mut self, spec: &PromptSpec) -> EngineResult<Option<Value>> {
        let default = match default_of(spec) {
            Some(Value::Bool(flag)) => *flag,
            Some(other) => str2bool(&to_text(other)),
            None => false,
        };
        self.question(spec, if default { " [Y/n]" } else { " [y/N]" });
        let line = self.read_line()?;
        let answer = if line.trim().is_empty() { default } else { str2bool(&line) };
        Ok(Some(Value::Bool(answer)))
    }

    fn list_choices(&mut self, spec: &PromptSpec) {
        let mut listing = String::new();
        for (index, choice) in spec.choices.iter().enumerate() {
            listing.push_str(&format!("  {}) {}\n", index + 1, to_text(choice)));
        }
        self.say(&listing);
    }
}

fn default_of(spec: &PromptSpec) -> Option<&Value> {
    spec.default.as_ref().filter(|value| !value.is_null())
}

fn checklist_default(spec: &PromptSpec) -> Value {
    match default_of(spec) {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(Value::String(text)) => Value::Array(
            text.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
        Some(other) => Value::Array(vec![other.clone()]),
        None => Value::Array(Vec::new()),
    }
}

/// A choice by 1-based position or by its text.
fn pick_choice(choices: &[Value], answer: &str) -> Option<Value> {
    if let Ok(position) = answer.parse::<usize>()
        && (1..=choices.len()).contains(&position)
    {
        return Some(choices[position - 1].clone());
    }
    choices.iter().find(|choice| to_text(choice) == answer).cloned()
}

fn read_secret_keys() -> EngineResult<String> {
    let mut secret = String::new();
    loop {
        let Event::Key(KeyEvent { code, modifiers, kind, .. }) = event::read().map_err(|error| EngineError::io("failed to read key", error))? else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }
        match code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Char('c' | 'd') if modifiers.contains(KeyModifiers::CONTROL) => return Err(EngineError::Interrupted),
            KeyCode::Esc => return Err(EngineError::Interrupted),
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(character) => secret.push(character),
            _ => {}
        }
    }
}

impl<R: BufRead, W: Write> Runtime for ConsoleRuntime<R, W> {
    fn ask(&mut self, spec: &PromptSpec) -> EngineResult<Value> {
        loop {
            let answer = match spec.value_type() {
                ParameterType::Checklist => self.ask_checklist(spec)?,
                ParameterType::Confirm => self.ask_confirm(spec)?,
                _ if !spec.choices.is_empty() => self.ask_choice(spec)?,
                _ => self.ask_text(spec)?,
            };
            let Some(answer) = answer else {
                self.say("  a value is required\n");
                continue;
            };
            match validate_answer(spec, &answer) {
                Ok(()) => return Ok(answer),
                Err(EngineError::ParameterValidation { pattern, .. }) => self.say(&format!("  value must match {pattern}\n")),
                Err(error) => return Err(error),
            }
        }
    }

    fn write(&mut self, message: &str) {
        self.say(message);
    }

    fn print_todos(&mut self, context: &Context) {
        if context.todos().is_empty() {
            return;
        }
        let mut text = format!("\n{}\n", "TODO:".green().bold());
        for todo in context.todos() {
            text.push_str(&format!(" [ ] {todo}\n"));
        }
        self.say(&text);
    }

    fn print_notes(&mut self, context: &Context) {
        if context.notes().is_empty() {
            return;
        }
        let mut text = format!("\n{}\n", "NOTES:".blue().bold());
        for note in context.notes() {
            text.push_str(&format!("{note}\n"));
        }
        self.say(&text);
    }

    fn parameter_overrides(&self) -> &[ParameterOverride] {
        &self.overrides
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    fn console(input: &str) -> ConsoleRuntime<Cursor<Vec<u8>>, Vec<u8>> {
        ConsoleRuntime::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), Vec::new())
    }

    fn spec(name: &str) -> PromptSpec {
        PromptSpec {
            name: name.into(),
            ..PromptSpec::default()
        }
    }

    fn output(runtime: ConsoleRuntime<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(runtime.into_output()).unwrap()
    }

    #[test]
    fn empty_answer_takes_the_default() {
        let mut runtime = console("\n");
        let prompt = PromptSpec {
            default: Some(json!("api")),
            ..spec("service")
        };
        assert_eq!(runtime.ask(&prompt).unwrap(), json!("api"));
        assert!(output(runtime).contains("[api]"));
    }

    #[test]
    fn required_and_invalid_answers_are_asked_again() {
        let mut runtime = console("\nBad1\ngood\n");
        let prompt = PromptSpec {
            validate: Some("^[a-z]+$".into()),
            ..spec("name")
        };
        assert_eq!(runtime.ask(&prompt).unwrap(), json!("good"));
        let text = output(runtime);
        assert!(text.contains("a value is required"));
        assert!(text.contains("value must match ^[a-z]+$"));
    }

    #[test]
    fn choices_accept_numbers_and_values() {
        let prompt = PromptSpec {
            choices: vec![json!("small"), json!("large")],
            ..spec("size")
        };
        assert_eq!(console("2\n").ask(&prompt).unwrap(), json!("large"));
        assert_eq!(console("huge\nsmall\n").ask(&prompt).unwrap(), json!("small"));
    }

    #[test]
    fn checklists_split_on_commas() {
        let prompt = PromptSpec {
            parameter_type: Some(ParameterType::Checklist),
            choices: vec![json!("a"), json!("b"), json!("c")],
            default: Some(json!("b")),
            ..spec("features")
        };
        assert_eq!(console("1, c\n").ask(&prompt).unwrap(), json!(["a", "c"]));
        assert_eq!(console("\n").ask(&prompt).unwrap(), json!(["b"]));
    }

    #[test]
    fn confirmations_use_truthy_strings() {
        let prompt = PromptSpec {
            parameter_type: Some(ParameterType::Confirm),
            default: Some(json!(true)),
            ..spec("proceed")
        };
        assert_eq!(console("\n").ask(&prompt).unwrap(), json!(true));
        assert_eq!(console("no\n").ask(&prompt).unwrap(), json!(false));
        assert_eq!(console("Y\n").ask(&prompt).unwrap(), json!(true));
    }

    #[test]
    fn end_of_input_interrupts() {
        let error = console("").ask(&spec("name")).unwrap_err();
        assert!(error.is_interrupted());
    }

    #[test]
    fn todos_and_notes_are_listed() {
        let mut context = Context::new();
        context.add_todo("push the image");
        context.add_note("all done");
        let mut runtime = console("");
        runtime.print_todos(&context);
        runtime.print_notes(&context);
        let text = output(runtime);
        assert!(text.contains(" [ ] push the image\n"));
        assert!(text.contains("all done\n"));
        assert!(text.contains("NOTES:"));
    }
}
