//! Evaluation of parsed templates against a [`Context`].

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::RenderError;
use super::filters;
use super::parser::{Arguments, BinaryOp, Expr, Node};
use super::utilities;
use crate::context::Context;
use crate::values::{compare, float_value, is_truthy, loose_eq, to_text};

static NULL: Value = Value::Null;
const MAX_REPEAT_LEN: usize = 16 * 1024 * 1024;

/// Evaluated call arguments.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl CallArgs {
    /// Argument by keyword, falling back to position.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.keyword.get(name).or_else(|| self.positional.get(index))
    }

    pub fn text(&self, index: usize, name: &str) -> Result<String, RenderError> {
        match self.get(index, name) {
            Some(Value::Null) | None => Err(RenderError::evaluation(format!("missing argument '{name}'"))),
            Some(value) => Ok(to_text(value)),
        }
    }

    pub fn text_or(&self, index: usize, name: &str, fallback: &str) -> String {
        match self.get(index, name) {
            Some(Value::Null) | None => fallback.to_string(),
            Some(value) => to_text(value),
        }
    }

    pub fn flag(&self, index: usize, name: &str) -> bool {
        self.get(index, name).is_some_and(is_truthy)
    }

    pub fn integer_or(&self, index: usize, name: &str, fallback: i64) -> Result<i64, RenderError> {
        match self.get(index, name) {
            Some(Value::Null) | None => Ok(fallback),
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64))
                .ok_or_else(|| RenderError::evaluation(format!("argument '{name}' must be an integer"))),
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map_err(|_| RenderError::evaluation(format!("argument '{name}' must be an integer"))),
            Some(other) => Err(RenderError::evaluation(format!("argument '{name}' must be an integer, got {other}"))),
        }
    }
}

pub(crate) struct Evaluator<'a> {
    context: &'a Context,
    scopes: Vec<Map<String, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            scopes: vec![Map::new()],
        }
    }

    pub fn render(&mut self, nodes: &[Node], output: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Output(expression) => output.push_str(&to_text(&self.evaluate(expression)?)),
                Node::If { branches, otherwise } => {
                    let mut selected = otherwise.as_slice();
                    for (condition, body) in branches {
                        if is_truthy(&self.evaluate(condition)?) {
                            selected = body.as_slice();
                            break;
                        }
                    }
                    self.render(selected, output)?;
                }
                Node::For {
                    item,
                    value,
                    iterable,
                    body,
                    otherwise,
                } => {
                    let entries = self.loop_entries(iterable, value.is_some())?;
                    if entries.is_empty() {
                        self.render(otherwise, output)?;
                        continue;
                    }
                    let length = entries.len();
                    for (index, (first, second)) in entries.into_iter().enumerate() {
                        let mut frame = Map::new();
                        frame.insert(item.clone(), first);
                        if let Some(value_name) = value {
                            frame.insert(value_name.clone(), second);
                        }
                        frame.insert(
                            "loop".into(),
                            serde_json::json!({
                                "index": index + 1,
                                "index0": index,
                                "first": index == 0,
                                "last": index + 1 == length,
                                "length": length,
                            }),
                        );
                        self.scopes.push(frame);
                        let rendered = self.render(body, output);
                        self.scopes.pop();
                        rendered?;
                    }
                }
                Node::Set { name, value } => {
                    let evaluated = self.evaluate(value)?;
                    if let Some(frame) = self.scopes.last_mut() {
                        frame.insert(name.clone(), evaluated);
                    }
                }
            }
        }
        Ok(())
    }

    /// Items to iterate: `(item, value)` pairs. Mappings yield keys, or
    /// key/value pairs when the loop names two variables.
    fn loop_entries(&self, iterable: &Expr, pairs: bool) -> Result<Vec<(Value, Value)>, RenderError> {
        Ok(match self.eval(iterable)?.into_owned() {
            Value::Array(items) => items.into_iter().map(|item| (item, Value::Null)).collect(),
            Value::Object(map) if pairs => map.into_iter().map(|(key, value)| (Value::String(key), value)).collect(),
            Value::Object(map) => map.into_iter().map(|(key, _)| (Value::String(key), Value::Null)).collect(),
            Value::String(text) => text.chars().map(|c| (Value::String(c.to_string()), Value::Null)).collect(),
            Value::Null => Vec::new(),
            other => return Err(RenderError::evaluation(format!("{other} is not iterable"))),
        })
    }

    pub fn evaluate(&self, expression: &Expr) -> Result<Value, RenderError> {
        Ok(self.eval(expression)?.into_owned())
    }

    fn eval<'s>(&'s self, expression: &'s Expr) -> Result<Cow<'s, Value>, RenderError> {
        match expression {
            Expr::Literal(value) => Ok(Cow::Borrowed(value)),
            Expr::Name(name) => Ok(self.lookup(name)),
            Expr::List(items) => Ok(Cow::Owned(Value::Array(
                items.iter().map(|item| self.evaluate(item)).collect::<Result<_, _>>()?,
            ))),
            Expr::Dict(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(to_text(&self.evaluate(key)?), self.evaluate(value)?);
                }
                Ok(Cow::Owned(Value::Object(map)))
            }
            Expr::Attribute { target, name } => {
                if let Expr::Name(root) = target.as_ref()
                    && root == "context"
                    && !self.is_bound("context")
                {
                    return Ok(Cow::Borrowed(self.context.get(name).unwrap_or(&NULL)));
                }
                Ok(select(self.eval(target)?, &Value::String(name.clone())))
            }
            Expr::Index { target, index } => {
                let key = self.evaluate(index)?;
                let base = self.eval(target)?;
                if let (Value::String(text), Value::Number(position)) = (base.as_ref(), &key) {
                    return Ok(Cow::Owned(char_at(text, position.as_i64().unwrap_or_default())));
                }
                Ok(select(base, &key))
            }
            Expr::Call { target, args } => self.call(target, args).map(Cow::Owned),
            Expr::Filter { target, name, args } => {
                let value = self.evaluate(target)?;
                let args = self.arguments(args)?;
                filters::apply_filter(name, value, &args).map(Cow::Owned)
            }
            Expr::Test {
                target,
                name,
                negated,
                args,
            } => {
                let value = self.eval(target)?;
                let args = self.arguments(args)?;
                let passed = filters::apply_test(name, &value, &args)?;
                Ok(Cow::Owned(Value::Bool(passed != *negated)))
            }
            Expr::Negate(inner) => match self.eval(inner)?.as_ref() {
                Value::Number(number) => Ok(Cow::Owned(match number.as_i64() {
                    Some(integer) => integer.checked_neg().map(Value::from).unwrap_or_else(|| float_value(-(integer as f64))),
                    None => float_value(-number.as_f64().unwrap_or_default()),
                })),
                other => Err(RenderError::evaluation(format!("cannot negate {other}"))),
            },
            Expr::Not(inner) => Ok(Cow::Owned(Value::Bool(!is_truthy(self.eval(inner)?.as_ref())))),
            Expr::And(left, right) => {
                let left_value = self.eval(left)?;
                if is_truthy(&left_value) { self.eval(right) } else { Ok(left_value) }
            }
            Expr::Or(left, right) => {
                let left_value = self.eval(left)?;
                if is_truthy(&left_value) { Ok(left_value) } else { self.eval(right) }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(self.eval(condition)?.as_ref()) {
                    self.eval(then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise),
                        None => Ok(Cow::Borrowed(&NULL)),
                    }
                }
            }
            Expr::Binary { op, left, right } => {
                let left_value = self.eval(left)?;
                let right_value = self.eval(right)?;
                binary(*op, &left_value, &right_value).map(Cow::Owned)
            }
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|frame| frame.contains_key(name)) || self.context.contains_key(name)
    }

    /// Loop variables, then context keys, then the context itself. Unknown
    /// names evaluate to null.
    fn lookup(&self, name: &str) -> Cow<'_, Value> {
        if let Some(value) = self.scopes.iter().rev().find_map(|frame| frame.get(name)) {
            return Cow::Borrowed(value);
        }
        if let Some(value) = self.context.get(name) {
            return Cow::Borrowed(value);
        }
        if name == "context" {
            return Cow::Owned(Value::Object(self.context.values().clone()));
        }
        Cow::Borrowed(&NULL)
    }

    fn arguments(&self, args: &Arguments) -> Result<CallArgs, RenderError> {
        let mut evaluated = CallArgs::default();
        for expression in &args.positional {
            evaluated.positional.push(self.evaluate(expression)?);
        }
        for (name, expression) in &args.keyword {
            evaluated.keyword.insert(name.clone(), self.evaluate(expression)?);
        }
        Ok(evaluated)
    }

    fn call(&self, target: &Expr, args: &Arguments) -> Result<Value, RenderError> {
        match target {
            Expr::Attribute { target: receiver, name } => {
                if let Expr::Name(namespace) = receiver.as_ref()
                    && utilities::is_namespace(namespace)
                    && !self.is_bound(namespace)
                {
                    let args = self.arguments(args)?;
                    return utilities::call(namespace, name, &args);
                }
                let receiver = self.evaluate(receiver)?;
                let args = self.arguments(args)?;
                filters::call_method(name, receiver, &args)
            }
            Expr::Name(function) if !self.is_bound(function) => {
                let args = self.arguments(args)?;
                utilities::call_global(function, &args)
            }
            other => Err(RenderError::evaluation(format!("{other:?} is not callable"))),
        }
    }
}

/// Member access by string key or numeric index; missing members are null.
fn select<'s>(base: Cow<'s, Value>, key: &Value) -> Cow<'s, Value> {
    match base {
        Cow::Borrowed(value) => Cow::Borrowed(member(value, key).unwrap_or(&NULL)),
        Cow::Owned(value) => Cow::Owned(member(&value, key).cloned().unwrap_or(Value::Null)),
    }
}

fn member<'v>(value: &'v Value, key: &Value) -> Option<&'v Value> {
    match (value, key) {
        (Value::Object(map), Value::String(name)) => map.get(name),
        (Value::Object(map), other) => map.get(&to_text(other)),
        (Value::Array(items), Value::Number(position)) => {
            let position = position.as_i64()?;
            let resolved = if position < 0 { items.len() as i64 + position } else { position };
            usize::try_from(resolved).ok().and_then(|index| items.get(index))
        }
        (Value::Array(items), Value::String(text)) => text.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

fn char_at(text: &str, position: i64) -> Value {
    let length = text.chars().count() as i64;
    let resolved = if position < 0 { length + position } else { position };
    usize::try_from(resolved)
        .ok()
        .and_then(|index| text.chars().nth(index))
        .map(|c| Value::String(c.to_string()))
        .unwrap_or(Value::Null)
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    use BinaryOp::*;
    match op {
        Equal => Ok(Value::Bool(loose_eq(left, right))),
        NotEqual => Ok(Value::Bool(!loose_eq(left, right))),
        Less | LessEqual | Greater | GreaterEqual => {
            let ordering = compare(left, right).ok_or_else(|| RenderError::evaluation(format!("cannot compare {left} with {right}")))?;
            Ok(Value::Bool(match op {
                Less => ordering.is_lt(),
                LessEqual => ordering.is_le(),
                Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        In => contains(right, left).map(Value::Bool),
        NotIn => contains(right, left).map(|found| Value::Bool(!found)),
        Concat => Ok(Value::String(format!("{}{}", to_text(left), to_text(right)))),
        Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.iter().chain(b).cloned().collect())),
            _ => arithmetic(op, left, right),
        },
        Multiply => match (left, right) {
            (Value::String(text), Value::Number(count)) | (Value::Number(count), Value::String(text)) => repeat(text, count),
            _ => arithmetic(op, left, right),
        },
        Subtract | Divide | FloorDivide | Modulo => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(RenderError::evaluation(format!("unsupported operands {left} and {right}")));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let integer = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Subtract => x.checked_sub(y),
            BinaryOp::Multiply => x.checked_mul(y),
            BinaryOp::FloorDivide if y != 0 => floor_div(x, y),
            BinaryOp::Modulo if y != 0 => floor_mod(x, y),
            _ => None,
        };
        if let Some(result) = integer {
            return Ok(Value::from(result));
        }
    }

    let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
    if y == 0.0 && matches!(op, BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulo) {
        return Err(RenderError::evaluation("division by zero"));
    }
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => x / y,
        BinaryOp::FloorDivide => (x / y).floor(),
        _ => {
            let remainder = x % y;
            if remainder != 0.0 && (remainder < 0.0) != (y < 0.0) { remainder + y } else { remainder }
        }
    };
    Ok(float_value(result))
}

/// Integer division rounding toward negative infinity.
fn floor_div(x: i64, y: i64) -> Option<i64> {
    let quotient = x.checked_div(y)?;
    if x % y != 0 && (x < 0) != (y < 0) { quotient.checked_sub(1) } else { Some(quotient) }
}

/// Remainder carrying the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let remainder = x.checked_rem(y)?;
    if remainder != 0 && (remainder < 0) != (y < 0) { remainder.checked_add(y) } else { Some(remainder) }
}

fn repeat(text: &str, count: &serde_json::Number) -> Result<Value, RenderError> {
    let Some(count) = count.as_i64().or_else(|| count.as_u64().map(|_| i64::MAX)) else {
        return Err(RenderError::evaluation("can only repeat text an integer number of times"));
    };
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    match text.len().checked_mul(count) {
        Some(length) if length <= MAX_REPEAT_LEN => Ok(Value::String(text.repeat(count))),
        _ => Err(RenderError::evaluation(format!("repeating text {count} times exceeds {MAX_REPEAT_LEN} bytes"))),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, RenderError> {
    match container {
        Value::String(text) => Ok(text.contains(&to_text(needle))),
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(map.contains_key(&to_text(needle))),
        Value::Null => Ok(false),
        other => Err(RenderError::evaluation(format!("'in' is not supported for {other}"))),
    }
}
