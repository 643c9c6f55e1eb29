use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::inference::panic_message;

use super::protocol::{ArgValue, ToolCall, ToolCallOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Float,
    Int,
    Bool,
    Text,
    /// Any other scalar, converted from its text form.
    Other,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgKind::Float => "float",
            ArgKind::Int => "int",
            ArgKind::Bool => "bool",
            ArgKind::Text => "string",
            ArgKind::Other => "scalar",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("argument '{param}' value '{value}' cannot be converted to {expected}")]
    Coercion {
        param: String,
        expected: ArgKind,
        value: String,
    },
}

/// Conversion from a loosely typed tool argument into a handler parameter.
pub trait FromArg: Sized {
    const KIND: ArgKind;

    fn from_arg(value: &ArgValue) -> Option<Self>;
}

impl FromArg for f64 {
    const KIND: ArgKind = ArgKind::Float;

    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Number(number) => Some(*number),
            ArgValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            ArgValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl FromArg for f32 {
    const KIND: ArgKind = ArgKind::Float;

    fn from_arg(value: &ArgValue) -> Option<Self> {
        f64::from_arg(value).map(|number| number as f32)
    }
}

impl FromArg for i32 {
    const KIND: ArgKind = ArgKind::Int;

    fn from_arg(value: &ArgValue) -> Option<Self> {
        let number = match value {
            ArgValue::Text(text) => {
                if let Ok(parsed) = text.trim().parse::<i32>() {
                    return Some(parsed);
                }
                text.trim().parse::<f64>().ok()?
            }
            other => f64::from_arg(other)?,
        };
        let rounded = number.round();
        if rounded.is_finite() && rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64 {
            Some(rounded as i32)
        } else {
            None
        }
    }
}

impl FromArg for bool {
    const KIND: ArgKind = ArgKind::Bool;

    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Bool(flag) => Some(*flag),
            ArgValue::Number(number) => Some(*number != 0.0),
            ArgValue::Text(text) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if text.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }
}

impl FromArg for String {
    const KIND: ArgKind = ArgKind::Text;

    fn from_arg(value: &ArgValue) -> Option<Self> {
        Some(value.to_string())
    }
}

fn from_text_form<T: FromStr>(value: &ArgValue) -> Option<T> {
    value.to_string().trim().parse().ok()
}

macro_rules! from_arg_via_text {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromArg for $ty {
                const KIND: ArgKind = ArgKind::Other;

                fn from_arg(value: &ArgValue) -> Option<Self> {
                    from_text_form(value)
                }
            }
        )*
    };
}

from_arg_via_text!(u8, u16, u32, u64, usize, i64);

fn coerce<A: FromArg>(param: &str, value: &ArgValue) -> Result<A, ToolError> {
    A::from_arg(value).ok_or_else(|| ToolError::Coercion {
        param: param.to_string(),
        expected: A::KIND,
        value: value.to_string(),
    })
}

/// Canned replies used instead of a model round trip; an empty pool means
/// the pool is not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PredefinedMessages {
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub tool_use: Vec<String>,
}

impl PredefinedMessages {
    pub fn sample_success<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.success.choose(rng).map(String::as_str)
    }

    pub fn sample_failed<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.failed.choose(rng).map(String::as_str)
    }

    pub fn sample_tool_use<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.tool_use.choose(rng).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolParam {
    pub name: String,
    pub kind: ArgKind,
}

type Handler<T> = Box<dyn Fn(&mut T, &[&ArgValue]) -> Result<ToolCallOutput, ToolError>>;

struct RegisteredTool<T> {
    params: Vec<ToolParam>,
    handler: Handler<T>,
}

/// Name-keyed tool registry. Handlers run against a target `T` supplied at
/// execution time and declare their typed parameters when registered.
pub struct ToolExecutor<T> {
    tools: BTreeMap<String, RegisteredTool<T>>,
    messages: PredefinedMessages,
}

impl<T> fmt::Debug for ToolExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("messages", &self.messages)
            .finish()
    }
}

impl<T> Default for ToolExecutor<T> {
    fn default() -> Self {
        Self::new(PredefinedMessages::default())
    }
}

impl<T> ToolExecutor<T> {
    pub fn new(messages: PredefinedMessages) -> Self {
        Self {
            tools: BTreeMap::new(),
            messages,
        }
    }

    pub fn messages(&self) -> &PredefinedMessages {
        &self.messages
    }

    pub fn params(&self, name: &str) -> Option<&[ToolParam]> {
        self.tools.get(name).map(|tool| tool.params.as_slice())
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn register1<A, F>(&mut self, name: &str, param: &str, handler: F)
    where
        A: FromArg,
        F: Fn(&mut T, A) -> ToolCallOutput + 'static,
    {
        let names = [param.to_string()];
        let params = vec![param_of::<A>(param)];
        self.insert(
            name,
            params,
            Box::new(move |target: &mut T, args: &[&ArgValue]| {
                let a = coerce::<A>(&names[0], args[0])?;
                Ok(handler(target, a))
            }),
        );
    }

    pub fn register2<A, B, F>(&mut self, name: &str, params: [&str; 2], handler: F)
    where
        A: FromArg,
        B: FromArg,
        F: Fn(&mut T, A, B) -> ToolCallOutput + 'static,
    {
        let names = params.map(str::to_string);
        let declared = vec![param_of::<A>(params[0]), param_of::<B>(params[1])];
        self.insert(
            name,
            declared,
            Box::new(move |target: &mut T, args: &[&ArgValue]| {
                let a = coerce::<A>(&names[0], args[0])?;
                let b = coerce::<B>(&names[1], args[1])?;
                Ok(handler(target, a, b))
            }),
        );
    }

    pub fn register3<A, B, C, F>(&mut self, name: &str, params: [&str; 3], handler: F)
    where
        A: FromArg,
        B: FromArg,
        C: FromArg,
        F: Fn(&mut T, A, B, C) -> ToolCallOutput + 'static,
    {
        let names = params.map(str::to_string);
        let declared = vec![
            param_of::<A>(params[0]),
            param_of::<B>(params[1]),
            param_of::<C>(params[2]),
        ];
        self.insert(
            name,
            declared,
            Box::new(move |target: &mut T, args: &[&ArgValue]| {
                let a = coerce::<A>(&names[0], args[0])?;
                let b = coerce::<B>(&names[1], args[1])?;
                let c = coerce::<C>(&names[2], args[2])?;
                Ok(handler(target, a, b, c))
            }),
        );
    }

    fn insert(&mut self, name: &str, params: Vec<ToolParam>, handler: Handler<T>) {
        if self
            .tools
            .insert(name.to_string(), RegisteredTool { params, handler })
            .is_some()
        {
            warn!(tool = name, "tool_registration_replaced");
        }
    }

    /// Runs a parsed tool call. Unknown tools, missing or unconvertible
    /// arguments and handler panics are logged and yield `None`.
    pub fn execute(&self, target: &mut T, call: &ToolCall) -> Option<ToolCallOutput> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "tool_unknown");
            return None;
        };

        let mut args = Vec::with_capacity(tool.params.len());
        for param in &tool.params {
            match call.arguments.get(&param.name) {
                Some(value) => args.push(value),
                None => {
                    warn!(tool = %call.name, param = %param.name, "tool_argument_missing");
                    return None;
                }
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(|| (tool.handler)(target, &args))) {
            Ok(Ok(output)) => {
                debug!(tool = %call.name, result = ?output.result, "tool_executed");
                Some(output)
            }
            Ok(Err(err)) => {
                warn!(tool = %call.name, error = %err, "tool_execution_failed");
                None
            }
            Err(payload) => {
                error!(
                    tool = %call.name,
                    panic = %panic_message(payload.as_ref()),
                    "tool_handler_panicked"
                );
                None
            }
        }
    }
}

fn param_of<A: FromArg>(name: &str) -> ToolParam {
    ToolParam {
        name: name.to_string(),
        kind: A::KIND,
    }
}
