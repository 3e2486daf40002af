//! Runtime error channels and call results
//!
//! Two channels that must not be conflated: a fatal interpreter error
//! (unwinds the current call, never observable by script code) and the
//! tri-state return value of a function call (success / recoverable
//! error / fatal). Recoverable errors are plain data — they surface as
//! the script's error/extended state and never unwind anything.

use crate::location::SourceLocation;
use crate::value::Variant;
use thiserror::Error;

/// Localized message lookup.
///
/// The core never concatenates human-readable text itself: every fatal
/// error carries a message key plus positional arguments, and the host
/// decides how to render them. Returning `None` falls back to the raw
/// key form.
pub trait MessageCatalog: Send + Sync {
    fn localize(&self, key: &str, args: &[String]) -> Option<String>;
}

/// Built-in English catalog used when the host does not install one.
#[derive(Debug, Default)]
pub struct EnglishCatalog;

impl MessageCatalog for EnglishCatalog {
    fn localize(&self, key: &str, args: &[String]) -> Option<String> {
        let template = match key {
            "error.thread_already_running" => "the thread 0x{0} is already running",
            "error.unparsable_line" => "the line could not be parsed",
            "error.unparsable_directive" => "unknown or invalid directive \"#{0}\"",
            "error.unparsable_pragma" => "unknown or invalid pragma option \"{0}\"",
            "error.no_matching_close" => "\"{0}\" has no matching open statement ({1})",
            "error.unmatched_loop_control" => "\"{0}\" is not inside enough enclosing loops",
            "error.invalid_loop_count" => "\"{0}\" is not a valid loop level",
            "error.conflicting_modifiers" => {
                "the declaration modifiers \"{0}\" and \"{1}\" cannot be combined"
            }
            "error.constant_redeclaration" => "the constant \"${0}\" cannot be re-declared",
            "error.constant_assignment" => "the constant \"${0}\" cannot be assigned to",
            "error.uninitialized_constant" => "the constant \"${0}\" must be initialized",
            "error.undeclared_variable" => "the variable \"${0}\" has not been declared",
            "error.invalid_declaration" => "invalid variable declaration",
            "error.not_enough_args" => {
                "the function \"{0}\" expects at least {1} argument(s), got {2}"
            }
            "error.too_many_args" => "the function \"{0}\" expects at most {1} argument(s), got {2}",
            "error.native_execution_error" => "the native function \"{0}\" failed to execute",
            "error.maximum_recursion" => "the maximum call depth of {0} has been exceeded",
            "error.byref_default" => "the ByRef parameter \"${0}\" cannot have a default value",
            "error.unknown_function" => "the function \"{0}\" is unknown",
            "error.no_expression_solver" => "no expression solver has been registered",
            "error.no_script_scanner" => "no script scanner has been registered",
            "error.unresolved_include" => "the include file \"{0}\" could not be resolved",
            _ => return None,
        };
        Some(format_template(template, args))
    }
}

/// Substitute `{0}`, `{1}`, … placeholders with positional arguments.
fn format_template(template: &str, args: &[String]) -> String {
    let mut out = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), arg);
    }
    out
}

fn fallback_text(location: &Option<SourceLocation>, key: &str, args: &[String]) -> String {
    let mut text = key.to_string();
    if !args.is_empty() {
        text.push_str(&format!(" ({})", args.join(", ")));
    }
    match location {
        Some(loc) => format!("{loc}: {text}"),
        None => text,
    }
}

/// A fatal interpreter error: source location plus message key and
/// positional arguments. Unwinds the current call and is not catchable
/// by script code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", fallback_text(.location, .key, .args))]
pub struct InterpreterError {
    pub location: Option<SourceLocation>,
    pub key: String,
    pub args: Vec<String>,
}

impl InterpreterError {
    pub fn new(
        location: Option<SourceLocation>,
        key: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        InterpreterError {
            location,
            key: key.into(),
            args,
        }
    }

    /// Build an error for one of the well-known message keys.
    pub fn well_known<I>(location: Option<SourceLocation>, key: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        InterpreterError::new(
            location,
            key,
            args.into_iter().map(|a| a.to_string()).collect(),
        )
    }

    /// Render through the given catalog, falling back to the raw
    /// key+args form for unknown keys.
    pub fn render(&self, catalog: &dyn MessageCatalog) -> String {
        let message = catalog
            .localize(&self.key, &self.args)
            .unwrap_or_else(|| fallback_text(&None, &self.key, &self.args));
        match &self.location {
            Some(loc) => format!("{loc}: {message}"),
            None => message,
        }
    }
}

/// The tri-state outcome of a function call.
///
/// `Error` is the script-observable error/extended channel: it still
/// carries a return value (boolean false unless stated otherwise) and
/// does not unwind. Only `Fatal` propagates through the call-stack
/// unwind loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionReturnValue {
    Success {
        value: Variant,
        extended: Option<Variant>,
    },
    Error {
        value: Variant,
        code: i32,
        extended: Option<Variant>,
    },
    Fatal(InterpreterError),
}

impl FunctionReturnValue {
    pub fn success(value: Variant) -> Self {
        FunctionReturnValue::Success {
            value,
            extended: None,
        }
    }

    pub fn success_extended(value: Variant, extended: Variant) -> Self {
        FunctionReturnValue::Success {
            value,
            extended: Some(extended),
        }
    }

    pub fn error(code: i32) -> Self {
        FunctionReturnValue::Error {
            value: Variant::from_boolean(false),
            code,
            extended: None,
        }
    }

    pub fn error_extended(code: i32, extended: Variant) -> Self {
        FunctionReturnValue::Error {
            value: Variant::from_boolean(false),
            code,
            extended: Some(extended),
        }
    }

    pub fn error_value(value: Variant, code: i32, extended: Option<Variant>) -> Self {
        FunctionReturnValue::Error {
            value,
            code,
            extended,
        }
    }

    pub fn fatal(error: InterpreterError) -> Self {
        FunctionReturnValue::Fatal(error)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FunctionReturnValue::Fatal(_))
    }

    pub fn as_fatal(&self) -> Option<&InterpreterError> {
        match self {
            FunctionReturnValue::Fatal(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FunctionReturnValue::Success { .. })
    }

    /// The carried return value for both non-fatal cases.
    pub fn value(&self) -> Option<&Variant> {
        match self {
            FunctionReturnValue::Success { value, .. }
            | FunctionReturnValue::Error { value, .. } => Some(value),
            FunctionReturnValue::Fatal(_) => None,
        }
    }
}

impl From<Variant> for FunctionReturnValue {
    fn from(value: Variant) -> Self {
        FunctionReturnValue::success(value)
    }
}

impl From<InterpreterError> for FunctionReturnValue {
    fn from(error: InterpreterError) -> Self {
        FunctionReturnValue::Fatal(error)
    }
}

/// Process-level outcome of an outermost run: an exit code and an
/// optional fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterResult {
    pub exit_code: i32,
    pub error: Option<InterpreterError>,
}

impl InterpreterResult {
    pub fn ok() -> Self {
        InterpreterResult {
            exit_code: 0,
            error: None,
        }
    }

    pub fn with_exit_code(exit_code: i32) -> Self {
        InterpreterResult {
            exit_code,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

impl From<InterpreterError> for InterpreterResult {
    fn from(error: InterpreterError) -> Self {
        InterpreterResult {
            exit_code: -1,
            error: Some(error),
        }
    }
}
