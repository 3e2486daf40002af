//! Collaborator interfaces consumed by the execution engine
//!
//! The scanner, the expression parser and all extensibility hooks are
//! external to the runtime: each one is a trait the host implements.
//! Pipeline hooks return `None` to decline a line, letting the next
//! handler have a look.

use crate::error::{FunctionReturnValue, InterpreterError};
use crate::exec::ExecutionThread;
use crate::function::Script;
use crate::value::Variant;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handles `#directive` lines the built-in handling does not consume.
pub trait DirectiveProcessor: Send + Sync {
    fn try_process(
        &self,
        thread: &mut ExecutionThread,
        directive: &str,
    ) -> Option<FunctionReturnValue>;
}

/// Claims whole statements by inspecting the line text.
pub trait StatementProcessor: Send + Sync {
    /// Whether this processor's declared pattern matches the line.
    fn claims(&self, line: &str) -> bool;

    fn process(&self, thread: &mut ExecutionThread, line: &str) -> Option<FunctionReturnValue>;
}

/// General line hook, consulted after directive and block-statement
/// handling. The first processor that claims a line wins.
pub trait LineProcessor: Send + Sync {
    fn can_process(&self, line: &str) -> bool;

    fn process(&self, thread: &mut ExecutionThread, line: &str) -> Option<FunctionReturnValue>;
}

/// Additional information attached to a resolved macro value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroMetadata {
    pub deprecated: bool,
}

/// Supplies values for `@macro` names the built-in set does not know.
pub trait MacroProvider: Send + Sync {
    fn provide(
        &self,
        thread: &mut ExecutionThread,
        name: &str,
    ) -> Option<(Variant, MacroMetadata)>;
}

/// Handles `#pragma option(params)` directives.
pub trait PragmaProcessor: Send + Sync {
    fn try_process(
        &self,
        thread: &mut ExecutionThread,
        option: &str,
        params: Option<&str>,
    ) -> Option<FunctionReturnValue>;
}

/// Maps an include path to a physical file, honoring relative lookup
/// against the including script.
pub trait IncludeResolver: Send + Sync {
    fn try_resolve(&self, path: &str, relative_to: Option<&Path>) -> Option<PathBuf>;
}

/// The textual script scanner. Produces a [`Script`] whose functions
/// carry their cached line lists and jump labels.
pub trait ScriptScanner: Send + Sync {
    fn scan(&self, path: &Path) -> Result<Arc<Script>, InterpreterError>;
}

/// A parsed statement, reduced to the shapes the engine acts on. The
/// expression grammar itself stays inside the solver: expression
/// payloads are opaque source text handed back to [`ExpressionSolver::eval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAst {
    /// A multi-declaration list: each entry a variable name plus an
    /// optional initializer expression.
    Declarations(Vec<DeclaredVariable>),
    /// An assignment against a resolved target.
    Assignment { target: AssignTarget, expr: String },
    /// A bare expression evaluated for its effect.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredVariable {
    pub name: String,
    pub initializer: Option<String>,
}

/// The left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignTarget {
    Variable(String),
    Indexed { variable: String, index: String },
    Member { variable: String, member: String },
}

/// The external expression parser and evaluator.
pub trait ExpressionSolver: Send + Sync {
    /// Parse one statement (with declaration modifiers already
    /// stripped) into the shape the engine dispatches on.
    fn parse(&self, line: &str) -> Result<LineAst, InterpreterError>;

    /// Evaluate an expression in the context of the executing thread.
    /// Function invocations inside the expression recurse through the
    /// thread's call machinery.
    fn eval(&self, thread: &mut ExecutionThread, expr: &str) -> FunctionReturnValue;
}

/// Side-effecting output callback invoked by script output statements.
/// The host decides where the text goes.
pub trait PrintHandler: Send + Sync {
    fn print(&self, text: &str);
}

/// Default print handler writing to stdout.
#[derive(Debug, Default)]
pub struct StdoutPrintHandler;

impl PrintHandler for StdoutPrintHandler {
    fn print(&self, text: &str) {
        print!("{text}");
    }
}

/// Print handler that captures output into a buffer, for tests and
/// embedding hosts.
#[derive(Debug, Default)]
pub struct BufferPrintHandler {
    buffer: Mutex<String>,
}

impl BufferPrintHandler {
    pub fn new() -> Self {
        BufferPrintHandler::default()
    }

    pub fn output(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl PrintHandler for BufferPrintHandler {
    fn print(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }
}
