//! AutoIt3-compatible script execution core
//!
//! The runtime half of an AutoIt3 interpreter: the dynamic `Variant`
//! value model, case-insensitive variables in a lexical scope tree,
//! threaded call-frame execution with a per-line statement pipeline,
//! function identity and resolution, and result memoization. The
//! textual scanner, the expression grammar and the host front end are
//! external collaborators reached through the traits in [`plugin`].

pub mod cache;
pub mod error;
pub mod exec;
pub mod function;
pub mod interpreter;
pub mod location;
pub mod macros;
mod native;
pub mod objects;
pub mod plugin;
pub mod scope;
pub mod value;

pub use error::{FunctionReturnValue, InterpreterError, InterpreterResult};
pub use exec::ExecutionThread;
pub use function::{Function, NativeFunction, ParameterDeclaration, Script, ScriptFunction};
pub use interpreter::{Interpreter, InterpreterOptions};
pub use location::SourceLocation;
pub use scope::{SearchScope, Variable, VariableScope};
pub use value::{Variant, VariantType};
