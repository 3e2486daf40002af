//! Function identity, resolution and dispatch payloads
//!
//! A callable unit is either a `ScriptFunction` (cached source lines,
//! jump labels, parameter declarations) or a `NativeFunction` (a
//! dispatch closure plus arity). Identity is the case-insensitive name
//! plus the owning script; native functions all live in one logical
//! system script and are identified by name alone.

use crate::error::{FunctionReturnValue, InterpreterError};
use crate::exec::ExecutionThread;
use crate::location::SourceLocation;
use crate::value::Variant;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Name of the implicit entry function every script owns.
pub const GLOBAL_FUNC: &str = "$global";

/// One declared parameter of a script function.
///
/// A parameter is optional iff it declares a default value. ByRef
/// parameters cannot carry a default; [`Script::add_function`] rejects
/// such declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDeclaration {
    pub name: String,
    pub by_ref: bool,
    pub default: Option<Variant>,
}

impl ParameterDeclaration {
    pub fn required(name: impl Into<String>) -> Self {
        ParameterDeclaration {
            name: name.into(),
            by_ref: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: Variant) -> Self {
        ParameterDeclaration {
            name: name.into(),
            by_ref: false,
            default: Some(default),
        }
    }

    pub fn by_ref(name: impl Into<String>) -> Self {
        ParameterDeclaration {
            name: name.into(),
            by_ref: true,
            default: None,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// A named jump target inside a script function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpLabel {
    pub name: String,
    pub location: SourceLocation,
}

/// A function defined in script source: an ordered list of cached
/// lines plus jump labels and parameter declarations.
pub struct ScriptFunction {
    name: String,
    script: Weak<Script>,
    script_path: PathBuf,
    parameters: Vec<ParameterDeclaration>,
    lines: RwLock<BTreeMap<SourceLocation, Vec<String>>>,
    jump_labels: RwLock<HashMap<String, JumpLabel>>,
    cached: AtomicBool,
    volatile: AtomicBool,
}

impl ScriptFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> Option<Arc<Script>> {
        self.script.upgrade()
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// The entry function executes in the thread's existing scope
    /// instead of a fresh child scope.
    pub fn is_entry(&self) -> bool {
        self.name.eq_ignore_ascii_case(GLOBAL_FUNC)
    }

    pub fn parameters(&self) -> &[ParameterDeclaration] {
        &self.parameters
    }

    /// Minimum and maximum accepted argument count. The minimum counts
    /// non-optional parameters.
    pub fn parameter_count(&self) -> (usize, usize) {
        let min = self.parameters.iter().filter(|p| !p.is_optional()).count();
        (min, self.parameters.len())
    }

    /// Append a line under its source location. Multiple physical
    /// lines folding to one logical location append to the same slot.
    pub fn add_line(&self, location: SourceLocation, content: impl Into<String>) {
        self.lines
            .write()
            .entry(location)
            .or_default()
            .push(content.into());
    }

    /// The cached line array in source order.
    pub fn lines(&self) -> Vec<(SourceLocation, String)> {
        self.lines
            .read()
            .iter()
            .flat_map(|(location, contents)| {
                contents
                    .iter()
                    .map(|line| (location.clone(), line.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines.read().values().map(Vec::len).sum()
    }

    /// Where the function was declared: its first line, or the owning
    /// script at line zero when no lines have been added yet.
    pub fn location(&self) -> SourceLocation {
        self.lines
            .read()
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| SourceLocation::new(self.script_path.clone(), 0))
    }

    /// Register a jump label; one label per name per function, later
    /// registrations replace earlier ones.
    pub fn add_jump_label(&self, location: SourceLocation, name: &str) -> JumpLabel {
        let name = name.trim().to_uppercase();
        let label = JumpLabel {
            name: name.clone(),
            location,
        };
        self.jump_labels.write().insert(name, label.clone());
        label
    }

    pub fn lookup_jump_label(&self, name: &str) -> Option<JumpLabel> {
        self.jump_labels
            .read()
            .get(&name.trim().to_uppercase())
            .cloned()
    }

    /// Whether call results are memoized in the function cache.
    pub fn is_cached(&self) -> bool {
        self.cached.load(Ordering::Relaxed)
    }

    pub fn set_cached(&self, cached: bool) {
        self.cached.store(cached, Ordering::Relaxed);
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile.load(Ordering::Relaxed)
    }

    pub fn set_volatile(&self, volatile: bool) {
        self.volatile.store(volatile, Ordering::Relaxed);
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.script_path == other.script_path
    }
}

impl Eq for ScriptFunction {}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] Func {} ({} lines)",
            self.script_path.display(),
            self.name,
            self.line_count()
        )
    }
}

/// Dispatch signature of a native function: the executing thread plus
/// the padded argument vector.
pub type NativeDispatch = dyn Fn(&mut ExecutionThread, &[Variant]) -> FunctionReturnValue + Send + Sync;

/// A function implemented by the host: built-ins, plugin-provided
/// functions or host bindings.
pub struct NativeFunction {
    name: String,
    min_params: usize,
    max_params: usize,
    defaults: Vec<Variant>,
    dispatch: Box<NativeDispatch>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        (min_params, max_params): (usize, usize),
        mut defaults: Vec<Variant>,
        dispatch: impl Fn(&mut ExecutionThread, &[Variant]) -> FunctionReturnValue
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        defaults.resize(
            max_params.saturating_sub(min_params),
            Variant::default_value(),
        );
        Arc::new(NativeFunction {
            name: name.into(),
            min_params,
            max_params,
            defaults,
            dispatch: Box::new(dispatch),
        })
    }

    pub fn fixed_arity(
        name: impl Into<String>,
        param_count: usize,
        dispatch: impl Fn(&mut ExecutionThread, &[Variant]) -> FunctionReturnValue
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        NativeFunction::new(name, (param_count, param_count), Vec::new(), dispatch)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_count(&self) -> (usize, usize) {
        (self.min_params, self.max_params)
    }

    pub fn default_values(&self) -> &[Variant] {
        &self.defaults
    }

    /// Invoke the dispatch closure with the argument vector padded
    /// with declared defaults, then `Default`, up to the maximum
    /// arity, and truncated past it. A panic at the native boundary is
    /// translated into a fatal error naming this function; it never
    /// escapes as a raw fault.
    pub fn execute(&self, thread: &mut ExecutionThread, args: &[Variant]) -> FunctionReturnValue {
        let mut padded: Vec<Variant> = args.to_vec();
        let skip = padded.len().saturating_sub(self.min_params);
        padded.extend(self.defaults.iter().skip(skip).cloned());
        if padded.len() < self.max_params {
            padded.resize(self.max_params, Variant::default_value());
        }
        padded.truncate(self.max_params);

        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.dispatch)(thread, &padded))) {
            Ok(result) => result,
            Err(_) => FunctionReturnValue::fatal(InterpreterError::well_known(
                None,
                "error.native_execution_error",
                [&self.name],
            )),
        }
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for NativeFunction {}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[native] Func {}", self.name)
    }
}

/// A callable unit: script-defined or native.
#[derive(Clone)]
pub enum Function {
    Script(Arc<ScriptFunction>),
    Native(Arc<NativeFunction>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Script(f) => f.name(),
            Function::Native(f) => f.name(),
        }
    }

    pub fn parameter_count(&self) -> (usize, usize) {
        match self {
            Function::Script(f) => f.parameter_count(),
            Function::Native(f) => f.parameter_count(),
        }
    }

    pub fn is_entry(&self) -> bool {
        match self {
            Function::Script(f) => f.is_entry(),
            Function::Native(_) => false,
        }
    }

    /// Owning-script display name for diagnostics.
    pub fn script_name(&self) -> String {
        match self {
            Function::Script(f) => f.script_path().display().to_string(),
            Function::Native(_) => "native".to_string(),
        }
    }

    pub fn location(&self) -> SourceLocation {
        match self {
            Function::Script(f) => f.location(),
            Function::Native(_) => SourceLocation::unknown(),
        }
    }

    pub fn as_script(&self) -> Option<&Arc<ScriptFunction>> {
        match self {
            Function::Script(f) => Some(f),
            Function::Native(_) => None,
        }
    }

    pub fn as_native(&self) -> Option<&Arc<NativeFunction>> {
        match self {
            Function::Native(f) => Some(f),
            Function::Script(_) => None,
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Script(a), Function::Script(b)) => a == b,
            (Function::Native(a), Function::Native(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Function {}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Script(func) => func.fmt(f),
            Function::Native(func) => func.fmt(f),
        }
    }
}

/// The identity of a scanned script plus its function registry.
///
/// Scripts are produced by the external scanner; the runtime only
/// stores functions and the startup/teardown hook lists.
pub struct Script {
    me: Weak<Script>,
    name: String,
    path: PathBuf,
    functions: RwLock<HashMap<String, Arc<ScriptFunction>>>,
    startup_functions: RwLock<Vec<String>>,
    exit_functions: RwLock<Vec<String>>,
}

impl Script {
    /// Create a script with its implicit entry function.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let script = Arc::new_cyclic(|me| Script {
            me: me.clone(),
            name,
            path,
            functions: RwLock::new(HashMap::new()),
            startup_functions: RwLock::new(Vec::new()),
            exit_functions: RwLock::new(Vec::new()),
        });
        script
            .add_function(GLOBAL_FUNC, Vec::new())
            .expect("entry function declaration is always valid");
        script
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declare (or re-declare) a function. Redeclaration replaces the
    /// previous definition under the same case-insensitive name.
    pub fn add_function(
        &self,
        name: &str,
        parameters: Vec<ParameterDeclaration>,
    ) -> Result<Arc<ScriptFunction>, InterpreterError> {
        for parameter in &parameters {
            if parameter.by_ref && parameter.default.is_some() {
                return Err(InterpreterError::well_known(
                    None,
                    "error.byref_default",
                    [&parameter.name],
                ));
            }
        }
        let function = Arc::new(ScriptFunction {
            name: name.to_string(),
            script: self.me.clone(),
            script_path: self.path.clone(),
            parameters,
            lines: RwLock::new(BTreeMap::new()),
            jump_labels: RwLock::new(HashMap::new()),
            cached: AtomicBool::new(false),
            volatile: AtomicBool::new(false),
        });
        self.functions
            .write()
            .insert(name.to_uppercase(), Arc::clone(&function));
        log::debug!("declared function {name} in {}", self.path.display());
        Ok(function)
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<ScriptFunction>> {
        self.functions.read().get(&name.to_uppercase()).cloned()
    }

    pub fn entry_function(&self) -> Arc<ScriptFunction> {
        self.get_function(GLOBAL_FUNC)
            .expect("every script owns its entry function")
    }

    pub fn functions(&self) -> Vec<Arc<ScriptFunction>> {
        self.functions.read().values().cloned().collect()
    }

    /// Register a function to run before the entry function's first
    /// line.
    pub fn register_startup_function(&self, name: &str) {
        self.startup_functions.write().push(name.to_string());
    }

    pub fn startup_functions(&self) -> Vec<String> {
        self.startup_functions.read().clone()
    }

    /// Register a function to run after the entry function's last
    /// line on normal completion.
    pub fn register_exit_function(&self, name: &str) {
        self.exit_functions.write().push(name.to_string());
    }

    pub fn exit_functions(&self) -> Vec<String> {
        self.exit_functions.read().clone()
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Script {} ({} functions)",
            self.path.display(),
            self.functions.read().len()
        )
    }
}

/// Maps upper-cased names to functions, for natives and script
/// functions alike. Natives register once at startup, before any
/// script executes; afterwards the resolver is effectively read-only
/// for them.
pub struct FunctionResolver {
    functions: RwLock<HashMap<String, Function>>,
}

impl FunctionResolver {
    pub fn new() -> Self {
        FunctionResolver {
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a function under its upper-cased name, replacing any
    /// previous registration.
    pub fn register(&self, function: Function) {
        log::debug!("registered function {}", function.name());
        self.functions
            .write()
            .insert(function.name().to_uppercase(), function);
    }

    /// Register every function a scanned script declares. Entry
    /// functions stay out of the map: every script has one and they
    /// are only ever invoked directly.
    pub fn register_script(&self, script: &Arc<Script>) {
        for function in script.functions() {
            if !function.is_entry() {
                self.register(Function::Script(function));
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Function> {
        self.functions.read().get(&name.to_uppercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}

impl Default for FunctionResolver {
    fn default() -> Self {
        FunctionResolver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_count_splits_required_and_optional() {
        let script = Script::new("test.au3");
        let function = script
            .add_function(
                "F",
                vec![
                    ParameterDeclaration::required("$a"),
                    ParameterDeclaration::by_ref("$b"),
                    ParameterDeclaration::optional("$c", Variant::from_number(1.0)),
                ],
            )
            .unwrap();
        assert_eq!(function.parameter_count(), (2, 3));
    }

    #[test]
    fn test_by_ref_with_default_is_rejected_at_declaration() {
        let script = Script::new("test.au3");
        let result = script.add_function(
            "F",
            vec![ParameterDeclaration {
                name: "$x".to_string(),
                by_ref: true,
                default: Some(Variant::null()),
            }],
        );
        assert_eq!(result.unwrap_err().key, "error.byref_default");
    }

    #[test]
    fn test_redeclaration_replaces() {
        let script = Script::new("test.au3");
        script.add_function("F", Vec::new()).unwrap();
        let second = script
            .add_function("f", vec![ParameterDeclaration::required("$a")])
            .unwrap();
        let resolved = script.get_function("F").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        assert_eq!(script.functions().len(), 2); // entry + F
    }

    #[test]
    fn test_function_identity_is_name_and_script() {
        let a = Script::new("a.au3");
        let b = Script::new("b.au3");
        let fa = Function::Script(a.add_function("F", Vec::new()).unwrap());
        let fa2 = Function::Script(a.add_function("f", Vec::new()).unwrap());
        let fb = Function::Script(b.add_function("F", Vec::new()).unwrap());
        assert_eq!(fa, fa2);
        assert_ne!(fa, fb);
    }

    #[test]
    fn test_lines_fold_by_location() {
        let script = Script::new("test.au3");
        let function = script.add_function("F", Vec::new()).unwrap();
        let loc0 = SourceLocation::new("test.au3", 3);
        function.add_line(loc0.clone(), "$x = 1 _");
        function.add_line(loc0.clone(), "+ 2");
        function.add_line(SourceLocation::new("test.au3", 1), "$y = 0");

        let lines = function.lines();
        assert_eq!(lines.len(), 3);
        // ordered by location, folded lines kept in append order
        assert_eq!(lines[0].1, "$y = 0");
        assert_eq!(lines[1].1, "$x = 1 _");
        assert_eq!(lines[2].1, "+ 2");
        assert_eq!(function.location(), SourceLocation::new("test.au3", 1));
    }

    #[test]
    fn test_jump_labels_are_case_insensitive_and_replace() {
        let script = Script::new("test.au3");
        let function = script.add_function("F", Vec::new()).unwrap();
        function.add_jump_label(SourceLocation::new("test.au3", 1), "retry");
        function.add_jump_label(SourceLocation::new("test.au3", 5), "RETRY");
        let label = function.lookup_jump_label("Retry").unwrap();
        assert_eq!(label.location.line(), 5);
    }

    #[test]
    fn test_native_argument_padding() {
        let interpreter = crate::interpreter::Interpreter::new();
        let mut thread = interpreter.create_thread();
        let native = NativeFunction::new(
            "PadProbe",
            (1, 3),
            vec![Variant::from_number(10.0), Variant::from_number(20.0)],
            |_, args| FunctionReturnValue::success(Variant::from_array(args.to_vec())),
        );

        let result = native.execute(&mut thread, &[Variant::from_number(1.0)]);
        assert_eq!(
            result,
            FunctionReturnValue::success(Variant::from_array(vec![
                Variant::from_number(1.0),
                Variant::from_number(10.0),
                Variant::from_number(20.0),
            ]))
        );

        // explicit arguments displace leading defaults
        let result = native.execute(
            &mut thread,
            &[Variant::from_number(1.0), Variant::from_number(99.0)],
        );
        assert_eq!(
            result,
            FunctionReturnValue::success(Variant::from_array(vec![
                Variant::from_number(1.0),
                Variant::from_number(99.0),
                Variant::from_number(20.0),
            ]))
        );
    }

    #[test]
    fn test_native_panic_becomes_fatal() {
        let interpreter = crate::interpreter::Interpreter::new();
        let mut thread = interpreter.create_thread();
        let native = NativeFunction::fixed_arity("Explode", 0, |_, _| panic!("boom"));
        let result = native.execute(&mut thread, &[]);
        let error = result.as_fatal().unwrap();
        assert_eq!(error.key, "error.native_execution_error");
        assert_eq!(error.args, ["Explode"]);
    }

    #[test]
    fn test_resolver_is_case_insensitive() {
        let resolver = FunctionResolver::new();
        let script = Script::new("test.au3");
        resolver.register(Function::Script(script.add_function("MyFunc", Vec::new()).unwrap()));
        assert!(resolver.lookup("myfunc").is_some());
        assert!(resolver.lookup("MYFUNC").is_some());
        assert!(resolver.lookup("other").is_none());
    }

    #[test]
    fn test_entry_function_exists() {
        let script = Script::new("test.au3");
        assert!(script.entry_function().is_entry());
        assert_eq!(script.entry_function().parameter_count(), (0, 0));
    }
}
