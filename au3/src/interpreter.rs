//! The interpreter context
//!
//! Process-wide owner of the global scope, the thread registry, the
//! handle table, the function resolver and cache, the plugin
//! registries and the random-number stream. Everything an
//! `ExecutionThread` needs is reached through this type; there is no
//! ambient global state.

use crate::cache::FunctionCache;
use crate::error::{
    EnglishCatalog, FunctionReturnValue, InterpreterError, InterpreterResult, MessageCatalog,
};
use crate::exec::{ExecutionThread, ThreadState};
use crate::function::{Function, FunctionResolver, NativeFunction};
use crate::macros::{register_default_macros, MacroResolver};
use crate::objects::{ComConnector, GlobalObjectStorage};
use crate::plugin::{
    DirectiveProcessor, ExpressionSolver, IncludeResolver, LineProcessor, MacroProvider,
    PragmaProcessor, PrintHandler, ScriptScanner, StatementProcessor, StdoutPrintHandler,
};
use crate::value::{Variant, ValueBridge};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failure loading an options file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunable runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    /// Upper bound on the call-stack depth of one thread.
    pub max_call_depth: usize,
    /// Whether functions flagged as cached consult the result cache.
    pub cache_enabled: bool,
    /// Fixed seed for the random-number stream; entropy-seeded when
    /// absent.
    pub rng_seed: Option<u64>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        InterpreterOptions {
            max_call_depth: 8192,
            cache_enabled: true,
            rng_seed: None,
        }
    }
}

impl InterpreterOptions {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Clears the main-thread designation on every exit path of `run`.
struct MainThreadGuard<'a>(&'a Interpreter);

impl Drop for MainThreadGuard<'_> {
    fn drop(&mut self) {
        *self.0.main_thread.lock() = None;
    }
}

/// The process-wide interpreter context.
pub struct Interpreter {
    options: InterpreterOptions,
    global_scope: Arc<crate::scope::VariableScope>,
    threads: DashMap<u32, Arc<ThreadState>>,
    next_thread_id: AtomicU32,
    next_delegate_id: AtomicU32,
    main_thread: Mutex<Option<u32>>,
    objects: GlobalObjectStorage,
    com_connector: RwLock<Option<Arc<dyn ComConnector>>>,
    resolver: FunctionResolver,
    macros: MacroResolver,
    cache: FunctionCache,
    included: Mutex<HashSet<PathBuf>>,
    directive_processors: RwLock<Vec<Arc<dyn DirectiveProcessor>>>,
    statement_processors: RwLock<Vec<Arc<dyn StatementProcessor>>>,
    line_processors: RwLock<Vec<Arc<dyn LineProcessor>>>,
    macro_providers: RwLock<Vec<Arc<dyn MacroProvider>>>,
    pragma_processors: RwLock<Vec<Arc<dyn PragmaProcessor>>>,
    include_resolvers: RwLock<Vec<Arc<dyn IncludeResolver>>>,
    script_scanner: RwLock<Option<Arc<dyn ScriptScanner>>>,
    expression_solver: RwLock<Option<Arc<dyn ExpressionSolver>>>,
    print_handler: RwLock<Arc<dyn PrintHandler>>,
    catalog: RwLock<Arc<dyn MessageCatalog>>,
    runtime_options: Mutex<HashMap<String, Variant>>,
    rng: Mutex<StdRng>,
}

impl Interpreter {
    pub fn new() -> Arc<Self> {
        Interpreter::with_options(InterpreterOptions::default())
    }

    /// Build a context and register the built-in macros and native
    /// functions. Native registration completes here, before any
    /// thread can run.
    pub fn with_options(options: InterpreterOptions) -> Arc<Self> {
        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let interpreter = Arc::new(Interpreter {
            options,
            global_scope: crate::scope::VariableScope::create_global(),
            threads: DashMap::new(),
            next_thread_id: AtomicU32::new(0),
            next_delegate_id: AtomicU32::new(0),
            main_thread: Mutex::new(None),
            objects: GlobalObjectStorage::new(),
            com_connector: RwLock::new(None),
            resolver: FunctionResolver::new(),
            macros: MacroResolver::new(),
            cache: FunctionCache::new(),
            included: Mutex::new(HashSet::new()),
            directive_processors: RwLock::new(Vec::new()),
            statement_processors: RwLock::new(Vec::new()),
            line_processors: RwLock::new(Vec::new()),
            macro_providers: RwLock::new(Vec::new()),
            pragma_processors: RwLock::new(Vec::new()),
            include_resolvers: RwLock::new(Vec::new()),
            script_scanner: RwLock::new(None),
            expression_solver: RwLock::new(None),
            print_handler: RwLock::new(Arc::new(StdoutPrintHandler)),
            catalog: RwLock::new(Arc::new(EnglishCatalog)),
            runtime_options: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        });
        register_default_macros(&interpreter.macros);
        crate::native::register_builtin_functions(&interpreter);
        log::debug!(
            "interpreter created ({} native functions)",
            interpreter.resolver.len()
        );
        interpreter
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn global_scope(&self) -> &Arc<crate::scope::VariableScope> {
        &self.global_scope
    }

    pub fn resolver(&self) -> &FunctionResolver {
        &self.resolver
    }

    pub fn macros(&self) -> &MacroResolver {
        &self.macros
    }

    pub fn cache(&self) -> &FunctionCache {
        &self.cache
    }

    pub fn objects(&self) -> &GlobalObjectStorage {
        &self.objects
    }

    /// Allocate a new execution thread with the next monotonic id and
    /// register it in the live-thread set.
    pub fn create_thread(self: &Arc<Self>) -> ExecutionThread {
        let id = self.next_thread_id.fetch_add(1, Ordering::SeqCst) + 1;
        let state = ThreadState::new(id);
        self.threads.insert(id, Arc::clone(&state));
        ExecutionThread::new(Arc::clone(self), state)
    }

    pub(crate) fn remove_thread(&self, id: u32) {
        self.threads.remove(&id);
    }

    pub fn thread_ids(&self) -> Vec<u32> {
        self.threads.iter().map(|entry| *entry.key()).collect()
    }

    pub fn main_thread_id(&self) -> Option<u32> {
        *self.main_thread.lock()
    }

    /// Ask every registered thread to stop with the given exit code.
    /// Cooperative: threads finish their current line first.
    pub fn stop(&self, exit_code: i32) {
        for entry in self.threads.iter() {
            entry.value().request_stop(Some(exit_code));
        }
    }

    /// Run a function as the process entry point: creates a thread,
    /// designates it as the main thread for the duration and
    /// translates the outcome into a process-level result.
    pub fn run(self: &Arc<Self>, function: &Function, args: &[Variant]) -> InterpreterResult {
        let mut thread = self.create_thread();
        *self.main_thread.lock() = Some(thread.id());
        let _guard = MainThreadGuard(self);

        match thread.start(function, args) {
            FunctionReturnValue::Success { value, .. } => {
                InterpreterResult::with_exit_code(value.to_number() as i32)
            }
            FunctionReturnValue::Error { code, .. } => InterpreterResult::with_exit_code(code),
            FunctionReturnValue::Fatal(error) => InterpreterResult::from(error),
        }
    }

    /// Scan a script file and run its entry function.
    pub fn run_file(self: &Arc<Self>, path: impl AsRef<Path>) -> InterpreterResult {
        let Some(scanner) = self.script_scanner() else {
            return InterpreterResult::from(InterpreterError::well_known(
                None,
                "error.no_script_scanner",
                Vec::<String>::new(),
            ));
        };
        let script = match scanner.scan(path.as_ref()) {
            Ok(script) => script,
            Err(error) => return InterpreterResult::from(error),
        };
        self.resolver.register_script(&script);
        self.run(&Function::Script(script.entry_function()), &[])
    }

    /// Record an include as seen; reports whether it was new.
    pub(crate) fn mark_included(&self, path: &Path) -> bool {
        self.included.lock().insert(path.to_path_buf())
    }

    /// A uniquely named anonymous native function, not registered in
    /// the resolver.
    pub fn create_native_delegate(
        &self,
        param_count: (usize, usize),
        dispatch: impl Fn(&mut ExecutionThread, &[Variant]) -> FunctionReturnValue
        + Send
        + Sync
        + 'static,
    ) -> Arc<NativeFunction> {
        let id = self.next_delegate_id.fetch_add(1, Ordering::SeqCst) + 1;
        NativeFunction::new(
            format!("$delegate-0x{id:08x}"),
            param_count,
            Vec::new(),
            dispatch,
        )
    }

    // Plugin and collaborator registration.

    pub fn register_directive_processor(&self, processor: Arc<dyn DirectiveProcessor>) {
        self.directive_processors.write().push(processor);
    }

    pub fn register_statement_processor(&self, processor: Arc<dyn StatementProcessor>) {
        self.statement_processors.write().push(processor);
    }

    pub fn register_line_processor(&self, processor: Arc<dyn LineProcessor>) {
        self.line_processors.write().push(processor);
    }

    pub fn register_macro_provider(&self, provider: Arc<dyn MacroProvider>) {
        self.macro_providers.write().push(provider);
    }

    pub fn register_pragma_processor(&self, processor: Arc<dyn PragmaProcessor>) {
        self.pragma_processors.write().push(processor);
    }

    pub fn register_include_resolver(&self, resolver: Arc<dyn IncludeResolver>) {
        self.include_resolvers.write().push(resolver);
    }

    pub fn set_script_scanner(&self, scanner: Arc<dyn ScriptScanner>) {
        *self.script_scanner.write() = Some(scanner);
    }

    pub fn set_expression_solver(&self, solver: Arc<dyn ExpressionSolver>) {
        *self.expression_solver.write() = Some(solver);
    }

    pub fn set_print_handler(&self, handler: Arc<dyn PrintHandler>) {
        *self.print_handler.write() = handler;
    }

    pub fn set_message_catalog(&self, catalog: Arc<dyn MessageCatalog>) {
        *self.catalog.write() = catalog;
    }

    pub fn set_com_connector(&self, connector: Arc<dyn ComConnector>) {
        *self.com_connector.write() = Some(connector);
    }

    pub fn directive_processors(&self) -> Vec<Arc<dyn DirectiveProcessor>> {
        self.directive_processors.read().clone()
    }

    pub fn statement_processors(&self) -> Vec<Arc<dyn StatementProcessor>> {
        self.statement_processors.read().clone()
    }

    pub fn line_processors(&self) -> Vec<Arc<dyn LineProcessor>> {
        self.line_processors.read().clone()
    }

    pub fn macro_providers(&self) -> Vec<Arc<dyn MacroProvider>> {
        self.macro_providers.read().clone()
    }

    pub fn pragma_processors(&self) -> Vec<Arc<dyn PragmaProcessor>> {
        self.pragma_processors.read().clone()
    }

    pub fn include_resolvers(&self) -> Vec<Arc<dyn IncludeResolver>> {
        self.include_resolvers.read().clone()
    }

    pub fn script_scanner(&self) -> Option<Arc<dyn ScriptScanner>> {
        self.script_scanner.read().clone()
    }

    pub fn expression_solver(&self) -> Option<Arc<dyn ExpressionSolver>> {
        self.expression_solver.read().clone()
    }

    pub fn com_connector(&self) -> Option<Arc<dyn ComConnector>> {
        self.com_connector.read().clone()
    }

    /// Resolve a macro value on behalf of the given thread.
    pub fn resolve_macro(
        &self,
        thread: &mut ExecutionThread,
        name: &str,
    ) -> Option<Variant> {
        let providers = self.macro_providers();
        self.macros
            .resolve(thread, &providers, name)
            .map(|(value, _)| value)
    }

    /// Forward text to the installed print handler.
    pub fn print(&self, text: &str) {
        self.print_handler.read().print(text);
    }

    /// Render a fatal error through the installed message catalog.
    pub fn render_error(&self, error: &InterpreterError) -> String {
        error.render(&**self.catalog.read())
    }

    /// Store a named runtime option and return the previous value.
    pub fn set_runtime_option(&self, name: &str, value: Variant) -> Variant {
        self.runtime_options
            .lock()
            .insert(name.to_uppercase(), value)
            .unwrap_or_else(Variant::null)
    }

    pub fn runtime_option(&self, name: &str) -> Option<Variant> {
        self.runtime_options.lock().get(&name.to_uppercase()).cloned()
    }

    /// Next value of the random-number stream, uniform in `[0, 1)`.
    pub fn random(&self) -> f64 {
        self.rng.lock().r#gen::<f64>()
    }

    /// Reseed the random-number stream; `None` reseeds from entropy.
    pub fn reseed(&self, seed: Option<u64>) {
        *self.rng.lock() = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.objects.clear();
        self.global_scope.dispose();
        log::debug!("interpreter disposed");
    }
}

impl ValueBridge for Interpreter {
    fn handle_get_index(&self, id: i64, index: &Variant) -> Option<Variant> {
        self.objects.try_get(id)?.get_index(index)
    }

    fn handle_set_index(&self, id: i64, index: &Variant, value: Variant) -> bool {
        self.objects
            .try_get(id)
            .map(|object| object.set_index(index, value))
            .unwrap_or(false)
    }

    fn handle_get_member(&self, id: i64, member: &str) -> Option<Variant> {
        self.objects.try_get(id)?.get_member(member)
    }

    fn handle_set_member(&self, id: i64, member: &str, value: Variant) -> bool {
        self.objects
            .try_get(id)
            .map(|object| object.set_member(member, value))
            .unwrap_or(false)
    }

    fn handle_invoke_member(&self, id: i64, member: &str, args: &[Variant]) -> Option<Variant> {
        self.objects.try_get(id)?.invoke_member(member, args)
    }

    fn com_get_index(&self, id: u32, index: &Variant) -> Option<Variant> {
        self.com_connector()?.get_index(id, index)
    }

    fn com_set_index(&self, id: u32, index: &Variant, value: Variant) -> bool {
        self.com_connector()
            .map(|connector| connector.set_index(id, index, value))
            .unwrap_or(false)
    }

    fn com_get_member(&self, id: u32, member: &str) -> Option<Variant> {
        self.com_connector()?.get_member(id, member)
    }

    fn com_set_member(&self, id: u32, member: &str, value: Variant) -> bool {
        self.com_connector()
            .map(|connector| connector.set_member(id, member, value))
            .unwrap_or(false)
    }

    fn com_invoke_member(&self, id: u32, member: &str, args: &[Variant]) -> Option<Variant> {
        self.com_connector()?.invoke_member(id, member, args)
    }
}
