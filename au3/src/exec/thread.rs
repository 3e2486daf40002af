//! Execution threads and the call-stack algorithm
//!
//! One `ExecutionThread` drives one call stack on one native thread of
//! control. `start` guards against re-entrant use, `call` implements
//! the push/execute/unwind-to-previous algorithm that keeps the stack
//! balanced on every exit path, including fatal errors raised several
//! frames deep.

use crate::error::{FunctionReturnValue, InterpreterError};
use crate::exec::frame::CallFrame;
use crate::function::Function;
use crate::interpreter::Interpreter;
use crate::location::SourceLocation;
use crate::scope::VariableScope;
use crate::value::Variant;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared thread bookkeeping the interpreter's registry holds on to:
/// the cooperative stop flag and the exit-code override.
pub(crate) struct ThreadState {
    id: u32,
    stop_requested: AtomicBool,
    exit_code: Mutex<Option<i32>>,
}

impl ThreadState {
    pub(crate) fn new(id: u32) -> Arc<Self> {
        Arc::new(ThreadState {
            id,
            stop_requested: AtomicBool::new(false),
            exit_code: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Ask the thread to stop between lines, optionally overriding its
    /// exit code. Never interrupts mid-line.
    pub(crate) fn request_stop(&self, exit_code: Option<i32>) {
        if let Some(code) = exit_code {
            *self.exit_code.lock() = Some(code);
        }
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn exit_code_override(&self) -> Option<i32> {
        *self.exit_code.lock()
    }
}

/// Resets the running flag on every exit path.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One independent call stack plus its run/idle state.
pub struct ExecutionThread {
    id: u32,
    interpreter: Arc<Interpreter>,
    frames: Vec<CallFrame>,
    running: Arc<AtomicBool>,
    state: Arc<ThreadState>,
    error_code: i32,
    extended: Variant,
}

impl ExecutionThread {
    pub(crate) fn new(interpreter: Arc<Interpreter>, state: Arc<ThreadState>) -> Self {
        let id = state.id();
        log::debug!("thread 0x{id:04x} created");
        ExecutionThread {
            id,
            interpreter,
            frames: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            state,
            error_code: 0,
            extended: Variant::null(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_main_thread(&self) -> bool {
        self.interpreter.main_thread_id() == Some(self.id)
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    /// The scope new work executes in: the top frame's scope, or the
    /// global scope while the stack is empty.
    pub fn current_scope(&self) -> Arc<VariableScope> {
        match self.frames.last() {
            Some(frame) => Arc::clone(frame.scope()),
            None => Arc::clone(self.interpreter.global_scope()),
        }
    }

    /// Location of the currently executed line, from the topmost
    /// script frame.
    pub fn current_location(&self) -> Option<SourceLocation> {
        self.frames.iter().rev().find_map(CallFrame::current_location)
    }

    pub fn current_function(&self) -> Option<&Function> {
        self.frames.last().map(CallFrame::function)
    }

    /// The script-observable error code set by the last recoverable
    /// error or `SetError` call.
    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn extended(&self) -> Variant {
        self.extended.clone()
    }

    pub fn set_error_state(&mut self, code: i32, extended: Variant) {
        self.error_code = code;
        self.extended = extended;
    }

    /// Ask this thread to stop cooperatively with the given exit code.
    pub fn stop(&self, exit_code: i32) {
        self.state.request_stop(Some(exit_code));
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.state.is_stop_requested()
    }

    /// Run a function on this thread. Fails with a well-known error if
    /// the thread is already running; the running flag resets on every
    /// exit path.
    pub fn start(&mut self, function: &Function, args: &[Variant]) -> FunctionReturnValue {
        if self.running.swap(true, Ordering::SeqCst) {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                self.current_location(),
                "error.thread_already_running",
                [format!("{:04x}", self.id)],
            ));
        }
        let _guard = RunningGuard(Arc::clone(&self.running));

        let result = self.call(function, args);

        if let Some(code) = self.state.exit_code_override() {
            return FunctionReturnValue::success(Variant::from_number(code as f64));
        }
        result
    }

    /// Invoke a function on this thread's call stack.
    ///
    /// Pushes a frame, executes it, then pops back down to the
    /// pre-call top — even when the executed frame left nested frames
    /// behind after an early fatal return.
    pub fn call(&mut self, function: &Function, args: &[Variant]) -> FunctionReturnValue {
        crate::exec::ensure_sufficient_stack(|| self.call_inner(function, args))
    }

    fn call_inner(&mut self, function: &Function, args: &[Variant]) -> FunctionReturnValue {
        let options = self.interpreter.options();
        if self.frames.len() >= options.max_call_depth {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                self.current_location(),
                "error.maximum_recursion",
                [options.max_call_depth],
            ));
        }

        let (min, max) = function.parameter_count();
        if args.len() < min {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                self.current_location(),
                "error.not_enough_args",
                [function.name().to_string(), min.to_string(), args.len().to_string()],
            ));
        }
        if args.len() > max {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                self.current_location(),
                "error.too_many_args",
                [function.name().to_string(), max.to_string(), args.len().to_string()],
            ));
        }

        let memoized = options.cache_enabled
            && function
                .as_script()
                .map(|f| f.is_cached())
                .unwrap_or(false);
        if memoized {
            if let Some(hit) = self.interpreter.cache().try_fetch(function, args) {
                return hit;
            }
        }

        // a fresh call starts with a clean error/extended state
        self.set_error_state(0, Variant::null());

        let previous_depth = self.frames.len();
        let scope = if function.is_entry() {
            self.current_scope()
        } else {
            self.current_scope().create_child(function.name())
        };
        let frame = CallFrame::new(function.clone(), scope, !function.is_entry(), args.len());
        log::trace!(
            "thread 0x{:04x}: push frame {} (depth {})",
            self.id,
            function.name(),
            previous_depth + 1
        );
        self.frames.push(frame);

        let result = match function {
            Function::Script(f) => {
                let f = Arc::clone(f);
                self.execute_script_frame(&f, args)
            }
            Function::Native(f) => {
                let f = Arc::clone(f);
                f.execute(self, args)
            }
        };

        while self.frames.len() > previous_depth {
            self.exit_call();
        }

        if memoized && !result.is_fatal() {
            self.interpreter
                .cache()
                .set_or_update(function, args, result.clone());
        }
        result
    }

    /// Pop and dispose the top frame.
    fn exit_call(&mut self) {
        if let Some(frame) = self.frames.pop() {
            log::trace!(
                "thread 0x{:04x}: pop frame {} (depth {})",
                self.id,
                frame.function().name(),
                self.frames.len()
            );
            frame.dispose();
        }
    }
}

impl Drop for ExecutionThread {
    fn drop(&mut self) {
        while let Some(frame) = self.frames.pop() {
            frame.dispose();
        }
        assert!(
            self.frames.is_empty(),
            "call stack must be empty at thread disposal"
        );
        self.interpreter.remove_thread(self.id);
        log::debug!("thread 0x{:04x} disposed", self.id);
    }
}
