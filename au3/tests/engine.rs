//! Integration tests for the execution engine
//!
//! Drives whole scripts through the statement pipeline using a small
//! expression solver implemented below. The solver covers literals,
//! variables, macros, function calls and one level of binary
//! operators: enough to exercise the engine end-to-end without
//! pulling a full grammar into the runtime.

use au3::error::{FunctionReturnValue, InterpreterError};
use au3::plugin::{
    AssignTarget, BufferPrintHandler, DeclaredVariable, ExpressionSolver, IncludeResolver,
    LineAst, MacroMetadata, MacroProvider, PrintHandler, ScriptScanner,
};
use au3::{
    ExecutionThread, Function, Interpreter, NativeFunction, ParameterDeclaration, Script,
    SearchScope, SourceLocation, Variant,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================
// Test expression solver
// ============================================

struct TestSolver;

impl TestSolver {
    /// Find the rightmost top-level occurrence of any of `ops`,
    /// skipping quoted strings and parenthesized groups.
    fn find_operator(expr: &str, ops: &[char]) -> Option<usize> {
        let bytes: Vec<char> = expr.chars().collect();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut found = None;
        for (i, &c) in bytes.iter().enumerate() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '(' | '[' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    c if depth == 0 && ops.contains(&c) => {
                        // not a unary sign: something evaluable must precede
                        let prefix: String = bytes[..i].iter().collect();
                        if !prefix.trim().is_empty()
                            && !prefix.trim_end().ends_with(['+', '-', '*', '/', '&', ','])
                        {
                            found = Some(prefix.len());
                        }
                    }
                    _ => {}
                },
            }
        }
        found
    }

    fn split_arguments(text: &str) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        for c in text.chars() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                    current.push(c);
                }
                None => match c {
                    '"' | '\'' => {
                        quote = Some(c);
                        current.push(c);
                    }
                    '(' | '[' => {
                        depth += 1;
                        current.push(c);
                    }
                    ')' | ']' => {
                        depth = depth.saturating_sub(1);
                        current.push(c);
                    }
                    ',' if depth == 0 => {
                        args.push(current.trim().to_string());
                        current = String::new();
                    }
                    _ => current.push(c),
                },
            }
        }
        if !current.trim().is_empty() {
            args.push(current.trim().to_string());
        }
        args
    }

    fn parse_error(message: &str) -> InterpreterError {
        InterpreterError::new(None, "error.expression_syntax", vec![message.to_string()])
    }

    fn eval_atom(&self, thread: &mut ExecutionThread, expr: &str) -> FunctionReturnValue {
        let expr = expr.trim();
        if expr.is_empty() {
            return FunctionReturnValue::fatal(Self::parse_error("empty expression"));
        }

        if let Some(inner) = expr
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .or_else(|| expr.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        {
            return FunctionReturnValue::success(Variant::from_string(inner));
        }

        match expr.to_lowercase().as_str() {
            "true" => return FunctionReturnValue::success(Variant::from_boolean(true)),
            "false" => return FunctionReturnValue::success(Variant::from_boolean(false)),
            "null" => return FunctionReturnValue::success(Variant::null()),
            "default" => return FunctionReturnValue::success(Variant::default_value()),
            _ => {}
        }

        if let Some(name) = expr.strip_prefix('$') {
            return match thread.current_scope().resolve(name, SearchScope::Global) {
                Some(variable) => FunctionReturnValue::success(variable.value()),
                None => FunctionReturnValue::fatal(InterpreterError::well_known(
                    thread.current_location(),
                    "error.undeclared_variable",
                    [name],
                )),
            };
        }

        if let Some(name) = expr.strip_prefix('@') {
            let interpreter = Arc::clone(thread.interpreter());
            return match interpreter.resolve_macro(thread, name) {
                Some(value) => FunctionReturnValue::success(value),
                None => FunctionReturnValue::fatal(Self::parse_error(&format!("@{name}"))),
            };
        }

        if let Some((name, rest)) = expr.split_once('(') {
            let name = name.trim();
            if !name.is_empty()
                && name.chars().all(|c| c.is_alphanumeric() || c == '_')
                && rest.ends_with(')')
            {
                let mut args = Vec::new();
                for argument in Self::split_arguments(&rest[..rest.len() - 1]) {
                    match self.eval(thread, &argument) {
                        FunctionReturnValue::Success { value, .. } => args.push(value),
                        other => return other,
                    }
                }
                let Some(function) = thread.interpreter().resolver().lookup(name) else {
                    return FunctionReturnValue::fatal(InterpreterError::well_known(
                        thread.current_location(),
                        "error.unknown_function",
                        [name],
                    ));
                };
                return thread.call(&function, &args);
            }
        }

        let number = Variant::from_string(expr);
        let first = expr.chars().next().unwrap_or(' ');
        if first.is_ascii_digit() || first == '-' || first == '+' || first == '.' {
            return FunctionReturnValue::success(Variant::from_number(number.to_number()));
        }
        FunctionReturnValue::fatal(Self::parse_error(expr))
    }
}

impl ExpressionSolver for TestSolver {
    fn parse(&self, line: &str) -> Result<LineAst, InterpreterError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(Self::parse_error("empty statement"));
        }

        if line.starts_with('$') && Self::find_operator(line, &[',']).is_some() {
            let mut declarations = Vec::new();
            for part in Self::split_arguments(line) {
                let (name, initializer) = match part.split_once('=') {
                    Some((name, expr)) => (name.trim(), Some(expr.trim().to_string())),
                    None => (part.trim(), None),
                };
                let Some(name) = name.strip_prefix('$') else {
                    return Err(Self::parse_error(&part));
                };
                declarations.push(DeclaredVariable {
                    name: name.to_string(),
                    initializer,
                });
            }
            return Ok(LineAst::Declarations(declarations));
        }

        if line.starts_with('$') {
            if let Some(at) = Self::find_operator(line, &['=']) {
                let lhs = line[..at].trim();
                let expr = line[at + 1..].trim().to_string();
                let target = if let Some((base, index)) = lhs
                    .split_once('[')
                    .and_then(|(b, r)| r.strip_suffix(']').map(|i| (b, i)))
                {
                    AssignTarget::Indexed {
                        variable: base.trim_start_matches('$').to_string(),
                        index: index.to_string(),
                    }
                } else if let Some((base, member)) = lhs.split_once('.') {
                    AssignTarget::Member {
                        variable: base.trim_start_matches('$').to_string(),
                        member: member.to_string(),
                    }
                } else {
                    AssignTarget::Variable(lhs.trim_start_matches('$').to_string())
                };
                return Ok(LineAst::Assignment { target, expr });
            }
            return Ok(LineAst::Declarations(vec![DeclaredVariable {
                name: line.trim_start_matches('$').to_string(),
                initializer: None,
            }]));
        }

        Ok(LineAst::Expression(line.to_string()))
    }

    fn eval(&self, thread: &mut ExecutionThread, expr: &str) -> FunctionReturnValue {
        let expr = expr.trim();
        for ops in [&['&'][..], &['+', '-'][..], &['*', '/'][..]] {
            if let Some(at) = Self::find_operator(expr, ops) {
                let op = expr[at..].chars().next().unwrap();
                let lhs = match self.eval(thread, &expr[..at]) {
                    FunctionReturnValue::Success { value, .. } => value,
                    other => return other,
                };
                let rhs = match self.eval(thread, &expr[at + op.len_utf8()..]) {
                    FunctionReturnValue::Success { value, .. } => value,
                    other => return other,
                };
                let value = match op {
                    '&' => lhs.concat(&rhs),
                    '+' => &lhs + &rhs,
                    '-' => &lhs - &rhs,
                    '*' => &lhs * &rhs,
                    '/' => &lhs / &rhs,
                    _ => unreachable!(),
                };
                return FunctionReturnValue::success(value);
            }
        }
        self.eval_atom(thread, expr)
    }
}

// ============================================
// Helpers
// ============================================

fn test_interpreter() -> (Arc<Interpreter>, Arc<BufferPrintHandler>) {
    let interpreter = Interpreter::new();
    interpreter.set_expression_solver(Arc::new(TestSolver));
    let output = Arc::new(BufferPrintHandler::new());
    let handler: Arc<dyn PrintHandler> = output.clone();
    interpreter.set_print_handler(handler);
    (interpreter, output)
}

fn loc(line: usize) -> SourceLocation {
    SourceLocation::new("test.au3", line)
}

/// Build a script whose entry function holds the given lines.
fn script_with_lines(lines: &[&str]) -> Arc<Script> {
    let script = Script::new("test.au3");
    let entry = script.entry_function();
    for (i, line) in lines.iter().enumerate() {
        entry.add_line(loc(i), *line);
    }
    script
}

fn run_lines(lines: &[&str]) -> (au3::InterpreterResult, Arc<Interpreter>, Arc<BufferPrintHandler>) {
    let (interpreter, output) = test_interpreter();
    let script = script_with_lines(lines);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    (result, interpreter, output)
}

fn global_number(interpreter: &Arc<Interpreter>, name: &str) -> Option<f64> {
    interpreter
        .global_scope()
        .resolve(name, SearchScope::Local)
        .map(|v| v.value().to_number())
}

// ============================================
// End-to-end execution
// ============================================

#[test]
fn test_two_line_script_assigns_through_scope() {
    let (result, interpreter, _) = run_lines(&["$x = 1", "$y = $x + 2"]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "y"), Some(3.0));
}

#[test]
fn test_blank_lines_are_skipped() {
    let (result, interpreter, _) = run_lines(&["", "   ", "$x = 5", ""]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "x"), Some(5.0));
}

#[test]
fn test_unparsable_line_is_fatal() {
    let (result, _, _) = run_lines(&["?!?"]);
    let error = result.error.unwrap();
    assert_eq!(error.key, "error.expression_syntax");
}

#[test]
fn test_console_write_reaches_print_handler() {
    let (result, _, output) = run_lines(&["ConsoleWrite(\"hello\")", "ConsoleWrite(\"!\")"]);
    assert!(result.is_ok());
    assert_eq!(output.output(), "hello!");
}

#[test]
fn test_string_concatenation_operator() {
    let (result, interpreter, _) = run_lines(&["$s = \"a\" & 1 & True"]);
    assert!(result.is_ok());
    let s = interpreter
        .global_scope()
        .resolve("s", SearchScope::Local)
        .unwrap()
        .value();
    assert_eq!(s.to_string(), "a1True");
}

// ============================================
// Declarations and constants
// ============================================

#[test]
fn test_const_assignment_is_fatal_and_preserves_value() {
    let (result, interpreter, _) = run_lines(&["const $c = 1", "$c = 2"]);
    let error = result.error.unwrap();
    assert_eq!(error.key, "error.constant_assignment");
    assert_eq!(global_number(&interpreter, "c"), Some(1.0));
}

#[test]
fn test_const_redeclaration_is_fatal() {
    let (result, interpreter, _) = run_lines(&["const $c = 1", "local $c = 2"]);
    assert_eq!(result.error.unwrap().key, "error.constant_redeclaration");
    assert_eq!(global_number(&interpreter, "c"), Some(1.0));
}

#[test]
fn test_const_requires_initializer() {
    let (result, _, _) = run_lines(&["const $c"]);
    assert_eq!(result.error.unwrap().key, "error.uninitialized_constant");
}

#[test]
fn test_conflicting_modifiers_are_fatal() {
    let (result, _, _) = run_lines(&["dim global $x = 1"]);
    assert_eq!(result.error.unwrap().key, "error.conflicting_modifiers");
}

#[test]
fn test_multi_declaration_list() {
    let (result, interpreter, _) = run_lines(&["local $a = 1, $b, $c = 3"]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "a"), Some(1.0));
    assert_eq!(global_number(&interpreter, "c"), Some(3.0));
    let b = interpreter
        .global_scope()
        .resolve("b", SearchScope::Local)
        .unwrap();
    assert!(b.value().is_null());
}

#[test]
fn test_global_modifier_targets_root_scope() {
    // inside a function, "global" declares at the root
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let f = script.add_function("Setup", Vec::new()).unwrap();
    f.add_line(loc(10), "global $shared = 42");
    f.add_line(loc(11), "local $private = 1");
    interpreter.resolver().register_script(&script);

    let entry = script.entry_function();
    entry.add_line(loc(0), "Setup()");
    let result = interpreter.run(&Function::Script(entry), &[]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "shared"), Some(42.0));
    // the local died with the function's scope
    assert!(interpreter
        .global_scope()
        .resolve("private", SearchScope::Local)
        .is_none());
}

// ============================================
// Block statements
// ============================================

#[test]
fn test_block_mismatch_reports_unmatched_opener() {
    let (result, _, _) = run_lines(&["for $i = 0 to 3", "wend"]);
    let error = result.error.unwrap();
    assert_eq!(error.key, "error.no_matching_close");
    assert_eq!(error.location.as_ref().unwrap().line(), 1);
    // names the opener and where it was opened
    assert!(error.args[1].contains("for"));
    assert!(error.args[1].contains("line 1"));
}

#[test]
fn test_matched_blocks_pass() {
    let (result, _, _) = run_lines(&[
        "while 1",
        "select",
        "endselect",
        "wend",
        "with $x",
        "endwith",
    ]);
    assert!(result.is_ok());
}

#[test]
fn test_close_without_open_is_fatal() {
    let (result, _, _) = run_lines(&["next"]);
    assert_eq!(result.error.unwrap().key, "error.no_matching_close");
}

#[test]
fn test_exitloop_pops_loop_markers() {
    let (result, _, _) = run_lines(&["for $i = 0 to 3", "while 1", "exitloop 2"]);
    assert!(result.is_ok());
}

#[test]
fn test_continueloop_skips_non_loop_markers() {
    // the select marker between the loops is discarded on the way out
    let (result, _, _) = run_lines(&["while 1", "select", "continueloop"]);
    assert!(result.is_ok());
}

#[test]
fn test_exitloop_beyond_nesting_is_fatal() {
    let (result, _, _) = run_lines(&["while 1", "exitloop 2"]);
    assert_eq!(result.error.unwrap().key, "error.unmatched_loop_control");
}

#[test]
fn test_invalid_loop_count_is_fatal() {
    let (result, _, _) = run_lines(&["while 1", "exitloop zero"]);
    assert_eq!(result.error.unwrap().key, "error.invalid_loop_count");
}

// ============================================
// Functions and the call stack
// ============================================

#[test]
fn test_call_stack_balances_after_deep_fatal() {
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let level1 = script.add_function("Level1", Vec::new()).unwrap();
    level1.add_line(loc(10), "Level2()");
    let level2 = script.add_function("Level2", Vec::new()).unwrap();
    level2.add_line(loc(20), "Level3()");
    let level3 = script.add_function("Level3", Vec::new()).unwrap();
    level3.add_line(loc(30), "#failhard");
    interpreter.resolver().register_script(&script);

    let mut thread = interpreter.create_thread();
    let before = thread.call_depth();
    let result = thread.call(&Function::Script(level1), &[]);
    assert!(result.is_fatal());
    assert_eq!(thread.call_depth(), before);
}

#[test]
fn test_nested_calls_and_parameters() {
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let double = script
        .add_function("Double", vec![ParameterDeclaration::required("$n")])
        .unwrap();
    double.add_line(loc(10), "$result = $n * 2");
    interpreter.resolver().register_script(&script);

    let entry = script.entry_function();
    entry.add_line(loc(0), "Double(21)");
    let result = interpreter.run(&Function::Script(entry), &[]);
    assert!(result.is_ok());
    // $result was declared inside Double's scope, which is gone
    assert!(interpreter
        .global_scope()
        .resolve("result", SearchScope::Local)
        .is_none());
}

#[test]
fn test_arity_errors() {
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let f = script
        .add_function(
            "F",
            vec![
                ParameterDeclaration::required("$a"),
                ParameterDeclaration::optional("$b", Variant::from_number(0.0)),
            ],
        )
        .unwrap();
    interpreter.resolver().register_script(&script);
    let f = Function::Script(f);

    let mut thread = interpreter.create_thread();
    let too_few = thread.call(&f, &[]);
    assert_eq!(too_few.as_fatal().unwrap().key, "error.not_enough_args");
    let too_many = thread.call(
        &f,
        &[
            Variant::from_number(1.0),
            Variant::from_number(2.0),
            Variant::from_number(3.0),
        ],
    );
    assert_eq!(too_many.as_fatal().unwrap().key, "error.too_many_args");
    let just_right = thread.call(&f, &[Variant::from_number(1.0)]);
    assert!(just_right.is_success());
}

#[test]
fn test_by_ref_parameter_mutates_caller_variable() {
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let inc = script
        .add_function("Inc", vec![ParameterDeclaration::by_ref("$n")])
        .unwrap();
    inc.add_line(loc(10), "$n = $n + 1");
    interpreter.resolver().register_script(&script);

    let variable =
        interpreter
            .global_scope()
            .create_variable(SourceLocation::unknown(), "$v", false);
    variable.set_value(Variant::from_number(5.0));

    let mut thread = interpreter.create_thread();
    let result = thread.call(
        &Function::Script(inc),
        &[Variant::from_reference(Arc::clone(&variable))],
    );
    assert!(result.is_success());
    assert_eq!(variable.value(), Variant::from_number(6.0));
}

#[test]
fn test_reentrant_start_is_rejected() {
    let (interpreter, _) = test_interpreter();
    let script = Script::new("test.au3");
    let entry = Function::Script(script.entry_function());

    let inner = entry.clone();
    let reenter = NativeFunction::fixed_arity("Reenter", 0, move |thread, _| {
        thread.start(&inner, &[])
    });
    interpreter.resolver().register(Function::Native(reenter));

    let trigger = script.add_function("Trigger", Vec::new()).unwrap();
    trigger.add_line(loc(10), "Reenter()");
    interpreter.resolver().register_script(&script);

    let mut thread = interpreter.create_thread();
    let result = thread.start(&Function::Script(trigger), &[]);
    assert_eq!(
        result.as_fatal().unwrap().key,
        "error.thread_already_running"
    );
    assert_eq!(thread.call_depth(), 0);
}

// ============================================
// Error channel and macros
// ============================================

#[test]
fn test_set_error_is_observable_through_macro() {
    let (result, interpreter, _) = run_lines(&["SetError(3)", "$e = @error"]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "e"), Some(3.0));
}

#[test]
fn test_error_code_resets_on_next_call() {
    let (result, interpreter, _) =
        run_lines(&["SetError(3)", "Abs(1)", "$e = @error"]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "e"), Some(0.0));
}

#[test]
fn test_error_kind_result_does_not_abort_frame() {
    // UBound on a non-array reports through the error channel
    let (result, interpreter, _) =
        run_lines(&["UBound(1)", "$e = @error", "$after = 1"]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "e"), Some(1.0));
    assert_eq!(global_number(&interpreter, "after"), Some(1.0));
}

#[test]
fn test_character_macros() {
    let (result, interpreter, _) = run_lines(&["$s = \"a\" & @CRLF & \"b\""]);
    assert!(result.is_ok());
    let s = interpreter
        .global_scope()
        .resolve("s", SearchScope::Local)
        .unwrap()
        .value();
    assert_eq!(s.to_string(), "a\r\nb");
}

struct CustomMacros;

impl MacroProvider for CustomMacros {
    fn provide(
        &self,
        _thread: &mut ExecutionThread,
        name: &str,
    ) -> Option<(Variant, MacroMetadata)> {
        match name.to_uppercase().as_str() {
            "CRLF" => Some((Variant::from_string("provider"), MacroMetadata::default())),
            "BUILDTAG" => Some((Variant::from_string("v2"), MacroMetadata::default())),
            _ => None,
        }
    }
}

#[test]
fn test_macro_providers_follow_known_macros() {
    let (interpreter, _) = test_interpreter();
    interpreter.register_macro_provider(Arc::new(CustomMacros));

    let script = script_with_lines(&["$a = @BuildTag", "$b = @crlf"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    let a = interpreter
        .global_scope()
        .resolve("a", SearchScope::Local)
        .unwrap()
        .value();
    assert_eq!(a.to_string(), "v2");
    // the built-in definition wins over the provider
    let b = interpreter
        .global_scope()
        .resolve("b", SearchScope::Local)
        .unwrap()
        .value();
    assert_eq!(b.to_string(), "\r\n");
}

#[test]
fn test_seeded_random_is_deterministic() {
    let (_, interpreter_a, _) = run_lines(&["SRandom(42)", "$r = Random()"]);
    let (_, interpreter_b, _) = run_lines(&["SRandom(42)", "$r = Random()"]);
    let a = global_number(&interpreter_a, "r").unwrap();
    let b = global_number(&interpreter_b, "r").unwrap();
    assert_eq!(a, b);
    assert!((0.0..1.0).contains(&a));
}

#[test]
fn test_ubound_on_host_created_array() {
    let (interpreter, _) = test_interpreter();
    let array = interpreter
        .global_scope()
        .create_variable(SourceLocation::unknown(), "$arr", false);
    array.set_value(Variant::from_array(vec![
        Variant::from_number(1.0),
        Variant::from_number(2.0),
        Variant::from_number(3.0),
    ]));

    let script = script_with_lines(&["$n = UBound($arr)"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "n"), Some(3.0));
}

#[test]
fn test_indexed_assignment_through_pipeline() {
    let (interpreter, _) = test_interpreter();
    let array = interpreter
        .global_scope()
        .create_variable(SourceLocation::unknown(), "$arr", false);
    array.set_value(Variant::new_array(3));

    let script = script_with_lines(&["$arr[1] = 7", "$x = UBound($arr)"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    let held = array.value();
    assert_eq!(
        held.try_get_indexed(&au3::value::NullBridge, &Variant::from_number(1.0)),
        Some(Variant::from_number(7.0))
    );
}

#[test]
fn test_out_of_range_indexed_assignment_sets_error() {
    let (interpreter, _) = test_interpreter();
    let array = interpreter
        .global_scope()
        .create_variable(SourceLocation::unknown(), "$arr", false);
    array.set_value(Variant::new_array(2));

    let script = script_with_lines(&["$arr[9] = 7", "$e = @error"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    assert_eq!(global_number(&interpreter, "e"), Some(1.0));
}

// ============================================
// Memoization
// ============================================

#[test]
fn test_cached_function_skips_reexecution() {
    let (interpreter, output) = test_interpreter();
    let script = Script::new("test.au3");
    let f = script
        .add_function("Trace", vec![ParameterDeclaration::required("$x")])
        .unwrap();
    f.add_line(loc(10), "ConsoleWrite(\"run\")");
    f.set_cached(true);
    interpreter.resolver().register_script(&script);
    let f = Function::Script(f);

    let mut thread = interpreter.create_thread();
    let one = Variant::from_number(1.0);
    let two = Variant::from_number(2.0);
    assert!(thread.call(&f, &[one.clone()]).is_success());
    assert!(thread.call(&f, &[one.clone()]).is_success());
    assert_eq!(output.output(), "run");
    assert!(thread.call(&f, &[two]).is_success());
    assert_eq!(output.output(), "runrun");
}

// ============================================
// Stop and exit codes
// ============================================

#[test]
fn test_stop_overrides_exit_code() {
    let (interpreter, _) = test_interpreter();
    let quit = NativeFunction::fixed_arity("Quit", 1, |thread, args| {
        thread.stop(args[0].to_number() as i32);
        FunctionReturnValue::success(Variant::null())
    });
    interpreter.resolver().register(Function::Native(quit));

    let script = script_with_lines(&["Quit(7)", "$after = 1"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert_eq!(result.exit_code, 7);
    assert!(result.error.is_none());
    // the line after the stop never ran
    assert!(interpreter
        .global_scope()
        .resolve("after", SearchScope::Local)
        .is_none());
}

// ============================================
// Includes
// ============================================

struct MapResolver(PathBuf);

impl IncludeResolver for MapResolver {
    fn try_resolve(&self, path: &str, _relative_to: Option<&Path>) -> Option<PathBuf> {
        (path == "lib.au3").then(|| self.0.clone())
    }
}

struct LibScanner;

impl ScriptScanner for LibScanner {
    fn scan(&self, path: &Path) -> Result<Arc<Script>, InterpreterError> {
        let script = Script::new(path);
        let entry = script.entry_function();
        entry.add_line(SourceLocation::new(path, 0), "ConsoleWrite(\"L\")");
        entry.add_line(SourceLocation::new(path, 1), "$libloaded = 1");
        Ok(script)
    }
}

#[test]
fn test_include_runs_library_entry() {
    let (interpreter, output) = test_interpreter();
    interpreter.register_include_resolver(Arc::new(MapResolver(PathBuf::from("lib.au3"))));
    interpreter.set_script_scanner(Arc::new(LibScanner));

    let script = script_with_lines(&["#include \"lib.au3\"", "$x = $libloaded + 1"]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    assert_eq!(output.output(), "L");
    assert_eq!(global_number(&interpreter, "x"), Some(2.0));
}

#[test]
fn test_include_once_skips_second_include() {
    let (interpreter, output) = test_interpreter();
    interpreter.register_include_resolver(Arc::new(MapResolver(PathBuf::from("lib.au3"))));
    interpreter.set_script_scanner(Arc::new(LibScanner));

    let script = script_with_lines(&[
        "#include-once \"lib.au3\"",
        "#include-once \"lib.au3\"",
    ]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert!(result.is_ok());
    assert_eq!(output.output(), "L");
}

#[test]
fn test_unresolved_include_is_fatal() {
    let (interpreter, _) = test_interpreter();
    interpreter.set_script_scanner(Arc::new(LibScanner));
    let script = script_with_lines(&["#include \"missing.au3\""]);
    let result = interpreter.run(&Function::Script(script.entry_function()), &[]);
    assert_eq!(result.error.unwrap().key, "error.unresolved_include");
}

// ============================================
// Startup hooks
// ============================================

#[test]
fn test_startup_hook_runs_before_first_line() {
    let (interpreter, output) = test_interpreter();
    let script = Script::new("test.au3");
    let hook = script.add_function("OnStart", Vec::new()).unwrap();
    hook.add_line(loc(10), "ConsoleWrite(\"hook;\")");
    script.register_startup_function("OnStart");
    interpreter.resolver().register_script(&script);

    let entry = script.entry_function();
    entry.add_line(loc(0), "ConsoleWrite(\"body\")");
    let result = interpreter.run(&Function::Script(entry), &[]);
    assert!(result.is_ok());
    assert_eq!(output.output(), "hook;body");
}
