//! Call frames and the per-line statement pipeline
//!
//! Every non-blank line routes through an ordered pipeline: directive
//! handling, block-statement bookkeeping, external processors and
//! finally the expression/declaration fallback. The first handler that
//! produces a result wins; a line no handler claims is an error.

use crate::error::{FunctionReturnValue, InterpreterError};
use crate::exec::ExecutionThread;
use crate::function::{Function, ScriptFunction};
use crate::location::SourceLocation;
use crate::plugin::{AssignTarget, DeclaredVariable, ExpressionSolver, LineAst};
use crate::scope::{SearchScope, VariableScope};
use crate::value::Variant;
use std::sync::Arc;

/// Kinds of block statements tracked on a frame's marker stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    For,
    While,
    With,
    Select,
    Switch,
}

impl BlockKind {
    fn from_opener(word: &str) -> Option<BlockKind> {
        match word {
            "for" => Some(BlockKind::For),
            "while" => Some(BlockKind::While),
            "with" => Some(BlockKind::With),
            "select" => Some(BlockKind::Select),
            "switch" => Some(BlockKind::Switch),
            _ => None,
        }
    }

    fn expected_by_closer(word: &str) -> Option<BlockKind> {
        match word {
            "next" => Some(BlockKind::For),
            "wend" => Some(BlockKind::While),
            "endwith" => Some(BlockKind::With),
            "endselect" => Some(BlockKind::Select),
            "endswitch" => Some(BlockKind::Switch),
            _ => None,
        }
    }

    pub fn is_loop(self) -> bool {
        matches!(self, BlockKind::For | BlockKind::While)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            BlockKind::For => "for",
            BlockKind::While => "while",
            BlockKind::With => "with",
            BlockKind::Select => "select",
            BlockKind::Switch => "switch",
        }
    }
}

/// An open block statement: its kind plus where it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMarker {
    pub kind: BlockKind,
    pub location: SourceLocation,
}

/// One activation record: a function bound to a scope and, for script
/// functions, an instruction pointer into the cached line array.
pub struct CallFrame {
    function: Function,
    scope: Arc<VariableScope>,
    owns_scope: bool,
    lines: Vec<(SourceLocation, String)>,
    instruction_pointer: usize,
    block_stack: Vec<BlockMarker>,
    num_args: usize,
}

impl CallFrame {
    pub(crate) fn new(
        function: Function,
        scope: Arc<VariableScope>,
        owns_scope: bool,
        num_args: usize,
    ) -> Self {
        let lines = match &function {
            Function::Script(f) => f.lines(),
            Function::Native(_) => Vec::new(),
        };
        CallFrame {
            function,
            scope,
            owns_scope,
            lines,
            instruction_pointer: 0,
            block_stack: Vec::new(),
            num_args,
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn scope(&self) -> &Arc<VariableScope> {
        &self.scope
    }

    /// Number of arguments the call site actually passed.
    pub fn num_args(&self) -> usize {
        self.num_args
    }

    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Location of the line under the instruction pointer, falling
    /// back to the function's declaration once the lines are
    /// exhausted. Native frames have no location.
    pub fn current_location(&self) -> Option<SourceLocation> {
        match &self.function {
            Function::Script(f) => Some(
                self.lines
                    .get(self.instruction_pointer)
                    .map(|(location, _)| location.clone())
                    .unwrap_or_else(|| f.location()),
            ),
            Function::Native(_) => None,
        }
    }

    pub fn open_blocks(&self) -> &[BlockMarker] {
        &self.block_stack
    }

    fn current_line(&self) -> Option<(SourceLocation, String)> {
        self.lines.get(self.instruction_pointer).cloned()
    }

    /// Tear down the frame's scope if this frame allocated it. The
    /// entry frame runs in the thread's pre-existing scope and leaves
    /// it alone.
    pub(crate) fn dispose(&self) {
        if self.owns_scope {
            self.scope.dispose();
        }
    }
}

/// Declaration modifiers stripped off the front of an expression
/// statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Modifiers {
    global: bool,
    local: bool,
    is_static: bool,
    is_const: bool,
    dim: bool,
    is_enum: bool,
    step: bool,
}

impl Modifiers {
    /// Split leading modifier keywords off a statement.
    fn strip(line: &str) -> (Modifiers, &str) {
        let mut modifiers = Modifiers::default();
        let mut rest = line.trim_start();
        loop {
            let word = rest.split_whitespace().next().unwrap_or("");
            let flag = match word.to_lowercase().as_str() {
                "global" => &mut modifiers.global,
                "local" => &mut modifiers.local,
                "static" => &mut modifiers.is_static,
                "const" => &mut modifiers.is_const,
                "dim" => &mut modifiers.dim,
                "enum" => &mut modifiers.is_enum,
                "step" => &mut modifiers.step,
                _ => return (modifiers, rest),
            };
            *flag = true;
            rest = rest[word.len()..].trim_start();
        }
    }

    /// Reject mutually exclusive combinations.
    fn validate(&self, location: &SourceLocation) -> Result<(), InterpreterError> {
        let conflicts = [
            (self.dim && self.global, "dim", "global"),
            (self.dim && self.local, "dim", "local"),
            (self.local && self.global, "local", "global"),
            (self.is_enum && self.is_static, "enum", "static"),
            (self.is_static && self.is_const, "static", "const"),
        ];
        for (conflict, a, b) in conflicts {
            if conflict {
                return Err(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.conflicting_modifiers",
                    [a, b],
                ));
            }
        }
        Ok(())
    }

    fn any(&self) -> bool {
        self.global
            || self.local
            || self.is_static
            || self.is_const
            || self.dim
            || self.is_enum
            || self.step
    }
}

fn first_word(line: &str) -> (String, &str) {
    let line = line.trim_start();
    let word = line.split_whitespace().next().unwrap_or("");
    (word.to_lowercase(), line[word.len()..].trim_start())
}

/// `"path"` is a relative include, `<path>` searches the standard
/// include directories.
fn parse_include_argument(rest: &str) -> Option<(String, bool)> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some((inner.to_string(), true))
    } else {
        rest.strip_prefix('<')
            .and_then(|r| r.strip_suffix('>'))
            .map(|inner| (inner.to_string(), false))
    }
}

impl ExecutionThread {
    /// Run the top (script) frame: bind parameters, fire the script's
    /// startup hooks for the entry function, then iterate the cached
    /// lines through the statement pipeline.
    pub(crate) fn execute_script_frame(
        &mut self,
        function: &Arc<ScriptFunction>,
        args: &[Variant],
    ) -> FunctionReturnValue {
        let scope = self.current_scope();
        for (i, parameter) in function.parameters().iter().enumerate() {
            let value = match args.get(i) {
                Some(arg) => arg.clone(),
                None => parameter
                    .default
                    .clone()
                    .unwrap_or_else(Variant::default_value),
            };
            let variable = scope.create_variable(function.location(), &parameter.name, false);
            variable.set_value(value);
        }

        if function.is_entry() {
            if let Some(script) = function.script() {
                for hook in script.startup_functions() {
                    if let FunctionReturnValue::Fatal(error) = self.call_named(&hook) {
                        return FunctionReturnValue::Fatal(error);
                    }
                }
            }
        }

        loop {
            if self.is_stop_requested() {
                return FunctionReturnValue::success(Variant::null());
            }
            let Some((location, text)) = self.current_frame().and_then(CallFrame::current_line)
            else {
                break;
            };
            let result = self.process_line(&location, text.trim());
            match result {
                FunctionReturnValue::Fatal(error) => {
                    // the instruction pointer stays on the failing line
                    return FunctionReturnValue::Fatal(error);
                }
                FunctionReturnValue::Error { code, extended, .. } => {
                    self.set_error_state(code, extended.unwrap_or_else(Variant::null));
                }
                FunctionReturnValue::Success { .. } => {}
            }
            if let Some(frame) = self.current_frame_mut() {
                frame.instruction_pointer += 1;
            }
        }

        if function.is_entry() {
            if let Some(script) = function.script() {
                for hook in script.exit_functions() {
                    if let FunctionReturnValue::Fatal(error) = self.call_named(&hook) {
                        return FunctionReturnValue::Fatal(error);
                    }
                }
            }
        }
        FunctionReturnValue::success(Variant::null())
    }

    fn call_named(&mut self, name: &str) -> FunctionReturnValue {
        match self.interpreter().resolver().lookup(name) {
            Some(function) => self.call(&function, &[]),
            None => FunctionReturnValue::fatal(InterpreterError::well_known(
                self.current_location(),
                "error.unknown_function",
                [name],
            )),
        }
    }

    /// Route one line through the statement pipeline.
    pub fn process_line(
        &mut self,
        location: &SourceLocation,
        line: &str,
    ) -> FunctionReturnValue {
        if line.is_empty() {
            return FunctionReturnValue::success(Variant::null());
        }

        if let Some(directive) = line.strip_prefix('#') {
            return self.process_directive(location, directive);
        }

        if let Some(result) = self.process_block_statement(location, line) {
            return result;
        }

        for processor in self.interpreter().statement_processors() {
            if processor.claims(line) {
                if let Some(result) = processor.process(self, line) {
                    return result;
                }
            }
        }
        for processor in self.interpreter().line_processors() {
            if processor.can_process(line) {
                if let Some(result) = processor.process(self, line) {
                    return result;
                }
            }
        }

        self.process_expression_statement(location, line)
    }

    /// Built-in directive handling plus registered directive
    /// processors.
    fn process_directive(
        &mut self,
        location: &SourceLocation,
        directive: &str,
    ) -> FunctionReturnValue {
        let directive = directive.trim();
        let (word, rest) = first_word(directive);
        match word.as_str() {
            "include" | "include-once" => {
                return self.process_include(location, rest, word == "include-once");
            }
            "notrayicon" => {
                return self.process_expression_statement(location, "Opt(\"TrayIconHide\", 1)");
            }
            "onautoitstartregister" => {
                if let Some(name) = rest
                    .trim()
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                {
                    return self.process_expression_statement(location, &format!("{name}()"));
                }
            }
            "pragma" => {
                let (option, params) = match rest.split_once('(') {
                    Some((option, params)) => (
                        option.trim().to_string(),
                        Some(params.trim_end().trim_end_matches(')').to_string()),
                    ),
                    None => (rest.trim().to_string(), None),
                };
                for processor in self.interpreter().pragma_processors() {
                    if let Some(result) = processor.try_process(self, &option, params.as_deref()) {
                        return result;
                    }
                }
                return FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.unparsable_pragma",
                    [option],
                ));
            }
            _ => {}
        }

        for processor in self.interpreter().directive_processors() {
            if let Some(result) = processor.try_process(self, directive) {
                return result;
            }
        }
        FunctionReturnValue::fatal(InterpreterError::well_known(
            Some(location.clone()),
            "error.unparsable_directive",
            [directive],
        ))
    }

    /// Resolve and run an included script. The included script's entry
    /// function executes as a nested call, which registers its
    /// declared functions along the way.
    fn process_include(
        &mut self,
        location: &SourceLocation,
        argument: &str,
        once: bool,
    ) -> FunctionReturnValue {
        let Some((path, relative)) = parse_include_argument(argument) else {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                Some(location.clone()),
                "error.unparsable_directive",
                [format!("include {argument}")],
            ));
        };

        let relative_to = if relative {
            location.file().parent().map(|p| p.to_path_buf())
        } else {
            None
        };
        let mut resolved = None;
        for resolver in self.interpreter().include_resolvers() {
            if let Some(found) = resolver.try_resolve(&path, relative_to.as_deref()) {
                resolved = Some(found);
                break;
            }
        }
        let Some(resolved) = resolved else {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                Some(location.clone()),
                "error.unresolved_include",
                [path],
            ));
        };

        if once && !self.interpreter().mark_included(&resolved) {
            return FunctionReturnValue::success(Variant::null());
        }

        let Some(scanner) = self.interpreter().script_scanner() else {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                Some(location.clone()),
                "error.no_script_scanner",
                Vec::<String>::new(),
            ));
        };
        let script = match scanner.scan(&resolved) {
            Ok(script) => script,
            Err(error) => return FunctionReturnValue::Fatal(error),
        };
        self.interpreter().resolver().register_script(&script);

        let entry = Function::Script(script.entry_function());
        self.call(&entry, &[])
    }

    /// Block-statement bookkeeping: opening keywords push a marker,
    /// closing keywords pop and validate it, loop-control keywords pop
    /// one or more loop markers.
    fn process_block_statement(
        &mut self,
        location: &SourceLocation,
        line: &str,
    ) -> Option<FunctionReturnValue> {
        let (word, rest) = first_word(line);

        if let Some(kind) = BlockKind::from_opener(&word) {
            if let Some(frame) = self.current_frame_mut() {
                frame.block_stack.push(BlockMarker {
                    kind,
                    location: location.clone(),
                });
            }
            return Some(FunctionReturnValue::success(Variant::null()));
        }

        if let Some(expected) = BlockKind::expected_by_closer(&word) {
            let top = self
                .current_frame_mut()
                .and_then(|frame| frame.block_stack.pop());
            return Some(match top {
                Some(marker) if marker.kind == expected => {
                    FunctionReturnValue::success(Variant::null())
                }
                Some(marker) => FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.no_matching_close",
                    [
                        word,
                        format!("\"{}\" opened at {}", marker.kind.keyword(), marker.location),
                    ],
                )),
                None => FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.no_matching_close",
                    [word, "no open block".to_string()],
                )),
            });
        }

        if word == "exitloop" || word == "continueloop" {
            let suffix = rest.trim();
            let count = if suffix.is_empty() {
                1
            } else {
                match suffix.parse::<usize>() {
                    Ok(n) if n >= 1 => n,
                    _ => {
                        return Some(FunctionReturnValue::fatal(InterpreterError::well_known(
                            Some(location.clone()),
                            "error.invalid_loop_count",
                            [suffix],
                        )));
                    }
                }
            };
            let mut remaining = count;
            while remaining > 0 {
                let popped = self
                    .current_frame_mut()
                    .and_then(|frame| frame.block_stack.pop());
                match popped {
                    Some(marker) if marker.kind.is_loop() => remaining -= 1,
                    Some(_) => {}
                    None => {
                        return Some(FunctionReturnValue::fatal(InterpreterError::well_known(
                            Some(location.clone()),
                            "error.unmatched_loop_control",
                            [word],
                        )));
                    }
                }
            }
            return Some(FunctionReturnValue::success(Variant::null()));
        }

        None
    }

    /// The expression/assignment fallback: strip declaration
    /// modifiers, parse via the external solver, then declare or
    /// assign.
    fn process_expression_statement(
        &mut self,
        location: &SourceLocation,
        line: &str,
    ) -> FunctionReturnValue {
        let (modifiers, rest) = Modifiers::strip(line);
        if let Err(error) = modifiers.validate(location) {
            return FunctionReturnValue::Fatal(error);
        }

        let Some(solver) = self.interpreter().expression_solver() else {
            return FunctionReturnValue::fatal(InterpreterError::well_known(
                Some(location.clone()),
                "error.unparsable_line",
                Vec::<String>::new(),
            ));
        };

        let ast = match solver.parse(rest) {
            Ok(ast) => ast,
            Err(mut error) => {
                if error.location.is_none() {
                    error.location = Some(location.clone());
                }
                return FunctionReturnValue::Fatal(error);
            }
        };

        match ast {
            LineAst::Declarations(declarations) => {
                self.declare_variables(location, modifiers, declarations, &solver)
            }
            LineAst::Assignment { target, expr } if modifiers.any() => match target {
                AssignTarget::Variable(name) => self.declare_variables(
                    location,
                    modifiers,
                    vec![DeclaredVariable {
                        name,
                        initializer: Some(expr),
                    }],
                    &solver,
                ),
                _ => FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.invalid_declaration",
                    Vec::<String>::new(),
                )),
            },
            LineAst::Assignment { target, expr } => {
                self.assign(location, target, &expr, &solver)
            }
            LineAst::Expression(_) if modifiers.any() => {
                FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.invalid_declaration",
                    Vec::<String>::new(),
                ))
            }
            LineAst::Expression(expr) => solver.eval(self, &expr),
        }
    }

    /// Declare one or more variables in the scope the modifiers name.
    fn declare_variables(
        &mut self,
        location: &SourceLocation,
        modifiers: Modifiers,
        declarations: Vec<DeclaredVariable>,
        solver: &Arc<dyn ExpressionSolver>,
    ) -> FunctionReturnValue {
        let scope = if modifiers.global {
            self.current_scope().global_root()
        } else {
            self.current_scope()
        };

        for declaration in declarations {
            if let Some(existing) = scope.resolve(&declaration.name, SearchScope::Local) {
                // re-declaring a constant, or const-redeclaring an
                // existing binding, keeps the original untouched
                if existing.is_const() || modifiers.is_const {
                    return FunctionReturnValue::fatal(InterpreterError::well_known(
                        Some(location.clone()),
                        "error.constant_redeclaration",
                        [existing.name()],
                    ));
                }
            }
            if modifiers.is_const && declaration.initializer.is_none() {
                return FunctionReturnValue::fatal(InterpreterError::well_known(
                    Some(location.clone()),
                    "error.uninitialized_constant",
                    [declaration.name.as_str()],
                ));
            }
            let value = match &declaration.initializer {
                Some(expr) => match solver.eval(self, expr) {
                    FunctionReturnValue::Success { value, .. } => value,
                    other => return other,
                },
                None => Variant::null(),
            };
            let variable =
                scope.create_variable(location.clone(), &declaration.name, modifiers.is_const);
            variable.set_value(value);
        }
        FunctionReturnValue::success(Variant::null())
    }

    /// Evaluate the right-hand side and store it into the resolved
    /// target. Indexed and member targets report recoverable failure
    /// through the error channel, not a fatal fault.
    fn assign(
        &mut self,
        location: &SourceLocation,
        target: AssignTarget,
        expr: &str,
        solver: &Arc<dyn ExpressionSolver>,
    ) -> FunctionReturnValue {
        let value = match solver.eval(self, expr) {
            FunctionReturnValue::Success { value, .. } => value,
            other => return other,
        };

        match target {
            AssignTarget::Variable(name) => {
                let variable = match self.current_scope().resolve(&name, SearchScope::Global) {
                    Some(variable) => variable,
                    None => self
                        .current_scope()
                        .create_variable(location.clone(), &name, false),
                };
                if variable.is_const() {
                    return FunctionReturnValue::fatal(InterpreterError::well_known(
                        Some(location.clone()),
                        "error.constant_assignment",
                        [variable.name()],
                    ));
                }
                variable.set_value(value.clone());
                FunctionReturnValue::success(value)
            }
            AssignTarget::Indexed { variable, index } => {
                let Some(target) = self.current_scope().resolve(&variable, SearchScope::Global)
                else {
                    return FunctionReturnValue::fatal(InterpreterError::well_known(
                        Some(location.clone()),
                        "error.undeclared_variable",
                        [variable],
                    ));
                };
                let index = match solver.eval(self, &index) {
                    FunctionReturnValue::Success { value, .. } => value,
                    other => return other,
                };
                let held = target.value();
                if held.try_set_indexed(&**self.interpreter(), &index, value.clone()) {
                    FunctionReturnValue::success(value)
                } else {
                    FunctionReturnValue::error(1)
                }
            }
            AssignTarget::Member { variable, member } => {
                let Some(target) = self.current_scope().resolve(&variable, SearchScope::Global)
                else {
                    return FunctionReturnValue::fatal(InterpreterError::well_known(
                        Some(location.clone()),
                        "error.undeclared_variable",
                        [variable],
                    ));
                };
                let held = target.value();
                if held.try_set_member(&**self.interpreter(), &member, value.clone()) {
                    FunctionReturnValue::success(value)
                } else {
                    FunctionReturnValue::error(1)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_stripping() {
        let (modifiers, rest) = Modifiers::strip("Local Const $x = 1");
        assert!(modifiers.local);
        assert!(modifiers.is_const);
        assert!(!modifiers.global);
        assert_eq!(rest, "$x = 1");
    }

    #[test]
    fn test_modifier_conflicts() {
        let loc = SourceLocation::unknown();
        let (modifiers, _) = Modifiers::strip("dim global $x");
        assert_eq!(
            modifiers.validate(&loc).unwrap_err().key,
            "error.conflicting_modifiers"
        );
        let (modifiers, _) = Modifiers::strip("static const $x");
        assert!(modifiers.validate(&loc).is_err());
        let (modifiers, _) = Modifiers::strip("enum static $x");
        assert!(modifiers.validate(&loc).is_err());
        let (modifiers, _) = Modifiers::strip("global const $x = 1");
        assert!(modifiers.validate(&loc).is_ok());
    }

    #[test]
    fn test_block_kind_closers() {
        assert_eq!(BlockKind::expected_by_closer("next"), Some(BlockKind::For));
        assert_eq!(BlockKind::expected_by_closer("wend"), Some(BlockKind::While));
        assert_eq!(BlockKind::expected_by_closer("endif"), None);
        assert!(BlockKind::For.is_loop());
        assert!(!BlockKind::Select.is_loop());
    }

    #[test]
    fn test_include_argument_forms() {
        assert_eq!(
            parse_include_argument("\"lib.au3\""),
            Some(("lib.au3".to_string(), true))
        );
        assert_eq!(
            parse_include_argument("<Array.au3>"),
            Some(("Array.au3".to_string(), false))
        );
        assert_eq!(parse_include_argument("lib.au3"), None);
    }
}
