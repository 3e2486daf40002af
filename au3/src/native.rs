//! Built-in native functions
//!
//! The runtime-facing subset of the framework function library:
//! console output, the error/extended channel, randomness, type
//! inspection and conversions. All of them register once at startup,
//! before any script executes.

use crate::error::FunctionReturnValue;
use crate::function::{Function, NativeFunction};
use crate::interpreter::Interpreter;
use crate::value::{Variant, VariantType};
use std::sync::Arc;

/// Register the built-in function set with the interpreter's resolver.
pub(crate) fn register_builtin_functions(interpreter: &Arc<Interpreter>) {
    for native in builtin_functions() {
        interpreter.resolver().register(Function::Native(native));
    }
}

fn type_name(value: &Variant) -> &'static str {
    match value.get_type() {
        VariantType::Null => "Null",
        VariantType::Default => "Keyword",
        VariantType::Boolean => "Bool",
        VariantType::Number => "Double",
        VariantType::String => "String",
        VariantType::Binary => "Binary",
        VariantType::Array => "Array",
        VariantType::Map => "Map",
        VariantType::Function => match value.as_function() {
            Some(Function::Script(_)) => "UserFunction",
            _ => "Function",
        },
        VariantType::ComObject => "Object",
        VariantType::Handle => "Ptr",
        VariantType::Reference => "Reference",
    }
}

fn builtin_functions() -> Vec<Arc<NativeFunction>> {
    vec![
        NativeFunction::fixed_arity("ConsoleWrite", 1, |thread, args| {
            let text = args[0].to_string();
            thread.interpreter().print(&text);
            FunctionReturnValue::success(Variant::from_number(text.chars().count() as f64))
        }),
        NativeFunction::fixed_arity("VarGetType", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_string(type_name(&args[0])))
        }),
        NativeFunction::new("SetError", (1, 3), Vec::new(), |thread, args| {
            let code = args[0].to_number() as i32;
            let extended = if args[1].is_default() {
                thread.extended()
            } else {
                args[1].clone()
            };
            thread.set_error_state(code, extended);
            let value = if args[2].is_default() {
                Variant::from_number(1.0)
            } else {
                args[2].clone()
            };
            FunctionReturnValue::success(value)
        }),
        NativeFunction::new("SetExtended", (1, 2), Vec::new(), |thread, args| {
            let code = thread.error_code();
            thread.set_error_state(code, args[0].clone());
            let value = if args[1].is_default() {
                Variant::from_number(1.0)
            } else {
                args[1].clone()
            };
            FunctionReturnValue::success(value)
        }),
        NativeFunction::new("Random", (0, 3), Vec::new(), |thread, args| {
            let min = if args[0].is_default() {
                0.0
            } else {
                args[0].to_number()
            };
            let max = if args[1].is_default() {
                1.0
            } else {
                args[1].to_number()
            };
            let as_integer = !args[2].is_default() && args[2].to_boolean();
            if max < min {
                return FunctionReturnValue::error(1);
            }
            let sample = thread.interpreter().random();
            let value = if as_integer {
                (min + sample * (max - min + 1.0)).floor().min(max)
            } else {
                min + sample * (max - min)
            };
            FunctionReturnValue::success(Variant::from_number(value))
        }),
        NativeFunction::fixed_arity("SRandom", 1, |thread, args| {
            thread
                .interpreter()
                .reseed(Some(args[0].to_number() as i64 as u64));
            FunctionReturnValue::success(Variant::null())
        }),
        NativeFunction::fixed_arity("Abs", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_number(args[0].to_number().abs()))
        }),
        NativeFunction::fixed_arity("Asc", 1, |_, args| {
            let code = args[0].to_string().chars().next().map(|c| c as u32).unwrap_or(0);
            FunctionReturnValue::success(Variant::from_number(code as f64))
        }),
        NativeFunction::fixed_arity("Chr", 1, |_, args| {
            let text = char::from_u32(args[0].to_number() as u32)
                .map(|c| c.to_string())
                .unwrap_or_default();
            FunctionReturnValue::success(Variant::from_string(text))
        }),
        NativeFunction::fixed_arity("String", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_string(args[0].to_string()))
        }),
        NativeFunction::fixed_arity("Number", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_number(args[0].to_number()))
        }),
        NativeFunction::fixed_arity("Int", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_number(args[0].to_number().trunc()))
        }),
        NativeFunction::fixed_arity("Binary", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_binary(args[0].to_binary()))
        }),
        NativeFunction::new("UBound", (1, 2), Vec::new(), |_, args| {
            if !args[0].is_array() && !args[0].is_map() {
                return FunctionReturnValue::error(1);
            }
            let dimension = if args[1].is_default() {
                1
            } else {
                args[1].to_number() as i64
            };
            if dimension != 1 {
                return FunctionReturnValue::error(2);
            }
            FunctionReturnValue::success(Variant::from_number(args[0].length() as f64))
        }),
        NativeFunction::fixed_arity("IsArray", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(args[0].is_array()))
        }),
        NativeFunction::fixed_arity("IsBool", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(
                args[0].get_type() == VariantType::Boolean,
            ))
        }),
        NativeFunction::fixed_arity("IsNumber", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(args[0].is_number()))
        }),
        NativeFunction::fixed_arity("IsString", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(args[0].is_string()))
        }),
        NativeFunction::fixed_arity("IsMap", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(args[0].is_map()))
        }),
        NativeFunction::fixed_arity("IsFunc", 1, |_, args| {
            FunctionReturnValue::success(Variant::from_boolean(args[0].as_function().is_some()))
        }),
        NativeFunction::fixed_arity("IsKeyword", 1, |_, args| {
            let value = if args[0].is_default() {
                1.0
            } else if args[0].is_null() {
                2.0
            } else {
                0.0
            };
            FunctionReturnValue::success(Variant::from_number(value))
        }),
        NativeFunction::fixed_arity("Opt", 2, |thread, args| {
            let name = args[0].to_string();
            let previous = thread
                .interpreter()
                .set_runtime_option(&name, args[1].clone());
            FunctionReturnValue::success(previous)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_set_is_nonempty_and_uniquely_named() {
        let functions = builtin_functions();
        assert!(functions.len() >= 20);
        let mut names: Vec<String> = functions.iter().map(|f| f.name().to_uppercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), functions.len());
    }

    #[test]
    fn test_type_name_mapping() {
        assert_eq!(type_name(&Variant::from_number(1.0)), "Double");
        assert_eq!(type_name(&Variant::from_boolean(true)), "Bool");
        assert_eq!(type_name(&Variant::default_value()), "Keyword");
        assert_eq!(type_name(&Variant::from_handle(3)), "Ptr");
        assert_eq!(type_name(&Variant::new_map()), "Map");
    }
}
