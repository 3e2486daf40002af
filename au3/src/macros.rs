//! Macro resolution
//!
//! Macros are read-only values identified by their case-insensitive
//! name with an `@` prefix. The resolver consults its known macros
//! first, then any registered provider plugins.

use crate::exec::ExecutionThread;
use crate::plugin::{MacroMetadata, MacroProvider};
use crate::value::Variant;
use chrono::{Datelike, Local, Timelike};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type MacroValueFn = dyn Fn(&mut ExecutionThread) -> Variant + Send + Sync;

/// A built-in macro with a value-provider closure.
pub struct KnownMacro {
    name: String,
    provider: Box<MacroValueFn>,
}

impl KnownMacro {
    pub fn new(
        name: &str,
        provider: impl Fn(&mut ExecutionThread) -> Variant + Send + Sync + 'static,
    ) -> Self {
        KnownMacro {
            name: name.trim_start_matches('@').to_uppercase(),
            provider: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self, thread: &mut ExecutionThread) -> Variant {
        (self.provider)(thread)
    }
}

/// Case-insensitive lookup over known macros plus provider plugins.
pub struct MacroResolver {
    known: RwLock<HashMap<String, Arc<KnownMacro>>>,
}

impl MacroResolver {
    pub fn new() -> Self {
        MacroResolver {
            known: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, makro: KnownMacro) {
        self.known
            .write()
            .insert(makro.name.clone(), Arc::new(makro));
    }

    pub fn known_macro_count(&self) -> usize {
        self.known.read().len()
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.known
            .read()
            .contains_key(&name.trim_start_matches('@').to_uppercase())
    }

    /// Resolve a macro value: known macros first, then the given
    /// providers in registration order.
    pub fn resolve(
        &self,
        thread: &mut ExecutionThread,
        providers: &[Arc<dyn MacroProvider>],
        name: &str,
    ) -> Option<(Variant, MacroMetadata)> {
        let name = name.trim_start_matches('@');
        let known = self.known.read().get(&name.to_uppercase()).cloned();
        if let Some(makro) = known {
            return Some((makro.value(thread), MacroMetadata::default()));
        }
        for provider in providers {
            if let Some(resolved) = provider.provide(thread, name) {
                return Some(resolved);
            }
        }
        None
    }
}

impl Default for MacroResolver {
    fn default() -> Self {
        MacroResolver::new()
    }
}

/// Register the built-in macro set: character constants, the
/// error/extended channel, call information and the wall clock.
pub fn register_default_macros(resolver: &MacroResolver) {
    resolver.register(KnownMacro::new("CR", |_| Variant::from_string("\r")));
    resolver.register(KnownMacro::new("LF", |_| Variant::from_string("\n")));
    resolver.register(KnownMacro::new("CRLF", |_| Variant::from_string("\r\n")));
    resolver.register(KnownMacro::new("TAB", |_| Variant::from_string("\t")));

    resolver.register(KnownMacro::new("ERROR", |thread| {
        Variant::from_number(thread.error_code() as f64)
    }));
    resolver.register(KnownMacro::new("EXTENDED", |thread| thread.extended()));
    resolver.register(KnownMacro::new("NUMPARAMS", |thread| {
        Variant::from_number(
            thread
                .current_frame()
                .map(|frame| frame.num_args())
                .unwrap_or(0) as f64,
        )
    }));
    resolver.register(KnownMacro::new("SCRIPTNAME", |thread| {
        Variant::from_string(
            thread
                .current_function()
                .and_then(|f| f.as_script().cloned())
                .and_then(|f| f.script())
                .map(|script| script.name().to_string())
                .unwrap_or_default(),
        )
    }));
    resolver.register(KnownMacro::new("AUTOITPID", |_| {
        Variant::from_number(std::process::id() as f64)
    }));
    resolver.register(KnownMacro::new("OSTYPE", |_| {
        Variant::from_string(if cfg!(windows) { "WIN32_NT" } else { "UNIX" })
    }));

    resolver.register(KnownMacro::new("YEAR", |_| {
        Variant::from_string(format!("{:04}", Local::now().year()))
    }));
    resolver.register(KnownMacro::new("MON", |_| {
        Variant::from_string(format!("{:02}", Local::now().month()))
    }));
    resolver.register(KnownMacro::new("MDAY", |_| {
        Variant::from_string(format!("{:02}", Local::now().day()))
    }));
    resolver.register(KnownMacro::new("HOUR", |_| {
        Variant::from_string(format!("{:02}", Local::now().hour()))
    }));
    resolver.register(KnownMacro::new("MIN", |_| {
        Variant::from_string(format!("{:02}", Local::now().minute()))
    }));
    resolver.register(KnownMacro::new("SEC", |_| {
        Variant::from_string(format!("{:02}", Local::now().second()))
    }));
    resolver.register(KnownMacro::new("WDAY", |_| {
        // 1 = Sunday, matching the source language
        Variant::from_number(Local::now().weekday().num_days_from_sunday() as f64 + 1.0)
    }));
}
