//! The dynamic `Variant` value model
//!
//! Every runtime value is a `Variant`: a closed tagged union plus an
//! optional annotation naming the variable the value was last assigned
//! to. Array, Map and Binary payloads are shared, so indexed mutation
//! through a copied `Variant` is visible to every other holder of the
//! same payload.
//!
//! Conversions live in [`convert`], operator semantics in [`ops`].

mod convert;
mod ops;

use crate::function::Function;
use crate::scope::Variable;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

/// The semantic type tag of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Null,
    Default,
    Boolean,
    Number,
    String,
    Binary,
    Array,
    Map,
    Function,
    ComObject,
    Handle,
    Reference,
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantType::Null => "Null",
            VariantType::Default => "Default",
            VariantType::Boolean => "Boolean",
            VariantType::Number => "Number",
            VariantType::String => "String",
            VariantType::Binary => "Binary",
            VariantType::Array => "Array",
            VariantType::Map => "Map",
            VariantType::Function => "Function",
            VariantType::ComObject => "ComObject",
            VariantType::Handle => "Handle",
            VariantType::Reference => "Reference",
        };
        f.write_str(name)
    }
}

/// An insertion-ordered map with `Variant` keys.
///
/// Key lookup is linear with case-sensitive value equality, matching
/// the cache discipline used everywhere else in the runtime.
#[derive(Debug, Default, Clone)]
pub struct VariantMap {
    entries: Vec<(Variant, Variant)>,
}

impl VariantMap {
    pub fn new() -> Self {
        VariantMap::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Variant) -> Option<&Variant> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals_case_sensitive(key))
            .map(|(_, v)| v)
    }

    /// Insert or replace; replacing keeps the key's original position.
    pub fn insert(&mut self, key: Variant, value: Variant) {
        for entry in &mut self.entries {
            if entry.0.equals_case_sensitive(&key) {
                entry.1 = value;
                return;
            }
        }
        self.entries.push((key, value));
    }

    pub fn remove(&mut self, key: &Variant) -> Option<Variant> {
        let index = self
            .entries
            .iter()
            .position(|(k, _)| k.equals_case_sensitive(key))?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Variant> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Variant, Variant)> {
        self.entries.iter()
    }
}

/// Capability for resolving `Handle` and `ComObject` payloads without
/// coupling the value type to the interpreter. The interpreter
/// implements this over its handle table and COM connector; tests can
/// use [`NullBridge`].
pub trait ValueBridge {
    fn handle_get_index(&self, id: i64, index: &Variant) -> Option<Variant>;
    fn handle_set_index(&self, id: i64, index: &Variant, value: Variant) -> bool;
    fn handle_get_member(&self, id: i64, member: &str) -> Option<Variant>;
    fn handle_set_member(&self, id: i64, member: &str, value: Variant) -> bool;
    fn handle_invoke_member(&self, id: i64, member: &str, args: &[Variant]) -> Option<Variant>;
    fn com_get_index(&self, id: u32, index: &Variant) -> Option<Variant>;
    fn com_set_index(&self, id: u32, index: &Variant, value: Variant) -> bool;
    fn com_get_member(&self, id: u32, member: &str) -> Option<Variant>;
    fn com_set_member(&self, id: u32, member: &str, value: Variant) -> bool;
    fn com_invoke_member(&self, id: u32, member: &str, args: &[Variant]) -> Option<Variant>;
}

/// A bridge that resolves nothing. Index and member access against
/// `Handle`/`ComObject` values always reports failure through it.
#[derive(Debug, Default)]
pub struct NullBridge;

impl ValueBridge for NullBridge {
    fn handle_get_index(&self, _: i64, _: &Variant) -> Option<Variant> {
        None
    }
    fn handle_set_index(&self, _: i64, _: &Variant, _: Variant) -> bool {
        false
    }
    fn handle_get_member(&self, _: i64, _: &str) -> Option<Variant> {
        None
    }
    fn handle_set_member(&self, _: i64, _: &str, _: Variant) -> bool {
        false
    }
    fn handle_invoke_member(&self, _: i64, _: &str, _: &[Variant]) -> Option<Variant> {
        None
    }
    fn com_get_index(&self, _: u32, _: &Variant) -> Option<Variant> {
        None
    }
    fn com_set_index(&self, _: u32, _: &Variant, _: Variant) -> bool {
        false
    }
    fn com_get_member(&self, _: u32, _: &str) -> Option<Variant> {
        None
    }
    fn com_set_member(&self, _: u32, _: &str, _: Variant) -> bool {
        false
    }
    fn com_invoke_member(&self, _: u32, _: &str, _: &[Variant]) -> Option<Variant> {
        None
    }
}

/// The tagged payload of a [`Variant`]. Each tag carries exactly the
/// payload shape it declares.
#[derive(Clone)]
pub(crate) enum VariantData {
    Null,
    Default,
    Boolean(bool),
    Number(f64),
    String(String),
    Binary(Arc<RwLock<Vec<u8>>>),
    Array(Arc<RwLock<Vec<Variant>>>),
    Map(Arc<RwLock<VariantMap>>),
    Function(Function),
    ComObject(u32),
    Handle(i64),
    Reference(Arc<Variable>),
}

/// A dynamically-typed runtime value.
#[derive(Clone)]
pub struct Variant {
    pub(crate) data: VariantData,
    /// Variable this value was last assigned to. Metadata only: two
    /// values with equal tag and payload are equal regardless of it.
    assigned_to: Option<Weak<Variable>>,
}

impl Variant {
    fn from_data(data: VariantData) -> Self {
        Variant {
            data,
            assigned_to: None,
        }
    }

    pub fn null() -> Self {
        Variant::from_data(VariantData::Null)
    }

    /// The distinct "unspecified" sentinel, not to be confused with
    /// [`Variant::null`].
    pub fn default_value() -> Self {
        Variant::from_data(VariantData::Default)
    }

    pub fn from_boolean(value: bool) -> Self {
        Variant::from_data(VariantData::Boolean(value))
    }

    pub fn from_number(value: f64) -> Self {
        Variant::from_data(VariantData::Number(value))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Variant::from_data(VariantData::String(value.into()))
    }

    pub fn from_binary(bytes: Vec<u8>) -> Self {
        Variant::from_data(VariantData::Binary(Arc::new(RwLock::new(bytes))))
    }

    pub fn new_array(length: usize) -> Self {
        Variant::from_data(VariantData::Array(Arc::new(RwLock::new(vec![
            Variant::null();
            length
        ]))))
    }

    pub fn from_array(elements: Vec<Variant>) -> Self {
        Variant::from_data(VariantData::Array(Arc::new(RwLock::new(elements))))
    }

    pub fn new_map() -> Self {
        Variant::from_data(VariantData::Map(Arc::new(RwLock::new(VariantMap::new()))))
    }

    pub fn from_map(map: VariantMap) -> Self {
        Variant::from_data(VariantData::Map(Arc::new(RwLock::new(map))))
    }

    pub fn from_function(function: Function) -> Self {
        Variant::from_data(VariantData::Function(function))
    }

    pub fn from_handle(id: i64) -> Self {
        Variant::from_data(VariantData::Handle(id))
    }

    pub fn from_com_object(id: u32) -> Self {
        Variant::from_data(VariantData::ComObject(id))
    }

    /// A by-reference pointer at another variable. Only used for
    /// ByRef parameter passing.
    pub fn from_reference(variable: Arc<Variable>) -> Self {
        Variant::from_data(VariantData::Reference(variable))
    }

    pub fn get_type(&self) -> VariantType {
        match &self.data {
            VariantData::Null => VariantType::Null,
            VariantData::Default => VariantType::Default,
            VariantData::Boolean(_) => VariantType::Boolean,
            VariantData::Number(_) => VariantType::Number,
            VariantData::String(_) => VariantType::String,
            VariantData::Binary(_) => VariantType::Binary,
            VariantData::Array(_) => VariantType::Array,
            VariantData::Map(_) => VariantType::Map,
            VariantData::Function(_) => VariantType::Function,
            VariantData::ComObject(_) => VariantType::ComObject,
            VariantData::Handle(_) => VariantType::Handle,
            VariantData::Reference(_) => VariantType::Reference,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, VariantData::Null)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.data, VariantData::Default)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.data, VariantData::Number(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.data, VariantData::String(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.data, VariantData::Binary(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.data, VariantData::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.data, VariantData::Map(_))
    }

    pub fn is_handle(&self) -> bool {
        matches!(self.data, VariantData::Handle(_))
    }

    pub fn is_com_object(&self) -> bool {
        matches!(self.data, VariantData::ComObject(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.data, VariantData::Reference(_))
    }

    pub fn is_indexable(&self) -> bool {
        matches!(
            self.data,
            VariantData::String(_)
                | VariantData::Binary(_)
                | VariantData::Array(_)
                | VariantData::Map(_)
                | VariantData::ComObject(_)
                | VariantData::Handle(_)
        )
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.data {
            VariantData::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<i64> {
        match self.data {
            VariantData::Handle(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_com_object(&self) -> Option<u32> {
        match self.data {
            VariantData::ComObject(id) => Some(id),
            _ => None,
        }
    }

    /// The referenced variable, if this value is a ByRef reference.
    pub fn referenced_variable(&self) -> Option<Arc<Variable>> {
        match &self.data {
            VariantData::Reference(variable) => Some(Arc::clone(variable)),
            _ => None,
        }
    }

    /// Semantic element count: array/map entries, string characters,
    /// binary bytes. Everything else has length zero.
    pub fn length(&self) -> usize {
        match &self.data {
            VariantData::String(s) => s.chars().count(),
            VariantData::Binary(bytes) => bytes.read().len(),
            VariantData::Array(elements) => elements.read().len(),
            VariantData::Map(map) => map.read().len(),
            _ => 0,
        }
    }

    /// Copy of this value annotated with the variable it is stored in.
    /// Passing `None` removes any previous annotation.
    pub fn assign_to(&self, variable: Option<&Arc<Variable>>) -> Variant {
        Variant {
            data: self.data.clone(),
            assigned_to: variable.map(Arc::downgrade),
        }
    }

    /// The variable this value was last assigned to, if still alive.
    pub fn assigned_variable(&self) -> Option<Arc<Variable>> {
        self.assigned_to.as_ref().and_then(Weak::upgrade)
    }

    /// Structural equality over tag and payload. String comparison is
    /// case-sensitive; arrays and maps compare element-wise.
    pub fn equals_case_sensitive(&self, other: &Variant) -> bool {
        match (&self.data, &other.data) {
            (VariantData::Null, VariantData::Null) => true,
            (VariantData::Default, VariantData::Default) => true,
            (VariantData::Boolean(a), VariantData::Boolean(b)) => a == b,
            // NaN payloads are structurally equal to each other
            (VariantData::Number(a), VariantData::Number(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (VariantData::String(a), VariantData::String(b)) => a == b,
            (VariantData::Binary(a), VariantData::Binary(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (VariantData::Array(a), VariantData::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.equals_case_sensitive(y))
            }
            (VariantData::Map(a), VariantData::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        ka.equals_case_sensitive(kb) && va.equals_case_sensitive(vb)
                    })
            }
            (VariantData::Function(a), VariantData::Function(b)) => a == b,
            (VariantData::ComObject(a), VariantData::ComObject(b)) => a == b,
            (VariantData::Handle(a), VariantData::Handle(b)) => a == b,
            (VariantData::Reference(a), VariantData::Reference(b)) => a == b,
            _ => false,
        }
    }

    /// Like [`equals_case_sensitive`](Variant::equals_case_sensitive),
    /// but folds case when both operands are strings.
    pub fn equals_case_insensitive(&self, other: &Variant) -> bool {
        if let (VariantData::String(a), VariantData::String(b)) = (&self.data, &other.data) {
            return a.to_lowercase() == b.to_lowercase();
        }
        self.equals_case_sensitive(other)
    }

    /// Ordering: case-insensitive lexicographic when both operands are
    /// strings, numeric otherwise.
    pub fn compare(&self, other: &Variant) -> std::cmp::Ordering {
        if let (VariantData::String(a), VariantData::String(b)) = (&self.data, &other.data) {
            return a.to_lowercase().cmp(&b.to_lowercase());
        }
        self.to_number().total_cmp(&other.to_number())
    }

    fn index_of(&self, index: &Variant, length: usize) -> Option<usize> {
        let idx = index.to_number() as i64;
        if idx < 0 || idx as usize >= length {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// Read an indexed element. Out-of-range and non-indexable values
    /// report failure as `None`, never a fault.
    pub fn try_get_indexed(&self, bridge: &dyn ValueBridge, index: &Variant) -> Option<Variant> {
        match &self.data {
            VariantData::Map(map) => map.read().get(index).cloned(),
            VariantData::String(s) => {
                let idx = self.index_of(index, s.chars().count())?;
                s.chars().nth(idx).map(|c| Variant::from_string(c.to_string()))
            }
            VariantData::Binary(bytes) => {
                let bytes = bytes.read();
                let idx = self.index_of(index, bytes.len())?;
                Some(Variant::from_number(bytes[idx] as f64))
            }
            VariantData::Array(elements) => {
                let elements = elements.read();
                let idx = self.index_of(index, elements.len())?;
                Some(elements[idx].clone())
            }
            VariantData::ComObject(id) => bridge.com_get_index(*id, index),
            VariantData::Handle(id) => bridge.handle_get_index(*id, index),
            _ => {
                if index.equals_case_insensitive(&Variant::from_string("length")) {
                    Some(Variant::from_number(self.length() as f64))
                } else {
                    None
                }
            }
        }
    }

    /// Write an indexed element; reports success. Strings are
    /// immutable and always report failure.
    pub fn try_set_indexed(
        &self,
        bridge: &dyn ValueBridge,
        index: &Variant,
        value: Variant,
    ) -> bool {
        match &self.data {
            VariantData::String(_) => false,
            VariantData::Array(elements) => {
                let mut elements = elements.write();
                let length = elements.len();
                match self.index_of(index, length) {
                    Some(idx) => {
                        elements[idx] = value;
                        true
                    }
                    None => false,
                }
            }
            VariantData::Binary(bytes) => {
                let mut bytes = bytes.write();
                let length = bytes.len();
                match self.index_of(index, length) {
                    Some(idx) => {
                        bytes[idx] = value.to_number().clamp(0.0, 255.0) as u8;
                        true
                    }
                    None => false,
                }
            }
            VariantData::Map(map) => {
                map.write().insert(index.clone(), value);
                true
            }
            VariantData::ComObject(id) => bridge.com_set_index(*id, index, value),
            VariantData::Handle(id) => bridge.handle_set_index(*id, index, value),
            _ => false,
        }
    }

    /// Read a named member. Maps treat members as string keys; objects
    /// forward to the bridge; "length" resolves for every value.
    pub fn try_get_member(&self, bridge: &dyn ValueBridge, member: &str) -> Option<Variant> {
        match &self.data {
            VariantData::ComObject(id) => bridge.com_get_member(*id, member),
            VariantData::Handle(id) => bridge.handle_get_member(*id, member),
            VariantData::Map(map) => map.read().get(&Variant::from_string(member)).cloned(),
            _ => {
                if member.eq_ignore_ascii_case("length") {
                    Some(Variant::from_number(self.length() as f64))
                } else {
                    None
                }
            }
        }
    }

    pub fn try_set_member(&self, bridge: &dyn ValueBridge, member: &str, value: Variant) -> bool {
        match &self.data {
            VariantData::ComObject(id) => bridge.com_set_member(*id, member, value),
            VariantData::Handle(id) => bridge.handle_set_member(*id, member, value),
            VariantData::Map(map) => {
                map.write().insert(Variant::from_string(member), value);
                true
            }
            _ => false,
        }
    }

    /// Invoke a named member on an object value. Only `Handle` and
    /// `ComObject` values are invokable.
    pub fn try_invoke_member(
        &self,
        bridge: &dyn ValueBridge,
        member: &str,
        args: &[Variant],
    ) -> Option<Variant> {
        match &self.data {
            VariantData::ComObject(id) => bridge.com_invoke_member(*id, member, args),
            VariantData::Handle(id) => bridge.handle_invoke_member(*id, member, args),
            _ => None,
        }
    }

    /// Detailed rendering for diagnostics: quoted/escaped strings,
    /// recursive array and map contents, reference targets. Depth is
    /// capped to keep self-referencing structures printable.
    pub fn to_debug_string(&self) -> String {
        self.debug_string(0)
    }

    fn debug_string(&self, level: usize) -> String {
        fn sanitize(c: char) -> String {
            match c {
                '\0' => "\\0".into(),
                '\r' => "\\r".into(),
                '\n' => "\\n".into(),
                '\t' => "\\t".into(),
                '\x0b' => "\\v".into(),
                '\x08' => "\\b".into(),
                '\x1b' => "\\e".into(),
                '\\' | '"' => format!("\\{c}"),
                c if (c as u32) < 0x20 => format!("\\{:02x}", c as u32),
                c => c.to_string(),
            }
        }

        if level > 5 {
            return "...".to_string();
        }
        match &self.data {
            VariantData::Null => "Null".to_string(),
            VariantData::Default => "Default".to_string(),
            VariantData::String(s) => {
                let escaped: String = s.chars().map(sanitize).collect();
                format!("\"{escaped}\"")
            }
            VariantData::Array(elements) => {
                let parts: Vec<String> = elements
                    .read()
                    .iter()
                    .map(|e| e.debug_string(level + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            VariantData::Map(map) => {
                let parts: Vec<String> = map
                    .read()
                    .iter()
                    .map(|(k, v)| {
                        format!("{}={}", k.debug_string(level + 1), v.debug_string(level + 1))
                    })
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            VariantData::Function(function) => {
                let (min, max) = function.parameter_count();
                format!("<{}>{}({min}..{max})", function.script_name(), function.name())
            }
            VariantData::Handle(id) => format!("hnd:0x{id:08x}"),
            VariantData::ComObject(id) => format!("COM:0x{id:08x}"),
            VariantData::Reference(variable) => format!(
                "ref ${}:{}",
                variable.name(),
                variable.value().debug_string(level + 1)
            ),
            _ => self.to_string(),
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.equals_case_sensitive(other)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_debug_string())
    }
}
