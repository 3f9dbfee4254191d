//! Insertion-ordered map keyed by [`super::ValueKey`] (value identity).
//!
//! Implemented as a vector of entries plus a hash index, the way an ordered
//! map is hand-rolled when no external ordered-map crate is already part of
//! the dependency stack (see `DESIGN.md`).

use std::collections::HashMap;

use super::{Value, ValueKey};

#[derive(Debug, Default)]
pub struct MsMap {
    entries: Vec<(Value, Value)>,
    index: HashMap<ValueKey, usize>,
    /// Optional host callback consulted before a `set`; if it returns
    /// `true` the assignment is suppressed (spec §4.3 `set_var`).
    pub assign_override: Option<Box<dyn Fn(&Value, &Value) -> bool>>,
}

impl Clone for MsMap {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            index: self.index.clone(),
            assign_override: None,
        }
    }
}

impl MsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.index.get(&key.identity_key()).map(|&i| self.entries[i].1.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(&key.identity_key())
    }

    /// Insert or overwrite a key, preserving original insertion position on
    /// overwrite. Returns `true` if the assignment actually happened (i.e.
    /// wasn't vetoed by `assign_override`).
    pub fn set(&mut self, key: Value, value: Value) -> bool {
        if let Some(cb) = &self.assign_override {
            if cb(&key, &value) {
                return false;
            }
        }
        let ident = key.identity_key();
        if let Some(&i) = self.index.get(&ident) {
            self.entries[i].1 = value;
        } else {
            self.index.insert(ident, self.entries.len());
            self.entries.push((key, value));
        }
        true
    }

    /// Raw insert bypassing `assign_override`, used internally (literal
    /// construction, intrinsic bookkeeping).
    pub fn raw_set(&mut self, key: Value, value: Value) {
        let ident = key.identity_key();
        if let Some(&i) = self.index.get(&ident) {
            self.entries[i].1 = value;
        } else {
            self.index.insert(ident, self.entries.len());
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let ident = key.identity_key();
        let i = self.index.remove(&ident)?;
        let (_, value) = self.entries.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Walk the `__isa` chain (this map, then its prototype, ...) looking
    /// for `key`, to a maximum depth of 256 (spec §4.3).
    pub fn lookup_chain(&self, key: &Value) -> Result<Option<Value>, ()> {
        const MAX_DEPTH: usize = 256;
        if let Some(v) = self.get(key) {
            return Ok(Some(v));
        }
        let mut current = self.get(&Value::string("__isa"));
        let mut depth = 0;
        while let Some(Value::Map(next)) = current {
            if depth >= MAX_DEPTH {
                return Err(());
            }
            depth += 1;
            let next_ref = next.borrow();
            if let Some(v) = next_ref.get(key) {
                return Ok(Some(v));
            }
            current = next_ref.get(&Value::string("__isa"));
        }
        Ok(None)
    }

    pub fn isa(&self) -> Option<Value> {
        self.get(&Value::string("__isa"))
    }

    /// Drop all entries in place, keeping any `assign_override` callback
    /// (used by `reset(clearVariables)` on the globals map).
    pub fn raw_set_clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
