// src/core/factory.rs

use crate::{
    constants::JOB_ID_KEY,
    core::{
        key::{Key, KeyKind, Modifier},
        table::{ConfigError, KeyTable},
    },
    models::State,
};
use std::collections::HashMap;

/// Enumerates the Cartesian product of a table's multi-valued keys as an
/// ordered sequence of concrete states.
///
/// The key ordering is computed once: keys without dependencies first, in
/// declaration order, then dependent keys, each stably inserted before the
/// first key that depends on it. Enumeration is odometer-style over that
/// ordering — the last key is the fastest-changing — implemented as an
/// explicit step function ([`StateFactory::advance`]) so the state-count
/// ceiling check stays trivial for the caller.
pub struct StateFactory {
    keys: Vec<Key>,
    modifiers: Vec<Modifier>,
    advancing: usize,
    max_changed: usize,
    first: bool,
    sequence: u64,
}

impl StateFactory {
    pub fn new(table: KeyTable) -> Result<Self, ConfigError> {
        let order = order_by_dependencies(&table);
        let (keys, modifiers) = table.into_parts();

        let mut by_name: HashMap<String, Key> = keys
            .into_iter()
            .map(|k| (k.name().to_string(), k))
            .collect();
        let keys: Vec<Key> = order
            .iter()
            .filter_map(|name| by_name.remove(name))
            .collect();

        let last = keys.len().saturating_sub(1);
        let mut factory = Self {
            keys,
            modifiers,
            advancing: last,
            max_changed: last,
            first: true,
            sequence: 0,
        };
        // Initial expansion so every list knows its values before the
        // odometer starts asking them to advance.
        factory.expand_all()?;
        Ok(factory)
    }

    /// Key names in dependency order.
    pub fn key_order(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(Key::name)
    }

    /// The keys whose value is fixed across the whole sweep, for plan
    /// printing. The injected sequence number is omitted.
    pub fn fixed_keys(&self) -> Vec<(&str, &str)> {
        self.keys
            .iter()
            .filter(|k| k.name() != JOB_ID_KEY && matches!(k.kind(), KeyKind::Constant))
            .map(|k| (k.name(), k.current()))
            .collect()
    }

    /// Steps the odometer. The first call emits the all-defaults state
    /// without advancing anything; subsequent calls advance the
    /// least-significant key with values left, restarting every key after
    /// the high-water mark. Returns `false` once the product is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.first {
            self.first = false;
            return true;
        }
        self.sequence += 1;
        loop {
            if self.keys[self.advancing].advance_value() {
                if self.max_changed >= self.advancing {
                    self.advancing = self.keys.len() - 1;
                    self.max_changed = self.advancing;
                }
                return true;
            }
            if self.advancing == 0 {
                return false;
            }
            self.advancing -= 1;
        }
    }

    /// Produces the state for the current odometer position: injects the
    /// running sequence number, re-expands every key in dependency order so
    /// expressions observe freshly advanced values, then applies modifiers.
    pub fn snapshot(&mut self) -> Result<State, ConfigError> {
        for key in &mut self.keys {
            if key.name() == JOB_ID_KEY {
                key.set_raw(self.sequence.to_string());
            }
        }
        let mut state = self.expand_all()?;

        let mut overridden: HashMap<&str, u32> = HashMap::new();
        for modifier in &self.modifiers {
            if modifier.applies_to(&state) {
                modifier.apply(&mut state);
                *overridden.entry(modifier.target()).or_default() += 1;
            }
        }
        for (target, count) in overridden {
            if count > 1 {
                log::warn!(
                    "{count} modifiers matched key '{target}' in state {}; the last declared wins",
                    self.sequence
                );
            }
        }
        Ok(state)
    }

    fn expand_all(&mut self) -> Result<State, ConfigError> {
        let mut resolved = State::new();
        for key in &mut self.keys {
            key.expand(&resolved)?;
            resolved.insert(key.name().to_string(), key.current().to_string());
        }
        Ok(resolved)
    }
}

/// Returns the table's key names ordered so that every key comes after the
/// keys it depends on: independent keys first, then each dependent key
/// inserted right before the first already placed key that depends on it.
fn order_by_dependencies(table: &KeyTable) -> Vec<String> {
    let mut independent: Vec<&str> = Vec::new();
    let mut dependent: Vec<&str> = Vec::new();

    for key in table.keys() {
        if !key.has_dependencies() {
            independent.push(key.name());
            continue;
        }
        let position = dependent
            .iter()
            .position(|placed| table.depends_on(placed, key.name()));
        match position {
            Some(index) => dependent.insert(index, key.name()),
            None => dependent.push(key.name()),
        }
    }

    independent
        .into_iter()
        .chain(dependent)
        .map(str::to_string)
        .collect()
}
