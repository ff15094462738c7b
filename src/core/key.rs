// src/core/key.rs

use crate::{
    constants::BASE_DIR_KEY,
    core::eval::{self, EvalError},
    models::State,
    system::executor,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

lazy_static! {
    /// A `$(name)` variable reference.
    static ref VAR_RE: Regex = Regex::new(r"\$\(([\w\[\]]+)\)").unwrap();
    /// A `${...}` arithmetic block.
    static ref MATH_RE: Regex = Regex::new(r"\$\{([^{}]*)\}").unwrap();
    /// A whole-value `$b{...}` shell-capture block.
    static ref SHELL_RE: Regex = Regex::new(r"^\$b\{(.*)\}$").unwrap();
    /// A `F <from> T <to> V <step>` range declaration.
    static ref RANGE_RE: Regex = Regex::new(r"^F\s+(\S+)\s+T\s+(\S+)\s+V\s+(\S.*?)\s*$").unwrap();
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("malformed range declaration '{raw}' for key '{key}'")]
    MalformedRange { key: String, raw: String },
    #[error("range expansion of key '{key}' failed: {source}")]
    Range {
        key: String,
        #[source]
        source: EvalError,
    },
}

/// The closed set of key behaviors. Classification happens once, at parse
/// time; everything downstream dispatches through [`Key::expand`] and stays
/// oblivious to the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// Raw text, verbatim (after quote stripping). Single value.
    Constant,
    /// Whitespace-split raw text. Structural keys are never split and behave
    /// as a one-element list.
    List { structural: bool },
    /// Like `List`, but the raw text was loaded from a file at parse time.
    FileList,
    /// `$(name)` and `${...}` substitution. Single value.
    Expression,
    /// A substituted `$b{...}` block run through the system shell; trimmed
    /// stdout becomes the value.
    Shell,
    /// A `F .. T .. V ..` declaration expanded into a generated list.
    Range,
}

/// A named, possibly computed, possibly multi-valued configuration entry.
///
/// The dependency set is extracted from the raw text once, at construction,
/// and never changes. Values are only ever produced by [`Key::expand`], which
/// must be called in dependency order. The cursor selecting the active
/// element survives re-expansion: that is what lets the odometer walk lists
/// while expressions are recomputed per state.
#[derive(Debug, Clone)]
pub struct Key {
    name: String,
    raw: String,
    kind: KeyKind,
    deps: Vec<String>,
    values: Vec<String>,
    cursor: usize,
}

impl Key {
    pub fn new(name: impl Into<String>, raw: impl Into<String>, kind: KeyKind) -> Self {
        let name = name.into();
        let raw = raw.into();
        let deps = match kind {
            KeyKind::Expression | KeyKind::Shell | KeyKind::Range => extract_references(&raw),
            _ => Vec::new(),
        };
        Self {
            name,
            raw,
            kind,
            deps,
            values: Vec::new(),
            cursor: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    /// Replaces the raw declaration text. Used for the injected job sequence
    /// number, which changes between snapshots.
    pub fn set_raw(&mut self, raw: impl Into<String>) {
        self.raw = raw.into();
    }

    /// The key names this key's expansion textually references.
    pub fn dependencies(&self) -> &[String] {
        &self.deps
    }

    pub fn has_dependencies(&self) -> bool {
        !self.deps.is_empty()
    }

    /// The currently selected value. Empty until the first expansion.
    pub fn current(&self) -> &str {
        self.values
            .get(self.cursor)
            .or_else(|| self.values.last())
            .map_or("", String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Moves the cursor to the next value. On exhaustion the cursor resets
    /// to the first value and `false` is returned (odometer carry). A key
    /// with a single value never reports more values.
    pub fn advance_value(&mut self) -> bool {
        if self.cursor + 1 < self.values.len() {
            self.cursor += 1;
            true
        } else {
            self.cursor = 0;
            false
        }
    }

    /// Recomputes this key's values from its raw text and the already
    /// resolved values of the keys it depends on. Idempotent for unchanged
    /// dependencies; never touches the cursor.
    pub fn expand(&mut self, resolved: &State) -> Result<(), KeyError> {
        match &self.kind {
            KeyKind::Constant => {
                self.values = vec![self.raw.clone()];
            }
            KeyKind::List { structural: true } => {
                self.values = vec![self.raw.clone()];
            }
            KeyKind::List { structural: false } | KeyKind::FileList => {
                self.values = split_list(&self.raw);
            }
            KeyKind::Expression => {
                let text = substitute_vars(&self.raw, resolved, &self.name);
                self.values = vec![substitute_math(&text, &self.name)];
            }
            KeyKind::Shell => {
                let text = substitute_vars(&self.raw, resolved, &self.name);
                let text = substitute_math(&text, &self.name);
                self.values = vec![self.capture_shell(&text, resolved)];
            }
            KeyKind::Range => {
                let text = substitute_vars(&self.raw, resolved, &self.name);
                let text = substitute_math(&text, &self.name);
                self.values = self.expand_range_decl(&text)?;
            }
        }
        Ok(())
    }

    fn capture_shell(&self, text: &str, resolved: &State) -> String {
        let Some(caps) = SHELL_RE.captures(text) else {
            log::warn!(
                "can't expand key '{}': shell commands must be enclosed between '$b{{' and '}}' (got '{text}')",
                self.name
            );
            return text.to_string();
        };
        let command = &caps[1];
        let cwd = resolved
            .get(BASE_DIR_KEY)
            .map_or_else(|| Path::new("."), Path::new);
        match executor::capture_output(command, cwd) {
            Ok((code, output)) => {
                if code != 0 {
                    log::warn!(
                        "shell capture for key '{}' exited with code {code}; using its output anyway",
                        self.name
                    );
                }
                output.trim().to_string()
            }
            Err(e) => {
                log::warn!("shell capture for key '{}' failed: {e}", self.name);
                String::new()
            }
        }
    }

    fn expand_range_decl(&self, text: &str) -> Result<Vec<String>, KeyError> {
        let caps = RANGE_RE
            .captures(text)
            .ok_or_else(|| KeyError::MalformedRange {
                key: self.name.clone(),
                raw: text.to_string(),
            })?;
        let from: f64 = caps[1].parse().map_err(|_| KeyError::MalformedRange {
            key: self.name.clone(),
            raw: text.to_string(),
        })?;
        let to: f64 = caps[2].parse().map_err(|_| KeyError::MalformedRange {
            key: self.name.clone(),
            raw: text.to_string(),
        })?;
        eval::expand_range(from, to, &caps[3], crate::constants::DEFAULT_STATE_CEILING).map_err(
            |source| KeyError::Range {
                key: self.name.clone(),
                source,
            },
        )
    }
}

/// A conditional override of a key's value, active only in states where
/// every condition key resolved to the required value.
#[derive(Debug)]
pub struct Modifier {
    target: String,
    value: String,
    conditions: Vec<(String, String)>,
    warned_missing: AtomicBool,
}

impl Modifier {
    pub fn new(
        target: impl Into<String>,
        value: impl Into<String>,
        conditions: Vec<(String, String)>,
    ) -> Self {
        Self {
            target: target.into(),
            value: value.into(),
            conditions,
            warned_missing: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// True iff every condition key is present in the state and equals the
    /// required value. A condition naming a key absent from the sweep means
    /// the modifier can never apply; that is reported once.
    pub fn applies_to(&self, state: &State) -> bool {
        for (key, wanted) in &self.conditions {
            match state.get(key) {
                Some(value) if value == wanted => {}
                Some(_) => return false,
                None => {
                    if !self.warned_missing.swap(true, Ordering::Relaxed) {
                        log::warn!(
                            "modifier on '{}' conditions on undeclared key '{key}' and will never apply",
                            self.target
                        );
                    }
                    return false;
                }
            }
        }
        true
    }

    /// Overrides the target key's value in the state. The override text goes
    /// through the same variable and arithmetic substitution as expression
    /// keys, resolved against the state being built.
    pub fn apply(&self, state: &mut State) {
        let text = substitute_vars(&self.value, state, &self.target);
        let text = substitute_math(&text, &self.target);
        state.insert(self.target.clone(), text);
    }
}

/// Extracts the `$(name)` references of a raw declaration, in order of first
/// appearance.
fn extract_references(raw: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for caps in VAR_RE.captures_iter(raw) {
        let name = caps[1].to_string();
        if !deps.contains(&name) {
            deps.push(name);
        }
    }
    deps
}

/// Replaces every `$(name)` with the named key's resolved value. Unresolved
/// references are reported and left in place: a broken substitution degrades
/// one key, never the run.
pub fn substitute_vars(text: &str, resolved: &State, context: &str) -> String {
    let mut out = text.to_string();
    for caps in VAR_RE.captures_iter(text) {
        let name = &caps[1];
        match resolved.get(name) {
            Some(value) => out = out.replace(&caps[0], value),
            None => log::warn!("can't expand variable '{name}' in key '{context}'"),
        }
    }
    out
}

/// Evaluates every `${...}` arithmetic block. Blocks that fail to evaluate
/// are reported and left in place.
pub fn substitute_math(text: &str, context: &str) -> String {
    MATH_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match eval::eval_number(&caps[1]) {
                Ok(value) => eval::render_number(value),
                Err(e) => {
                    log::warn!("can't evaluate '{}' in key '{context}': {e}", &caps[0]);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Quote-aware whitespace splitting for list values. Falls back to plain
/// whitespace splitting when the text is not shell-splittable (e.g. an
/// unbalanced quote).
fn split_list(raw: &str) -> Vec<String> {
    shlex::split(raw)
        .unwrap_or_else(|| raw.split_whitespace().map(str::to_string).collect())
}
