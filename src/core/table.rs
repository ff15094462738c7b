// src/core/table.rs

use crate::{
    constants::{
        BASE_DIR_KEY, DIRECTORY_STRUCTURE_KEY, EXCLUSIVE_KEY, EXECUTE_KEY, INPUT_TYPE_KEY,
        JOB_ID_KEY, LAST_FILE_KEY, PLAIN_VALUE_KEYS, PROTECTED_KEYS, STRUCTURAL_KEYS,
        SWAP_LAST_KEY,
    },
    core::key::{Key, KeyError, KeyKind, Modifier},
    models::{Dialect, is_truthy},
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("input file '{}' not found", .path.display())]
    InputNotFound { path: PathBuf },
    #[error("could not read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("mandatory key '{name}' is missing")]
    MissingRequiredKey { name: String },
    #[error("'{name}' is a protected keyword and cannot be used as a key")]
    ProtectedKey { name: String },
    #[error("circular dependency between '{key}' and '{via}'")]
    CircularDependency { key: String, via: String },
    #[error("unsupported input dialect '{value}' (expected one of: standard, lammps, template)")]
    UnsupportedDialect { value: String },
    #[error("key '{key}' references undeclared key '{reference}'")]
    UndeclaredReference { key: String, reference: String },
    #[error("the key '{name}' may not be a list nor contain expressions")]
    PlainValueRequired { name: String },
    #[error("key '{name}' must be a number, got '{value}'")]
    InvalidNumber { name: String, value: String },
    #[error("the number of states exceeds the configured maximum of {limit}")]
    StateCeiling { limit: usize },
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// The full mapping of key name → [`Key`] for one input, in declaration
/// order, plus the declared modifiers.
///
/// Two keys are injected before any user line is read: the job sequence
/// number and the base working directory at launch time.
#[derive(Debug)]
pub struct KeyTable {
    keys: Vec<Key>,
    modifiers: Vec<Modifier>,
}

impl KeyTable {
    /// Parses the input file at `path`, resolving relative references
    /// against the current working directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Self::parse(&text, &base_dir)
    }

    /// Parses input text line by line. `base_dir` becomes the injected
    /// `BASE_DIR` key and anchors relative file references.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut table = Self {
            keys: vec![
                Key::new(JOB_ID_KEY, "-1", KeyKind::Constant),
                Key::new(
                    BASE_DIR_KEY,
                    base_dir.to_string_lossy().into_owned(),
                    KeyKind::Constant,
                ),
            ],
            modifiers: Vec::new(),
        };
        for line in text.lines() {
            table.push_line(line, base_dir)?;
        }
        Ok(table)
    }

    fn push_line(&mut self, line: &str, base_dir: &Path) -> Result<(), ConfigError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        // A `@@cond=value,...` suffix turns the declaration into a modifier.
        if let Some((decl, conditions)) = line.split_once("@@") {
            return self.push_modifier(decl, conditions);
        }

        let Some((name, value)) = line.split_once('=') else {
            log::warn!("malformed line '{line}', skipping it");
            return Ok(());
        };
        let (name, value) = (name.trim(), value.trim());

        if PROTECTED_KEYS.contains(&name) {
            return Err(ConfigError::ProtectedKey {
                name: name.to_string(),
            });
        }
        if self.contains(name) {
            log::warn!(
                "key '{name}' is defined more than once, using the first definition only (trashing '{value}')"
            );
            return Ok(());
        }

        let key = classify(name, value, base_dir)?;
        self.keys.push(key);
        Ok(())
    }

    fn push_modifier(&mut self, decl: &str, conditions: &str) -> Result<(), ConfigError> {
        let Some((name, value)) = decl.split_once('=') else {
            log::warn!("malformed modifier line '{decl}@@{conditions}', skipping it");
            return Ok(());
        };
        let (name, value) = (name.trim(), strip_quotes(value.trim()));

        let mut parsed = Vec::new();
        for cond in conditions.split(',') {
            let Some((cond_key, cond_value)) = cond.split_once('=') else {
                log::warn!(
                    "malformed condition '{cond}' in modifier for '{name}', skipping the modifier"
                );
                return Ok(());
            };
            parsed.push((cond_key.trim().to_string(), cond_value.trim().to_string()));
        }
        self.modifiers.push(Modifier::new(name, value, parsed));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.iter().any(|k| k.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name() == name)
    }

    /// Removes a key from the table and returns it. Used for launch-control
    /// keys that must not leak into generated states.
    pub fn pop(&mut self, name: &str) -> Option<Key> {
        let index = self.keys.iter().position(|k| k.name() == name)?;
        Some(self.keys.remove(index))
    }

    /// Removes a plain-constant key and parses its raw value as a number.
    pub fn pop_number<T: std::str::FromStr>(&mut self, name: &str) -> Result<Option<T>, ConfigError> {
        match self.pop(name) {
            None => Ok(None),
            Some(key) => key
                .raw()
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    name: name.to_string(),
                    value: key.raw().to_string(),
                }),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Consumes the table, yielding keys (declaration order) and modifiers.
    pub fn into_parts(self) -> (Vec<Key>, Vec<Modifier>) {
        (self.keys, self.modifiers)
    }

    /// Transitive dependency test: `name` depends on `target` if `target`
    /// appears textually in `name`, or in anything `name` depends on. Safe
    /// on cyclic graphs.
    pub fn depends_on(&self, name: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        self.depends_on_inner(name, target, &mut visited)
    }

    fn depends_on_inner<'a>(
        &'a self,
        name: &'a str,
        target: &str,
        visited: &mut HashSet<&'a str>,
    ) -> bool {
        if !visited.insert(name) {
            return false;
        }
        let Some(key) = self.get(name) else {
            return false;
        };
        for dep in key.dependencies() {
            if dep == target || self.depends_on_inner(dep, target, visited) {
                return true;
            }
        }
        false
    }

    /// Validates the table: required keys, dialect, swap implications,
    /// plain-value constraints, undeclared references, and dependency
    /// cycles. Fatal errors here abort the run before any job is dispatched.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.contains(EXECUTE_KEY) {
            return Err(ConfigError::MissingRequiredKey {
                name: EXECUTE_KEY.to_string(),
            });
        }

        if let Some(key) = self.get(INPUT_TYPE_KEY) {
            let value = key.raw().to_string();
            value
                .parse::<Dialect>()
                .map_err(|value| ConfigError::UnsupportedDialect { value })?;
        }

        // SwapLast needs a directory per state and a file to exchange, and
        // only makes sense when states own their directories exclusively.
        if self.get(SWAP_LAST_KEY).map(Key::raw).is_some_and(is_truthy) {
            for required in [DIRECTORY_STRUCTURE_KEY, LAST_FILE_KEY] {
                if !self.contains(required) {
                    return Err(ConfigError::MissingRequiredKey {
                        name: required.to_string(),
                    });
                }
            }
            match self.get(EXCLUSIVE_KEY) {
                Some(key) if is_truthy(key.raw()) => {}
                Some(_) | None => {
                    log::warn!("'{SWAP_LAST_KEY} = true' implies '{EXCLUSIVE_KEY} = true'");
                    self.pop(EXCLUSIVE_KEY);
                    self.keys
                        .push(Key::new(EXCLUSIVE_KEY, "true", KeyKind::Constant));
                }
            }
        }
        if !self.contains(EXCLUSIVE_KEY) {
            self.keys
                .push(Key::new(EXCLUSIVE_KEY, "false", KeyKind::Constant));
        }

        for &name in PLAIN_VALUE_KEYS {
            if let Some(key) = self.get(name)
                && !matches!(key.kind(), KeyKind::Constant | KeyKind::List { structural: true })
            {
                return Err(ConfigError::PlainValueRequired {
                    name: name.to_string(),
                });
            }
        }

        self.check_references()?;
        self.check_cycles()
    }

    /// An undeclared reference is fatal for structural keys (a broken
    /// `DirectoryStructure` invalidates the whole run) and a warning for
    /// ordinary keys (the token survives substitution unexpanded).
    fn check_references(&mut self) -> Result<(), ConfigError> {
        for key in &self.keys {
            for dep in key.dependencies() {
                if self.contains(dep) {
                    continue;
                }
                if STRUCTURAL_KEYS.contains(&key.name()) {
                    return Err(ConfigError::UndeclaredReference {
                        key: key.name().to_string(),
                        reference: dep.clone(),
                    });
                }
                log::warn!(
                    "key '{}' references undeclared key '{dep}'; the reference will not be expanded",
                    key.name()
                );
            }
        }

        // Modifiers for keys that do not exist can never override anything.
        let declared: HashSet<&str> = self.keys.iter().map(Key::name).collect();
        self.modifiers.retain(|m| {
            let known = declared.contains(m.target());
            let protected = PROTECTED_KEYS.contains(&m.target());
            if !known || protected {
                log::warn!(
                    "dropping modifier for '{}': no such declarable key",
                    m.target()
                );
            }
            known && !protected
        });
        Ok(())
    }

    fn check_cycles(&self) -> Result<(), ConfigError> {
        for key in &self.keys {
            for dep in key.dependencies() {
                if self.depends_on(dep, key.name()) || dep == key.name() {
                    return Err(ConfigError::CircularDependency {
                        key: key.name().to_string(),
                        via: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Picks the right key kind for a raw declaration. Order matters: range and
/// file declarations have distinctive shapes, shell capture and expressions
/// are recognized by their tokens, and everything else is a constant or a
/// plain list.
fn classify(name: &str, value: &str, base_dir: &Path) -> Result<Key, ConfigError> {
    lazy_static::lazy_static! {
        static ref RANGE_SHAPE: regex::Regex =
            regex::Regex::new(r"^F\s+.+\s+T\s+.+\s+V\s+.+$").unwrap();
        static ref SHELL_SHAPE: regex::Regex =
            regex::Regex::new(r"^\$b\{.*\}$").unwrap();
    }

    if RANGE_SHAPE.is_match(value) {
        return Ok(Key::new(name, value, KeyKind::Range));
    }
    if let Some(path) = value.strip_prefix("LF ") {
        let expanded = shellexpand::tilde(path.trim()).into_owned();
        let mut file = PathBuf::from(expanded);
        if file.is_relative() {
            file = base_dir.join(file);
        }
        let content = fs::read_to_string(&file).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ConfigError::InputNotFound { path: file.clone() },
            _ => ConfigError::Io {
                path: file.clone(),
                source,
            },
        })?;
        return Ok(Key::new(name, content, KeyKind::FileList));
    }
    if SHELL_SHAPE.is_match(value) {
        return Ok(Key::new(name, value, KeyKind::Shell));
    }
    if value.contains("$(") || value.contains("${") {
        return Ok(Key::new(name, value, KeyKind::Expression));
    }

    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    if quoted || value.split_whitespace().count() <= 1 {
        return Ok(Key::new(name, strip_quotes(value), KeyKind::Constant));
    }
    Ok(Key::new(
        name,
        value,
        KeyKind::List {
            structural: STRUCTURAL_KEYS.contains(&name),
        },
    ))
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<KeyTable, ConfigError> {
        KeyTable::parse(text, Path::new("/tmp"))
    }

    fn parse_ok(text: &str) -> KeyTable {
        parse(text).unwrap()
    }

    #[test]
    fn test_parse_classifies_kinds() {
        let table = parse_ok(
            "A = 1\n\
             B = 1 2 3\n\
             C = \"a quoted constant\"\n\
             D = run_$(A)\n\
             E = F 0 T 10 V +1\n\
             S = $b{hostname}\n\
             Execute = ./simulate --steps 100\n",
        );
        assert!(matches!(table.get("A").unwrap().kind(), KeyKind::Constant));
        assert!(matches!(
            table.get("B").unwrap().kind(),
            KeyKind::List { structural: false }
        ));
        assert!(matches!(table.get("C").unwrap().kind(), KeyKind::Constant));
        assert_eq!(table.get("C").unwrap().raw(), "a quoted constant");
        assert!(matches!(table.get("D").unwrap().kind(), KeyKind::Expression));
        assert!(matches!(table.get("E").unwrap().kind(), KeyKind::Range));
        assert!(matches!(table.get("S").unwrap().kind(), KeyKind::Shell));
        assert!(matches!(
            table.get("Execute").unwrap().kind(),
            KeyKind::List { structural: true }
        ));
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let table = parse_ok("# a comment\n\nA = 1\nExecute = run\n");
        assert!(table.contains("A"));
        assert!(!table.contains("# a comment"));
    }

    #[test]
    fn test_first_declaration_wins() {
        let table = parse_ok("A = first\nA = second\nExecute = run\n");
        assert_eq!(table.get("A").unwrap().raw(), "first");
    }

    #[test]
    fn test_protected_keys_are_rejected() {
        assert!(matches!(
            parse("JOB_ID = 3\nExecute = run\n"),
            Err(ConfigError::ProtectedKey { .. })
        ));
    }

    #[test]
    fn test_injected_keys_are_present() {
        let table = parse_ok("Execute = run\n");
        assert_eq!(table.get("JOB_ID").unwrap().raw(), "-1");
        assert_eq!(table.get("BASE_DIR").unwrap().raw(), "/tmp");
    }

    #[test]
    fn test_missing_execute_is_fatal() {
        let mut table = parse_ok("A = 1\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::MissingRequiredKey { .. })
        ));
    }

    #[test]
    fn test_unsupported_dialect_is_fatal() {
        let mut table = parse_ok("Execute = run\nInputType = yaml\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::UnsupportedDialect { .. })
        ));
    }

    #[test]
    fn test_cycle_detection_terminates() {
        let mut table = parse_ok("X = $(Y)\nY = $(X)\nExecute = run\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut table = parse_ok("X = $(X)_again\nExecute = run\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_transitive_dependencies() {
        let table = parse_ok("A = 1\nB = $(A)\nC = $(B)\nExecute = run\n");
        assert!(table.depends_on("C", "A"));
        assert!(table.depends_on("C", "B"));
        assert!(!table.depends_on("A", "C"));
    }

    #[test]
    fn test_undeclared_reference_in_structural_key_is_fatal() {
        let mut table = parse_ok("Execute = run\nDirectoryStructure = out_$(Missing)\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::UndeclaredReference { .. })
        ));
    }

    #[test]
    fn test_undeclared_reference_in_ordinary_key_is_a_warning() {
        let mut table = parse_ok("Execute = run\nName = out_$(Missing)\n");
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_plain_value_keys_reject_lists_and_expressions() {
        let mut table = parse_ok("Execute = run\nParallelJobs = $(A)\nA = 2\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::PlainValueRequired { .. })
        ));
    }

    #[test]
    fn test_swap_requires_directory_and_last_file() {
        let mut table = parse_ok("Execute = run\nSwapLast = true\n");
        assert!(matches!(
            table.validate(),
            Err(ConfigError::MissingRequiredKey { .. })
        ));
    }

    #[test]
    fn test_swap_forces_exclusive() {
        let mut table = parse_ok(
            "Execute = run\nSwapLast = true\nDirectoryStructure = d_$(JOB_ID)\nLastFile = last.conf\n",
        );
        table.validate().unwrap();
        assert_eq!(table.get(EXCLUSIVE_KEY).unwrap().raw(), "true");
    }

    #[test]
    fn test_exclusive_defaults_to_false() {
        let mut table = parse_ok("Execute = run\n");
        table.validate().unwrap();
        assert_eq!(table.get(EXCLUSIVE_KEY).unwrap().raw(), "false");
    }

    #[test]
    fn test_modifier_parsing() {
        let table = parse_ok("Steps = 1000\nT = 0.1 0.5\nSteps = 9000 @@T=0.5\nExecute = run\n");
        let (_, modifiers) = table.into_parts();
        assert_eq!(modifiers.len(), 1);
        assert_eq!(modifiers[0].target(), "Steps");
    }

    #[test]
    fn test_modifier_for_unknown_key_is_dropped() {
        let mut table = parse_ok("Execute = run\nGhost = 1 @@T=0.5\n");
        table.validate().unwrap();
        let (_, modifiers) = table.into_parts();
        assert!(modifiers.is_empty());
    }

    #[test]
    fn test_missing_list_file_is_fatal() {
        let result = parse("A = LF /nonexistent/file.dat\nExecute = run\n");
        assert!(matches!(result, Err(ConfigError::InputNotFound { .. })));
    }

    #[test]
    fn test_pop_number() {
        let mut table = parse_ok("ParallelJobs = 4\nExecute = run\n");
        let jobs: Option<usize> = table.pop_number("ParallelJobs").unwrap();
        assert_eq!(jobs, Some(4));
        assert!(!table.contains("ParallelJobs"));
    }
}
