// src/models.rs

use std::collections::HashMap;
use std::str::FromStr;

/// One fully resolved name → value snapshot: a single point in the sweep.
/// States are built by the `StateFactory` and treated as immutable once
/// handed to the job engine.
pub type State = HashMap<String, String>;

/// The dialect used to materialize a job's input file from the template
/// declared by `CopyFrom`. Selected by the reserved `InputType` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Rewrite `name <sep> value` lines, appending keys the template lacks.
    #[default]
    Standard,
    /// Rewrite `variable NAME equal VALUE` directives.
    Lammps,
    /// Substitute `{{name}}` placeholders anywhere in the template.
    Template,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Lammps => "lammps",
            Self::Template => "template",
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "lammps" => Ok(Self::Lammps),
            "template" => Ok(Self::Template),
            other => Err(other.to_string()),
        }
    }
}

/// Run controls collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Print the full per-job plan and exit without launching.
    pub dry_run: bool,
    /// Print the aggregate plan only and exit without launching.
    pub summarize: bool,
    /// Never overwrite existing directories or generated input files.
    pub safe: bool,
    /// Index of the first state to dispatch.
    pub start_from: usize,
    /// Dispatch at most this many states, counted from `start_from`.
    pub end_after: Option<usize>,
    /// Seconds to wait before dispatching the first job.
    pub delay: Option<f64>,
}

/// Loose boolean parsing for flag-like key values (`Exclusive`, `Relaunch`, ...).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}
