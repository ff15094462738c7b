// src/system/template.rs

use crate::models::{Dialect, State};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{{{name}}}}}' in template")]
    UnknownPlaceholder { name: String },
}

/// Renders a job's input file from the template lines and the resolved
/// state, in the selected dialect.
///
/// For the line-rewriting dialects, `rewrite` lists the key names whose
/// values replace matching template lines; keys the template never mentions
/// are appended at the end so the generated file always carries them.
pub fn render(
    dialect: Dialect,
    lines: &[String],
    state: &State,
    separator: &str,
    rewrite: &[String],
) -> Result<String, TemplateError> {
    match dialect {
        Dialect::Standard => Ok(render_standard(lines, state, separator, rewrite)),
        Dialect::Lammps => Ok(render_lammps(lines, state, rewrite)),
        Dialect::Template => render_placeholders(lines, state),
    }
}

/// `name <sep> value` line rewriting.
fn render_standard(lines: &[String], state: &State, separator: &str, rewrite: &[String]) -> String {
    let mut pending: Vec<&str> = rewrite.iter().map(String::as_str).collect();
    let mut out = String::new();

    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() > 1 && tokens[1] == separator && pending.contains(&tokens[0]) {
            let name = tokens[0];
            let value = state.get(name).map_or("", String::as_str);
            out.push_str(&format!("{name} {separator} {value}\n"));
            pending.retain(|p| *p != name);
            log::debug!("rewriting template key '{name}'");
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    for name in pending {
        let value = state.get(name).map_or("", String::as_str);
        out.push_str(&format!("{name} {separator} {value}\n"));
    }
    out
}

/// `variable NAME equal VALUE` directive rewriting.
fn render_lammps(lines: &[String], state: &State, rewrite: &[String]) -> String {
    let mut pending: Vec<&str> = rewrite.iter().map(String::as_str).collect();
    let mut out = String::new();

    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() >= 3
            && tokens[0] == "variable"
            && tokens[2] == "equal"
            && pending.contains(&tokens[1])
        {
            let name = tokens[1];
            let value = state.get(name).map_or("", String::as_str);
            out.push_str(&format!("variable {name} equal {value}\n"));
            pending.retain(|p| *p != name);
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    for name in pending {
        let value = state.get(name).map_or("", String::as_str);
        out.push_str(&format!("variable {name} equal {value}\n"));
    }
    out
}

/// `{{name}}` placeholder substitution over the whole template. Every
/// placeholder must name a key in the state.
fn render_placeholders(lines: &[String], state: &State) -> Result<String, TemplateError> {
    lazy_static! {
        static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{\s*([\w\[\]]+)\s*\}\}").unwrap();
    }

    let mut out = String::new();
    for line in lines {
        let mut rendered = line.clone();
        for caps in PLACEHOLDER_RE.captures_iter(line) {
            let name = &caps[1];
            let value = state
                .get(name)
                .ok_or_else(|| TemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                })?;
            rendered = rendered.replace(&caps[0], value);
        }
        out.push_str(&rendered);
        out.push('\n');
    }
    Ok(out)
}
