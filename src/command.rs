//! Builds the final `nextflow run` invocation.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::question;
use crate::schema::{self, SchemaStore};

pub const PARAMS_FILE_FLAG: &str = "-params-file";
pub const DEFAULT_PARAMS_FILE: &str = "nf-params.json";

/// How workflow parameters reach the workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamsMode {
    /// Write them to this JSON file and pass `-params-file`.
    File(PathBuf),
    /// Pass each one as `--name "value"`.
    Inline,
}

/// `nextflow run <target>` for a local directory or a remote pipeline name.
pub fn workflow_prefix(pipeline: Option<&str>, revision: Option<&str>) -> String {
    let Some(pipeline) = pipeline else {
        return "nextflow run".to_string();
    };
    let local = Path::new(pipeline);
    if local.exists() {
        let path = std::path::absolute(local).unwrap_or_else(|_| local.to_path_buf());
        return format!("nextflow run {}", path.display());
    }
    let mut prefix = if pipeline.contains('/') {
        format!("nextflow run {pipeline}")
    } else {
        format!("nextflow run nf-core/{pipeline}")
    };
    if let Some(revision) = revision.filter(|rev| !rev.is_empty()) {
        prefix.push_str(&format!(" -r {revision}"));
    }
    prefix
}

/// Engine flags in declaration order, then anything else in insertion order.
pub fn ordered_flags(flags: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    let mut ordered = IndexMap::new();
    for id in schema::engine_flags_group().properties.keys() {
        if let Some(value) = flags.get(id) {
            ordered.insert(id.clone(), value.clone());
        }
    }
    for (id, value) in flags {
        if !ordered.contains_key(id) {
            ordered.insert(id.clone(), value.clone());
        }
    }
    ordered
}

/// Input Values in schema property order.
pub fn ordered_params(store: &SchemaStore) -> IndexMap<String, Value> {
    let mut ordered = IndexMap::new();
    for id in store.flat().keys() {
        if let Some(value) = store.input_params.get(id) {
            ordered.insert(id.clone(), value.clone());
        }
    }
    for (id, value) in &store.input_params {
        if !ordered.contains_key(id) {
            ordered.insert(id.clone(), value.clone());
        }
    }
    ordered
}

/// Append flags and parameters to `prefix`. In file mode the parameter file
/// is written as a side effect.
pub fn build_command(
    prefix: &str,
    flags: &IndexMap<String, Value>,
    params: &IndexMap<String, Value>,
    mode: &ParamsMode,
) -> Result<String> {
    let mut command = prefix.to_string();

    for (flag, value) in flags {
        match value {
            Value::Bool(true) => command.push_str(&format!(" {flag}")),
            Value::Bool(false) => {}
            other => command.push_str(&format!(" {flag} \"{}\"", escape(&question::stringify(other)))),
        }
    }

    if params.is_empty() {
        return Ok(command);
    }
    match mode {
        ParamsMode::File(path) => {
            write_params_file(path, params)?;
            command.push_str(&format!(
                " {PARAMS_FILE_FLAG} \"{}\"",
                escape(&display_path(path))
            ));
        }
        ParamsMode::Inline => {
            for (param, value) in params {
                match value {
                    Value::Bool(true) => command.push_str(&format!(" --{param}")),
                    other => command.push_str(&format!(
                        " --{param} \"{}\"",
                        escape(&question::stringify(other))
                    )),
                }
            }
        }
    }
    Ok(command)
}

/// Write `params` as a JSON object indented by four spaces.
pub fn write_params_file(path: &Path, params: &IndexMap<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    params.serialize(&mut serializer)?;
    buffer.write_all(b"\n")?;
    fs::write(path, buffer)?;
    info!(path = %path.display(), "wrote parameter file");
    Ok(())
}

/// Escape the characters `sh` still interprets inside double quotes.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Relative to the working directory when the file lives under it.
fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
