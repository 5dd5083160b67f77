//! Local schema service: the typed parameter schema tree plus the Input
//! Values that are layered on top of it during a launch.
//!
//! A schema is a mapping of top-level identifiers to either leaf parameters
//! or single-level groups (`"type": "object"` with `properties`). Deeper
//! nesting can be represented so that it can be reported, but the prompt
//! engine refuses to walk it.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value};
use tracing::{debug, info};

use crate::error::{LaunchError, Result};
use crate::question;

pub const SCHEMA_FILE_NAME: &str = "nextflow_schema.json";

/// Synthetic group holding invocation-level options. Its children use a
/// leading hyphen so they never collide with `--param` style identifiers.
pub const ENGINE_FLAGS_GROUP: &str = "Nextflow command-line flags";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Boolean,
    Number,
    Integer,
    Range,
    Enum,
    Object,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamNode {
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, ParamNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

impl ParamNode {
    pub fn leaf(kind: ParamType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ParamType::Object
    }

    /// Non-empty enum list, if declared.
    pub fn choices(&self) -> Option<&[String]> {
        self.enum_values
            .as_deref()
            .filter(|values| !values.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSchema {
    #[serde(default)]
    pub properties: IndexMap<String, ParamNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

impl PipelineSchema {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|err| LaunchError::Configuration(format!("invalid pipeline schema: {err}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The engine flag group that is merged in front of every workflow schema.
pub fn engine_flags_group() -> ParamNode {
    let work_dir = std::env::var("NXF_WORK")
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "./work".to_string());

    let mut properties = IndexMap::new();
    properties.insert(
        "-name".to_string(),
        ParamNode {
            description: Some("Unique name for this nextflow run".into()),
            pattern: Some("^[a-zA-Z0-9-_]+$".into()),
            ..ParamNode::leaf(ParamType::String)
        },
    );
    properties.insert(
        "-profile".to_string(),
        ParamNode {
            description: Some("Configuration profile".into()),
            ..ParamNode::leaf(ParamType::String)
        },
    );
    properties.insert(
        "-work-dir".to_string(),
        ParamNode {
            description: Some("Work directory for intermediate files".into()),
            default: Some(Value::String(work_dir)),
            ..ParamNode::leaf(ParamType::String)
        },
    );
    properties.insert(
        "-resume".to_string(),
        ParamNode {
            description: Some("Resume previous run, if found".into()),
            help_text: Some(
                "Execute the script using the cached results, useful to continue \
                 executions that was stopped by an error"
                    .into(),
            ),
            default: Some(Value::Bool(false)),
            ..ParamNode::leaf(ParamType::Boolean)
        },
    );

    ParamNode {
        description: Some("General Nextflow flags to control how the pipeline runs.".into()),
        help_text: Some(
            "These are not specific to the pipeline and will not be saved in any parameter \
             file. They are just used when building the `nextflow run` launch command."
                .into(),
        ),
        properties,
        ..ParamNode::leaf(ParamType::Object)
    }
}

/// Schema tree, its defaults, and the current Input Values.
#[derive(Clone, Debug, Default)]
pub struct SchemaStore {
    pub schema: PipelineSchema,
    pub schema_defaults: IndexMap<String, Value>,
    pub input_params: IndexMap<String, Value>,
    flat: IndexMap<String, ParamNode>,
}

impl SchemaStore {
    pub fn from_schema(schema: PipelineSchema) -> Self {
        let mut store = Self {
            schema,
            ..Self::default()
        };
        store.flatten();
        store.load_defaults();
        store
    }

    /// Load `nextflow_schema.json` from a local pipeline directory.
    pub fn load(pipeline_dir: &Path) -> Result<Self> {
        let path = pipeline_dir.join(SCHEMA_FILE_NAME);
        if !path.is_file() {
            return Err(LaunchError::Configuration(format!(
                "no pipeline schema found at {}",
                path.display()
            )));
        }
        info!(path = %path.display(), "loading pipeline schema");
        let contents = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&contents).map_err(|err| {
            LaunchError::Configuration(format!("{} is not valid JSON: {err}", path.display()))
        })?;
        Ok(Self::from_schema(PipelineSchema::from_value(value)?))
    }

    /// Replace the schema tree, e.g. with the one echoed back by the remote form.
    pub fn set_schema(&mut self, schema: PipelineSchema) {
        self.schema = schema;
        self.flatten();
    }

    /// Rebuild the flat identifier → leaf view, in schema order.
    pub fn flatten(&mut self) {
        let mut flat = IndexMap::new();
        for (id, node) in &self.schema.properties {
            if node.is_group() {
                for (child_id, child) in &node.properties {
                    if !child.is_group() {
                        flat.insert(child_id.clone(), child.clone());
                    }
                }
            } else {
                flat.insert(id.clone(), node.clone());
            }
        }
        self.flat = flat;
    }

    pub fn flat(&self) -> &IndexMap<String, ParamNode> {
        &self.flat
    }

    /// Collect declared defaults of workflow parameters (engine flags excluded).
    pub fn load_defaults(&mut self) {
        let mut defaults = IndexMap::new();
        for (id, node) in &self.schema.properties {
            if id == ENGINE_FLAGS_GROUP {
                continue;
            }
            if node.is_group() {
                for (child_id, child) in &node.properties {
                    if let Some(default) = &child.default {
                        defaults.insert(child_id.clone(), normalise_default(child, default));
                    }
                }
            } else if let Some(default) = &node.default {
                defaults.insert(id.clone(), normalise_default(node, default));
            }
        }
        self.schema_defaults = defaults;
    }

    /// Put the engine flag group first, keeping any copy the schema already carries.
    pub fn merge_engine_flags(&mut self) {
        let mut properties = IndexMap::new();
        properties.insert(ENGINE_FLAGS_GROUP.to_string(), engine_flags_group());
        for (id, node) in std::mem::take(&mut self.schema.properties) {
            properties.insert(id, node);
        }
        self.schema.properties = properties;
        self.flatten();
    }

    /// Load a JSON parameter file over the current Input Values.
    pub fn load_input_params(&mut self, path: &Path) -> Result<()> {
        let params = self.read_params_file(path)?;
        self.input_params.extend(params);
        Ok(())
    }

    /// Read a JSON parameter file, checking every key against the schema.
    pub fn read_params_file(&self, path: &Path) -> Result<IndexMap<String, Value>> {
        info!(path = %path.display(), "loading parameter file");
        let contents = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents).map_err(|err| {
            LaunchError::Configuration(format!("{} is not valid JSON: {err}", path.display()))
        })?;
        let Value::Object(params) = value else {
            return Err(LaunchError::Configuration(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        };
        let mut loaded = IndexMap::new();
        for (id, value) in params {
            if !self.flat.contains_key(&id) {
                return Err(LaunchError::UnknownParam(id));
            }
            loaded.insert(id, value);
        }
        Ok(loaded)
    }

    /// Check every Input Value against the flattened schema.
    pub fn validate_params(&self) -> Result<()> {
        for (id, value) in &self.input_params {
            let node = self
                .flat
                .get(id)
                .ok_or_else(|| LaunchError::UnknownParam(id.clone()))?;
            validate_value(node, value)
                .map_err(|reason| LaunchError::InvalidParams(format!("--{id}: {reason}")))?;
        }

        for (id, node) in &self.schema.properties {
            if id == ENGINE_FLAGS_GROUP {
                continue;
            }
            let required: Vec<&String> = if node.is_group() {
                node.required.iter().collect()
            } else if self.schema.required.contains(id) {
                vec![id]
            } else {
                Vec::new()
            };
            for required_id in required {
                if is_blank(self.input_params.get(required_id)) {
                    return Err(LaunchError::InvalidParams(format!(
                        "'{required_id}' is a required property"
                    )));
                }
            }
        }
        debug!(count = self.input_params.len(), "pipeline parameters validated");
        Ok(())
    }
}

/// Missing, null and empty-string values all count as "no value".
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn normalise_default(node: &ParamNode, default: &Value) -> Value {
    match (node.kind, default) {
        (ParamType::Boolean, Value::String(text)) => Value::Bool(text.eq_ignore_ascii_case("true")),
        _ => default.clone(),
    }
}

fn validate_value(node: &ParamNode, value: &Value) -> std::result::Result<(), String> {
    match node.kind {
        ParamType::Boolean if !value.is_boolean() => {
            return Err(format!("expected a boolean, got {value}"));
        }
        ParamType::Number | ParamType::Range if !value.is_number() => {
            return Err(format!("expected a number, got {value}"));
        }
        ParamType::Integer => {
            let whole = value.as_i64().is_some()
                || value.as_u64().is_some()
                || value.as_f64().is_some_and(|n| n.fract() == 0.0);
            if !whole {
                return Err(format!("expected an integer, got {value}"));
            }
        }
        ParamType::String if !value.is_string() => {
            return Err(format!("expected a string, got {value}"));
        }
        _ => {}
    }
    let text = question::stringify(value);
    for validator in question::validators_for(node) {
        validator.check(&text)?;
    }
    Ok(())
}
