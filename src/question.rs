//! Compiles one schema property into a typed question descriptor.
//!
//! Compilation is pure: the descriptor carries the prompt kind, a string
//! default, and named validators/filters that the prompt engine (or the
//! remote sanitiser) dispatches on. Nothing is printed here apart from the
//! warning about a default missing from its choice list.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Number, Value};
use tracing::warn;

use crate::schema::{ParamNode, ParamType};

pub const BOOLEAN_CHOICES: [&str; 2] = ["True", "False"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    /// Free-text entry.
    Input,
    /// Closed choice over `QuestionDescriptor::choices`.
    List,
}

#[derive(Clone, Debug)]
pub enum Validator {
    Number,
    Integer,
    Range {
        minimum: Option<Number>,
        maximum: Option<Number>,
    },
    Enum(Vec<String>),
    Pattern {
        source: String,
        regex: Option<Regex>,
    },
}

impl Validator {
    /// `Ok(())` when `raw` is acceptable, otherwise a reason for the user.
    pub fn check(&self, raw: &str) -> Result<(), String> {
        match self {
            Validator::Number => {
                if raw.trim().is_empty() || raw.trim().parse::<f64>().is_ok() {
                    Ok(())
                } else {
                    Err("Must be a number".to_string())
                }
            }
            Validator::Integer => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(());
                }
                match (trimmed.parse::<i64>(), trimmed.parse::<f64>()) {
                    (Ok(int), Ok(float)) if int as f64 == float => Ok(()),
                    _ => Err("Must be an integer".to_string()),
                }
            }
            Validator::Range { minimum, maximum } => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(());
                }
                let value: f64 = trimmed
                    .parse()
                    .map_err(|_| "Must be a number".to_string())?;
                if let Some(min) = minimum
                    && min.as_f64().is_some_and(|min| value < min)
                {
                    return Err(format!("Must be greater than or equal to {min}"));
                }
                if let Some(max) = maximum
                    && max.as_f64().is_some_and(|max| value > max)
                {
                    return Err(format!("Must be less than or equal to {max}"));
                }
                Ok(())
            }
            Validator::Enum(values) => {
                if raw.is_empty() || values.iter().any(|value| value == raw) {
                    Ok(())
                } else {
                    Err(format!("Must be one of: {}", values.join(", ")))
                }
            }
            Validator::Pattern { source, regex } => {
                if raw.is_empty() {
                    return Ok(());
                }
                match regex {
                    Some(regex) if regex.is_match(raw) => Ok(()),
                    Some(_) => Err(format!("Must match pattern: {source}")),
                    None => Err(format!(
                        "Schema pattern is not a valid regular expression: {source}"
                    )),
                }
            }
        }
    }
}

/// Coerces an accepted raw answer into the stored, typed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Boolean,
    Float,
    Integer,
}

impl Filter {
    pub fn apply(&self, raw: &str) -> Result<Value, String> {
        self.apply_value(&Value::String(raw.to_string()))
    }

    /// Like [`Filter::apply`], but tolerates values that are already typed.
    pub fn apply_value(&self, raw: &Value) -> Result<Value, String> {
        match (self, raw) {
            (Filter::Boolean, Value::Bool(_)) => Ok(raw.clone()),
            (Filter::Boolean, Value::String(text)) => {
                Ok(Value::Bool(text.trim().eq_ignore_ascii_case("true")))
            }
            (Filter::Float, Value::Number(_)) => Ok(raw.clone()),
            (Filter::Float, Value::String(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(Value::String(String::new()));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{text}' is not a number"))
            }
            (Filter::Integer, Value::Number(number)) => match number.as_f64() {
                Some(float) if number.is_f64() && float.fract() == 0.0 => {
                    Ok(Value::from(float as i64))
                }
                Some(_) if number.is_f64() => Err(format!("'{number}' is not an integer")),
                _ => Ok(raw.clone()),
            },
            (Filter::Integer, Value::String(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(Value::String(String::new()));
                }
                trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("'{text}' is not an integer"))
            }
            (_, other) => Err(format!("cannot convert {other} with {self:?} filter")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QuestionDescriptor {
    pub id: String,
    pub kind: PromptKind,
    pub default: Option<String>,
    pub choices: Vec<String>,
    pub validators: Vec<Validator>,
    pub filter: Option<Filter>,
    pub description: Option<String>,
    pub help_text: Option<String>,
}

impl QuestionDescriptor {
    /// Identifier as the user sees it on the command line.
    pub fn display_name(&self) -> String {
        if self.id.starts_with('-') {
            self.id.clone()
        } else {
            format!("--{}", self.id)
        }
    }

    pub fn validate(&self, raw: &str) -> Result<(), String> {
        for validator in &self.validators {
            validator.check(raw)?;
        }
        Ok(())
    }

    /// Apply the output filter; unfiltered answers are stored as text.
    pub fn filter(&self, raw: &str) -> Result<Value, String> {
        match self.filter {
            Some(filter) => filter.apply(raw),
            None => Ok(Value::String(raw.to_string())),
        }
    }
}

/// Build the question for one leaf property.
///
/// The default is resolved from the schema, then the current Input Values,
/// then answers already given in this session.
pub fn compile(
    id: &str,
    node: &ParamNode,
    input_params: &IndexMap<String, Value>,
    answers: &IndexMap<String, Value>,
) -> QuestionDescriptor {
    let mut kind = PromptKind::Input;
    let mut choices = Vec::new();
    let mut default = None;

    if node.kind == ParamType::Boolean {
        kind = PromptKind::List;
        choices = BOOLEAN_CHOICES.iter().map(|c| c.to_string()).collect();
        default = Some(Value::Bool(false));
    }
    if let Some(value) = &node.default {
        default = Some(normalise(node, value));
    }
    if let Some(value) = input_params.get(id) {
        default = Some(normalise(node, value));
    }
    if let Some(value) = answers.get(id) {
        default = Some(value.clone());
    }

    if let Some(values) = node.choices() {
        kind = PromptKind::List;
        choices = values.to_vec();
    }

    let filter = match node.kind {
        ParamType::Boolean => Some(Filter::Boolean),
        ParamType::Number | ParamType::Range => Some(Filter::Float),
        ParamType::Integer => Some(Filter::Integer),
        _ => None,
    };

    let mut question = QuestionDescriptor {
        id: id.to_string(),
        kind,
        default: default.as_ref().map(stringify),
        choices,
        validators: validators_for(node),
        filter,
        description: node.description.clone(),
        help_text: node.help_text.clone(),
    };
    preselect_default(&mut question);
    question
}

/// Validators implied by a property's type and constraints, in check order.
pub fn validators_for(node: &ParamNode) -> Vec<Validator> {
    let mut validators = Vec::new();
    match node.kind {
        ParamType::Number => validators.push(Validator::Number),
        ParamType::Integer => validators.push(Validator::Integer),
        ParamType::Range => validators.push(Validator::Range {
            minimum: node.minimum.clone(),
            maximum: node.maximum.clone(),
        }),
        _ => {}
    }
    if let Some(values) = node.choices() {
        validators.push(Validator::Enum(values.to_vec()));
    }
    if let Some(source) = &node.pattern {
        let regex = match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(pattern = %source, "invalid schema pattern: {err}");
                None
            }
        };
        validators.push(Validator::Pattern {
            source: source.clone(),
            regex,
        });
    }
    validators
}

/// Text form of a value as shown in prompts and inline flags.
///
/// Booleans use the capitalised spelling of the boolean choice list.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => BOOLEAN_CHOICES[0].to_string(),
        Value::Bool(false) => BOOLEAN_CHOICES[1].to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn normalise(node: &ParamNode, value: &Value) -> Value {
    match (node.kind, value) {
        (ParamType::Boolean, Value::String(text)) => Value::Bool(text.eq_ignore_ascii_case("true")),
        _ => value.clone(),
    }
}

/// The line prompt shows the first choice as pre-selected, so the default
/// has to be moved to the front of the list.
fn preselect_default(question: &mut QuestionDescriptor) {
    if question.kind != PromptKind::List {
        return;
    }
    let Some(default) = &question.default else {
        return;
    };
    match question.choices.iter().position(|choice| choice == default) {
        Some(index) => {
            let choice = question.choices.remove(index);
            question.choices.insert(0, choice);
        }
        None => warn!(
            "Default value `{}` not found in list of choices: {}",
            default,
            question.choices.join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: Value) -> ParamNode {
        serde_json::from_value(value).unwrap()
    }

    fn compile_plain(id: &str, node: &ParamNode) -> QuestionDescriptor {
        compile(id, node, &IndexMap::new(), &IndexMap::new())
    }

    #[test]
    fn boolean_filter_round_trips() {
        let question = compile_plain("skip", &node(json!({"type": "boolean"})));
        assert_eq!(question.kind, PromptKind::List);
        for value in [true, false] {
            let text = stringify(&Value::Bool(value));
            assert_eq!(question.filter(&text).unwrap(), Value::Bool(value));
        }
        assert_eq!(question.filter("TRUE").unwrap(), json!(true));
        assert_eq!(question.default.as_deref(), Some("False"));
        assert_eq!(question.choices, vec!["False", "True"]);
    }

    #[test]
    fn numeric_empty_input_is_valid_and_stays_empty() {
        for fixture in [
            json!({"type": "number"}),
            json!({"type": "integer"}),
            json!({"type": "range", "minimum": 1, "maximum": 5}),
        ] {
            let question = compile_plain("n", &node(fixture));
            assert!(question.validate("").is_ok());
            assert_eq!(question.filter("").unwrap(), json!(""));
        }
    }

    #[test]
    fn integer_rejects_fractions() {
        let question = compile_plain("threads", &node(json!({"type": "integer"})));
        assert_eq!(question.validate("1.5").unwrap_err(), "Must be an integer");
        assert!(question.validate("abc").is_err());
        assert!(question.validate("12").is_ok());
        assert_eq!(question.filter("12").unwrap(), json!(12));
    }

    #[test]
    fn number_parses_floats() {
        let question = compile_plain("ratio", &node(json!({"type": "number"})));
        assert!(question.validate("0.25").is_ok());
        assert_eq!(question.validate("x").unwrap_err(), "Must be a number");
        assert_eq!(question.filter("0.25").unwrap(), json!(0.25));
    }

    #[test]
    fn range_enforces_optional_bounds() {
        let question = compile_plain(
            "q",
            &node(json!({"type": "range", "minimum": 1, "maximum": 10})),
        );
        assert!(question.validate("10").is_ok());
        assert_eq!(
            question.validate("0.5").unwrap_err(),
            "Must be greater than or equal to 1"
        );
        assert_eq!(
            question.validate("11").unwrap_err(),
            "Must be less than or equal to 10"
        );

        let open = compile_plain("q", &node(json!({"type": "range", "minimum": 0})));
        assert!(open.validate("1e9").is_ok());
    }

    #[test]
    fn pattern_uses_substring_search() {
        let question = compile_plain(
            "input",
            &node(json!({"type": "string", "pattern": "\\.csv"})),
        );
        assert!(question.validate("samples.csv.gz").is_ok());
        assert!(question.validate("").is_ok());
        assert_eq!(
            question.validate("samples.tsv").unwrap_err(),
            "Must match pattern: \\.csv"
        );
    }

    #[test]
    fn enum_default_moves_to_front() {
        let fixture = node(json!({
            "type": "string",
            "enum": ["GRCh37", "GRCh38", "GRCm39"],
            "default": "GRCh38"
        }));
        let question = compile_plain("genome", &fixture);
        assert_eq!(question.kind, PromptKind::List);
        assert_eq!(question.choices, vec!["GRCh38", "GRCh37", "GRCm39"]);
        assert!(question.validate("GRCh99").is_err());
        assert!(question.validate("").is_ok());
    }

    #[test]
    fn enum_default_not_in_list_keeps_order() {
        let fixture = node(json!({
            "type": "string",
            "enum": ["a", "b"],
            "default": "z"
        }));
        let logs = SharedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let question = tracing::subscriber::with_default(subscriber, || {
            compile_plain("letter", &fixture)
        });
        assert_eq!(question.choices, vec!["a", "b"]);
        assert_eq!(question.default.as_deref(), Some("z"));

        let logged = logs.contents();
        assert!(logged.contains("WARN"), "{logged}");
        assert!(logged.contains("Default value `z` not found in list of choices: a, b"));
    }

    #[derive(Clone, Default)]
    struct SharedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedLog {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_precedence_schema_then_inputs_then_answers() {
        let fixture = node(json!({"type": "integer", "default": 1}));
        let mut inputs = IndexMap::new();
        let mut answers = IndexMap::new();
        assert_eq!(compile("a", &fixture, &inputs, &answers).default.as_deref(), Some("1"));

        inputs.insert("a".to_string(), json!(2));
        assert_eq!(compile("a", &fixture, &inputs, &answers).default.as_deref(), Some("2"));

        answers.insert("a".to_string(), json!(3));
        assert_eq!(compile("a", &fixture, &inputs, &answers).default.as_deref(), Some("3"));
    }

    #[test]
    fn string_boolean_inputs_are_normalised() {
        let fixture = node(json!({"type": "boolean"}));
        let mut inputs = IndexMap::new();
        inputs.insert("flag".to_string(), json!("true"));
        let question = compile("flag", &fixture, &inputs, &IndexMap::new());
        assert_eq!(question.default.as_deref(), Some("True"));
        assert_eq!(question.choices[0], "True");
    }

    #[test]
    fn display_name_adds_double_hyphen_for_params_only() {
        let fixture = node(json!({"type": "string"}));
        assert_eq!(compile_plain("outdir", &fixture).display_name(), "--outdir");
        assert_eq!(compile_plain("-profile", &fixture).display_name(), "-profile");
    }
}
