//! Terminal walk over the schema tree.
//!
//! Each visible leaf is asked once (re-asked until its validators accept the
//! reply); groups are presented as a menu of their children plus a
//! "Continue" entry that only lets the user leave once every required child
//! has a value.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{LaunchError, Result};
use crate::prompt::Prompter;
use crate::question::{self, PromptKind, QuestionDescriptor};
use crate::reconcile;
use crate::schema::{self, ParamNode, SchemaStore};

pub const CONTINUE_CHOICE: &str = "Continue >>";
pub const DEFAULT_REQUIRED_RETRY_LIMIT: usize = 3;

/// Answers from one terminal session, split by namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectedAnswers {
    pub flags: IndexMap<String, Value>,
    pub params: IndexMap<String, Value>,
}

pub struct PromptEngine<'p, P: Prompter + ?Sized> {
    prompter: &'p mut P,
    show_hidden: bool,
    required_retry_limit: usize,
    reported: Vec<LaunchError>,
}

impl<'p, P: Prompter + ?Sized> PromptEngine<'p, P> {
    pub fn new(prompter: &'p mut P) -> Self {
        Self {
            prompter,
            show_hidden: false,
            required_retry_limit: DEFAULT_REQUIRED_RETRY_LIMIT,
            reported: Vec::new(),
        }
    }

    pub fn show_hidden(mut self, show_hidden: bool) -> Self {
        self.show_hidden = show_hidden;
        self
    }

    /// Attempts allowed for an empty required answer when nobody is at the
    /// terminal. Interactive sessions ask until they get a value.
    pub fn required_retry_limit(mut self, limit: usize) -> Self {
        self.required_retry_limit = limit.max(1);
        self
    }

    /// Configuration problems that were reported and skipped over.
    pub fn reported_errors(&self) -> &[LaunchError] {
        &self.reported
    }

    pub fn into_reported_errors(self) -> Vec<LaunchError> {
        self.reported
    }

    /// Walk the whole schema, then merge workflow answers into Input Values.
    pub fn prompt_schema(&mut self, store: &mut SchemaStore) -> Result<CollectedAnswers> {
        let answers = self.collect(store)?;

        let flag_ids = schema::engine_flags_group().properties;
        let mut collected = CollectedAnswers::default();
        for (id, value) in answers {
            if id == schema::ENGINE_FLAGS_GROUP {
                continue;
            }
            if flag_ids.contains_key(&id) {
                collected.flags.insert(id, value);
            } else {
                collected.params.insert(id, value);
            }
        }
        reconcile::apply_session_answers(store, &collected.params);
        debug!(
            flags = collected.flags.len(),
            params = collected.params.len(),
            "collected answers from command-line wizard"
        );
        Ok(collected)
    }

    fn collect(&mut self, store: &SchemaStore) -> Result<IndexMap<String, Value>> {
        let mut answers = IndexMap::new();
        for (id, node) in &store.schema.properties {
            if node.hidden && !self.show_hidden {
                continue;
            }
            if node.is_group() {
                let group_answers = self.prompt_group(id, node, store)?;
                answers.extend(group_answers);
            } else {
                let is_required = store.schema.required.contains(id);
                if let Some(value) = self.prompt_param(id, node, is_required, store, &answers)? {
                    answers.insert(id.clone(), value);
                }
            }
        }
        Ok(answers)
    }

    /// Ask for one leaf. `None` means the user left it empty.
    pub fn prompt_param(
        &mut self,
        id: &str,
        node: &ParamNode,
        is_required: bool,
        store: &SchemaStore,
        answers: &IndexMap<String, Value>,
    ) -> Result<Option<Value>> {
        let question = question::compile(id, node, &store.input_params, answers);
        self.prompter.header(
            &question.display_name(),
            question.description.as_deref(),
            question.help_text.as_deref(),
        );

        let mut value = self.ask(&question)?;
        let mut attempts = 1;
        while is_required && is_blank_answer(&value) {
            if !self.prompter.is_interactive() && attempts >= self.required_retry_limit {
                return Err(LaunchError::RequiredField {
                    id: id.to_string(),
                    attempts,
                });
            }
            self.prompter.error("This property is required.");
            value = self.ask(&question)?;
            attempts += 1;
        }

        if value == Value::String(String::new()) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Menu over a single-level group. Nested groups are reported and the
    /// whole group yields no answers.
    pub fn prompt_group(
        &mut self,
        id: &str,
        node: &ParamNode,
        store: &SchemaStore,
    ) -> Result<IndexMap<String, Value>> {
        let mut choices = vec![CONTINUE_CHOICE.to_string()];
        for (child_id, child) in &node.properties {
            if child.is_group() {
                let err = LaunchError::Configuration(format!(
                    "group '{id}' contains nested group '{child_id}'; only groups one level deep are supported"
                ));
                error!("{err}");
                self.reported.push(err);
                return Ok(IndexMap::new());
            }
            if !child.hidden || self.show_hidden {
                choices.push(child_id.clone());
            }
        }
        if choices.len() == 1 {
            return Ok(IndexMap::new());
        }

        let mut answers = IndexMap::new();
        loop {
            self.prompter
                .header(id, node.description.as_deref(), node.help_text.as_deref());
            let choice = self.prompter.select(id, &choices)?;
            if choice == CONTINUE_CHOICE {
                let missing: Vec<&String> = node
                    .required
                    .iter()
                    .filter(|required| {
                        schema::is_blank(store.input_params.get(*required))
                            && schema::is_blank(answers.get(*required))
                    })
                    .collect();
                if missing.is_empty() {
                    break;
                }
                for required in missing {
                    self.prompter.error(&format!("'{required}' is required."));
                }
                continue;
            }

            let Some(child) = node.properties.get(&choice) else {
                continue;
            };
            let is_required = node.required.contains(&choice);
            if let Some(value) = self.prompt_param(&choice, child, is_required, store, &answers)? {
                answers.insert(choice, value);
            }
        }
        Ok(answers)
    }

    /// Present → validate → re-present until accepted, then filter.
    fn ask(&mut self, question: &QuestionDescriptor) -> Result<Value> {
        loop {
            let raw = match question.kind {
                PromptKind::Input => self
                    .prompter
                    .input(&question.id, question.default.as_deref())?,
                PromptKind::List => self.prompter.select(&question.id, &question.choices)?,
            };
            let accepted = question.validate(&raw).and_then(|_| question.filter(&raw));
            match accepted {
                Ok(value) => return Ok(value),
                Err(reason) => self.prompter.error(&reason),
            }
        }
    }
}

fn is_blank_answer(value: &Value) -> bool {
    matches!(value, Value::String(text) if text.trim().is_empty())
}
