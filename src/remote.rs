//! Browser-based alternative to the terminal wizard.
//!
//! The schema and current values are posted to the launch service, the
//! returned form URL is opened in a browser, and the service's API URL is
//! polled until the user presses "Finished" (or the service reports an
//! error). The form returns every value as text, so results are passed back
//! through the question filters before they are used.

use std::process::{Command, Stdio};

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value, json};
use tracing::{debug, info, warn};

use crate::error::{LaunchError, Result};
use crate::launch::LaunchSession;
use crate::question;
use crate::reconcile;
use crate::schema::{ParamNode, PipelineSchema};
use crate::wait::{self, WaitPolicy};

pub const DEFAULT_LAUNCH_URL: &str = "https://nf-co.re/launch";

/// Acknowledgement status sent back by the launch service. The spelling is
/// part of the protocol.
pub const ACK_STATUS: &str = "recieved";

pub const STATUS_WAITING: &str = "waiting_for_user";
pub const STATUS_COMPLETE: &str = "launch_params_complete";
pub const STATUS_ERROR: &str = "error";

/// HTTP transport for the launch service.
pub trait LaunchApi {
    /// POST a JSON body, returning the decoded JSON response.
    fn submit(&self, url: &str, body: &Value) -> Result<Value>;
    /// GET the current state of a launch session.
    fn poll(&self, url: &str) -> Result<Value>;
}

pub struct HttpLaunchApi {
    agent: ureq::Agent,
}

impl HttpLaunchApi {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl Default for HttpLaunchApi {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchApi for HttpLaunchApi {
    fn submit(&self, url: &str, body: &Value) -> Result<Value> {
        let mut resp = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .send_json(body)
            .map_err(|err| http_error(url, err))?;
        resp.body_mut()
            .read_json::<Value>()
            .map_err(|err| invalid_json(url, err))
    }

    fn poll(&self, url: &str) -> Result<Value> {
        let mut resp = self
            .agent
            .get(url)
            .call()
            .map_err(|err| http_error(url, err))?;
        resp.body_mut()
            .read_json::<Value>()
            .map_err(|err| invalid_json(url, err))
    }
}

fn http_error(url: &str, err: ureq::Error) -> LaunchError {
    LaunchError::Http {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn invalid_json(url: &str, err: ureq::Error) -> LaunchError {
    LaunchError::RemoteProtocol(format!(
        "could not parse JSON response from {url}: {err}"
    ))
}

/// One remote form session.
pub struct RemoteForm<'a, A: LaunchApi + ?Sized> {
    api: &'a A,
    launch_url: String,
    web_url: Option<String>,
    api_url: Option<String>,
}

impl<'a, A: LaunchApi + ?Sized> RemoteForm<'a, A> {
    pub fn new(api: &'a A, launch_url: impl Into<String>) -> Self {
        Self {
            api,
            launch_url: launch_url.into(),
            web_url: None,
            api_url: None,
        }
    }

    /// Attach to a form that was already created, by its web id.
    pub fn resume(api: &'a A, launch_url: impl Into<String>, web_id: &str) -> Self {
        let launch_url = launch_url.into();
        Self {
            web_url: Some(format!("{launch_url}?id={web_id}")),
            api_url: Some(format!("{launch_url}?id={web_id}&api=true")),
            api,
            launch_url,
        }
    }

    pub fn web_url(&self) -> Option<&str> {
        self.web_url.as_deref()
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    /// Send the schema and current values; remembers the returned URLs.
    pub fn submit(&mut self, session: &LaunchSession) -> Result<()> {
        let body = json!({
            "post_content": "json_schema_launcher",
            "api": "true",
            "version": env!("CARGO_PKG_VERSION"),
            "status": STATUS_WAITING,
            "schema": serde_json::to_string(&session.store.schema)?,
            "nxf_flags": serde_json::to_string(&session.nxf_flags)?,
            "input_params": serde_json::to_string(&session.store.input_params)?,
            "cli_launch": true,
            "nextflow_cmd": session.nextflow_cmd,
            "pipeline": session.pipeline,
            "revision": session.revision,
        });
        let response = self.api.submit(&self.launch_url, &body)?;

        let web_url = response.get("web_url").and_then(Value::as_str);
        let api_url = response.get("api_url").and_then(Value::as_str);
        let status = response.get("status").and_then(Value::as_str);
        match (web_url, api_url, status) {
            (Some(web_url), Some(api_url), Some(ACK_STATUS)) => {
                self.web_url = Some(web_url.to_string());
                self.api_url = Some(api_url.to_string());
                Ok(())
            }
            _ => {
                debug!("Response content:\n{}", pretty(&response));
                Err(LaunchError::RemoteProtocol(format!(
                    "Web launch response not recognised: {}\n See verbose log for full response (nf-launch -v)",
                    self.launch_url
                )))
            }
        }
    }

    /// Query the form once. `Ok(true)` once parameters were adopted.
    pub fn poll_once(&self, session: &mut LaunchSession) -> Result<bool> {
        let api_url = self.api_url.as_deref().ok_or_else(|| {
            LaunchError::RemoteProtocol("launch form has not been submitted yet".to_string())
        })?;
        let response = self.api.poll(api_url)?;
        let status = response.get("status").and_then(Value::as_str).unwrap_or("");

        match status {
            STATUS_WAITING => Ok(false),
            STATUS_ERROR => {
                let message = response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                Err(LaunchError::RemoteProtocol(format!(
                    "Got error from launch API ({message})"
                )))
            }
            STATUS_COMPLETE => {
                info!("Found completed parameters from the launch form");
                adopt_response(session, &response).inspect_err(|_| {
                    debug!("Response content:\n{}", pretty(&response));
                })?;
                Ok(true)
            }
            other => {
                debug!("Response content:\n{}", pretty(&response));
                Err(LaunchError::RemoteProtocol(format!(
                    "Web launch form returned unexpected status ({other}): {api_url}\n See verbose log for full response"
                )))
            }
        }
    }

    /// Poll until the form is complete.
    pub fn wait_for_completion(&self, session: &mut LaunchSession, policy: WaitPolicy) -> Result<()> {
        let attempts = wait::wait_until(policy, || self.poll_once(session))?;
        debug!(attempts, "launch form completed");
        Ok(())
    }
}

fn adopt_response(session: &mut LaunchSession, response: &Value) -> Result<()> {
    let flags = object_field(response, "nxf_flags")?;
    let params = object_field(response, "input_params")?;
    let schema = object_field(response, "schema")?;
    let schema = PipelineSchema::from_value(Value::Object(schema.into_iter().collect()))?;
    let cli_launch = match field(response, "cli_launch")? {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        other => {
            return Err(LaunchError::RemoteProtocol(format!(
                "unexpected cli_launch value from web API: {other}"
            )));
        }
    };
    let nextflow_cmd = field(response, "nextflow_cmd")?
        .as_str()
        .map(str::to_string)
        .unwrap_or_default();
    let pipeline = optional_text(field(response, "pipeline")?);
    let revision = optional_text(field(response, "revision")?);

    reconcile::adopt_non_empty(&mut session.nxf_flags, flags);
    reconcile::adopt_non_empty(&mut session.store.input_params, params);
    session.store.set_schema(schema);
    session.cli_launch = cli_launch;
    if !nextflow_cmd.is_empty() {
        session.nextflow_cmd = nextflow_cmd;
    }
    session.pipeline = pipeline;
    session.revision = revision;

    sanitise(&session.store.schema, &mut session.nxf_flags)?;
    sanitise(&session.store.schema, &mut session.store.input_params)?;
    Ok(())
}

/// Convert the form's text values to schema types and drop empty ones.
pub fn sanitise(schema: &PipelineSchema, values: &mut IndexMap<String, Value>) -> Result<()> {
    let mut leaves: IndexMap<&str, &ParamNode> = IndexMap::new();
    for (id, node) in &schema.properties {
        if node.is_group() {
            for (child_id, child) in &node.properties {
                leaves.insert(child_id, child);
            }
        } else {
            leaves.insert(id, node);
        }
    }
    let no_values = IndexMap::new();

    let mut cleaned = IndexMap::new();
    for (id, raw) in std::mem::take(values) {
        if question::stringify(&raw).trim().is_empty() {
            continue;
        }
        let filter = leaves
            .get(id.as_str())
            .and_then(|node| question::compile(&id, node, &no_values, &no_values).filter);
        let value = match filter {
            Some(filter) => filter.apply_value(&raw).map_err(|reason| {
                LaunchError::RemoteProtocol(format!(
                    "invalid value for '{id}' returned by the launch form: {reason}"
                ))
            })?,
            None => raw,
        };
        cleaned.insert(id, value);
    }
    *values = cleaned;
    Ok(())
}

/// Open `url` with the platform's default handler.
pub fn open_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

/// Open the form, logging the URL if no browser could be started.
pub fn show_form(url: &str) {
    info!("Opening URL: {url}");
    if let Err(err) = open_browser(url) {
        warn!("could not open a browser ({err}); open the URL above manually");
    }
}

fn field<'v>(response: &'v Value, key: &str) -> Result<&'v Value> {
    response.get(key).ok_or_else(|| {
        LaunchError::RemoteProtocol(format!("Missing return key from web API: '{key}'"))
    })
}

/// Mappings may arrive as objects or as JSON-encoded strings.
fn object_field(response: &Value, key: &str) -> Result<IndexMap<String, Value>> {
    let value = field(response, key)?;
    let object: JsonMap<String, Value> = match value {
        Value::Object(map) => map.clone(),
        Value::String(text) if text.trim().is_empty() => JsonMap::new(),
        Value::String(text) => serde_json::from_str(text).map_err(|err| {
            LaunchError::RemoteProtocol(format!("'{key}' from web API is not a JSON object: {err}"))
        })?,
        Value::Array(items) if items.is_empty() => JsonMap::new(),
        Value::Null => JsonMap::new(),
        other => {
            return Err(LaunchError::RemoteProtocol(format!(
                "'{key}' from web API is not a JSON object: {other}"
            )));
        }
    };
    Ok(object.into_iter().collect())
}

fn optional_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaStore;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeApi {
        responses: RefCell<VecDeque<Value>>,
        requests: RefCell<Vec<(String, Option<Value>)>>,
    }

    impl FakeApi {
        fn with(responses: Vec<Value>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                ..Self::default()
            }
        }

        fn next(&self) -> Result<Value> {
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| LaunchError::RemoteProtocol("no scripted response".into()))
        }
    }

    impl LaunchApi for FakeApi {
        fn submit(&self, url: &str, body: &Value) -> Result<Value> {
            self.requests
                .borrow_mut()
                .push((url.to_string(), Some(body.clone())));
            self.next()
        }

        fn poll(&self, url: &str) -> Result<Value> {
            self.requests.borrow_mut().push((url.to_string(), None));
            self.next()
        }
    }

    fn schema_value() -> Value {
        json!({
            "properties": {
                "group": {
                    "type": "object",
                    "properties": {
                        "a": {"type": "integer", "default": 1},
                        "skip": {"type": "boolean"}
                    }
                },
                "ratio": {"type": "number"}
            }
        })
    }

    fn session() -> LaunchSession {
        let schema = PipelineSchema::from_value(schema_value()).unwrap();
        let mut session = LaunchSession::new(Some("nf-core/demo".into()), None);
        session.store = SchemaStore::from_schema(schema);
        session
    }

    fn schema_with_flags() -> Value {
        let mut store = SchemaStore::from_schema(PipelineSchema::from_value(schema_value()).unwrap());
        store.merge_engine_flags();
        store.schema.to_value().unwrap()
    }

    fn complete(flags: Value, params: Value) -> Value {
        json!({
            "status": STATUS_COMPLETE,
            "nxf_flags": flags,
            "input_params": params,
            "schema": schema_with_flags(),
            "cli_launch": true,
            "nextflow_cmd": "nextflow run nf-core/demo -r 1.0",
            "pipeline": "nf-core/demo",
            "revision": "1.0"
        })
    }

    fn attached(api: &FakeApi) -> RemoteForm<'_, FakeApi> {
        RemoteForm::resume(api, "https://launch.example/launch", "abc")
    }

    #[test]
    fn submit_records_urls_on_acknowledgement() {
        let api = FakeApi::with(vec![json!({
            "status": "recieved",
            "web_url": "https://launch.example/launch?id=1",
            "api_url": "https://launch.example/launch?id=1&api=true"
        })]);
        let mut form = RemoteForm::new(&api, "https://launch.example/launch");
        form.submit(&session()).unwrap();
        assert_eq!(form.web_url(), Some("https://launch.example/launch?id=1"));
        assert_eq!(
            form.api_url(),
            Some("https://launch.example/launch?id=1&api=true")
        );

        let requests = api.requests.borrow();
        let body = requests[0].1.as_ref().unwrap();
        assert_eq!(body["status"], json!("waiting_for_user"));
        assert_eq!(body["post_content"], json!("json_schema_launcher"));
        assert!(body["schema"].as_str().unwrap().contains("\"ratio\""));
    }

    #[test]
    fn submit_rejects_unrecognised_acknowledgement() {
        let api = FakeApi::with(vec![json!({
            "status": "received",
            "web_url": "w",
            "api_url": "a"
        })]);
        let mut form = RemoteForm::new(&api, "https://launch.example/launch");
        let err = form.submit(&session()).unwrap_err();
        assert!(matches!(err, LaunchError::RemoteProtocol(_)));
        assert!(err.to_string().contains("https://launch.example/launch"));
    }

    #[test]
    fn waiting_does_not_finish() {
        let api = FakeApi::with(vec![json!({"status": "waiting_for_user"})]);
        let mut session = session();
        assert!(!attached(&api).poll_once(&mut session).unwrap());
        assert_eq!(
            api.requests.borrow()[0].0,
            "https://launch.example/launch?id=abc&api=true"
        );
    }

    #[test]
    fn error_status_surfaces_message() {
        let api = FakeApi::with(vec![json!({"status": "error", "message": "x"})]);
        let err = attached(&api).poll_once(&mut session()).unwrap_err();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn unexpected_status_names_status_and_endpoint() {
        let api = FakeApi::with(vec![json!({"status": "confused"})]);
        let err = attached(&api).poll_once(&mut session()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("confused"));
        assert!(message.contains("?id=abc&api=true"));
    }

    #[test]
    fn completion_adopts_non_empty_mappings_only() {
        let api = FakeApi::with(vec![complete(json!({}), json!({"a": 1}))]);
        let mut session = session();
        session
            .nxf_flags
            .insert("-profile".into(), json!("docker"));
        assert!(attached(&api).poll_once(&mut session).unwrap());
        assert_eq!(session.nxf_flags.get("-profile"), Some(&json!("docker")));
        assert_eq!(session.store.input_params.get("a"), Some(&json!(1)));
        assert_eq!(session.revision.as_deref(), Some("1.0"));
        assert_eq!(session.nextflow_cmd, "nextflow run nf-core/demo -r 1.0");
    }

    #[test]
    fn completion_sanitises_text_values() {
        let api = FakeApi::with(vec![complete(
            json!({"-resume": "true", "-name": " "}),
            json!("{\"a\": \"7\", \"skip\": \"False\", \"ratio\": \"\", \"other\": \"kept\"}"),
        )]);
        let mut session = session();
        attached(&api).poll_once(&mut session).unwrap();
        assert_eq!(session.nxf_flags.get("-resume"), Some(&json!(true)));
        assert!(!session.nxf_flags.contains_key("-name"));
        assert_eq!(session.store.input_params.get("a"), Some(&json!(7)));
        assert_eq!(session.store.input_params.get("skip"), Some(&json!(false)));
        assert!(!session.store.input_params.contains_key("ratio"));
        assert_eq!(session.store.input_params.get("other"), Some(&json!("kept")));
    }

    #[test]
    fn missing_key_is_a_protocol_error() {
        let mut response = complete(json!({}), json!({}));
        response.as_object_mut().unwrap().remove("schema");
        let api = FakeApi::with(vec![response]);
        let err = attached(&api).poll_once(&mut session()).unwrap_err();
        assert!(err.to_string().contains("'schema'"));
    }

    #[test]
    fn wait_for_completion_polls_until_done() {
        let api = FakeApi::with(vec![
            json!({"status": "waiting_for_user"}),
            json!({"status": "waiting_for_user"}),
            complete(json!({}), json!({"a": 3})),
        ]);
        let mut session = session();
        attached(&api)
            .wait_for_completion(&mut session, WaitPolicy::fixed(Duration::ZERO))
            .unwrap();
        assert_eq!(api.requests.borrow().len(), 3);
        assert_eq!(session.store.input_params.get("a"), Some(&json!(3)));
    }
}
