//! One launch session: gather parameters, build the command, optionally run it.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::command::{self, ParamsMode};
use crate::engine::{self, PromptEngine};
use crate::error::{LaunchError, Result};
use crate::prompt::Prompter;
use crate::reconcile;
use crate::remote::{self, LaunchApi, RemoteForm};
use crate::schema::SchemaStore;
use crate::wait::WaitPolicy;

pub const WEB_CHOICE: &str = "Web based";
pub const CLI_CHOICE: &str = "Command line";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    Web,
    Cli,
}

#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub pipeline: Option<String>,
    pub revision: Option<String>,
    pub web_id: Option<String>,
    pub command_only: bool,
    pub params_in: Option<PathBuf>,
    pub params_out: PathBuf,
    pub save_all: bool,
    pub show_hidden: bool,
    pub launch_url: String,
    /// `None` asks the user.
    pub mode: Option<LaunchMode>,
    pub open_browser: bool,
    pub poll: WaitPolicy,
    pub required_retry_limit: usize,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            pipeline: None,
            revision: None,
            web_id: None,
            command_only: false,
            params_in: None,
            params_out: PathBuf::from(command::DEFAULT_PARAMS_FILE),
            save_all: false,
            show_hidden: false,
            launch_url: remote::DEFAULT_LAUNCH_URL.to_string(),
            mode: None,
            open_browser: true,
            poll: WaitPolicy::fixed(Duration::from_secs(2)),
            required_retry_limit: engine::DEFAULT_REQUIRED_RETRY_LIMIT,
        }
    }
}

impl LaunchOptions {
    pub fn params_mode(&self) -> ParamsMode {
        if self.command_only {
            ParamsMode::Inline
        } else {
            ParamsMode::File(self.params_out.clone())
        }
    }
}

/// State owned by a single launch and handed to each stage in turn.
#[derive(Clone, Debug)]
pub struct LaunchSession {
    pub store: SchemaStore,
    pub nxf_flags: IndexMap<String, Value>,
    pub cli_launch: bool,
    pub nextflow_cmd: String,
    pub pipeline: Option<String>,
    pub revision: Option<String>,
}

impl LaunchSession {
    pub fn new(pipeline: Option<String>, revision: Option<String>) -> Self {
        Self {
            nextflow_cmd: command::workflow_prefix(pipeline.as_deref(), revision.as_deref()),
            store: SchemaStore::default(),
            nxf_flags: IndexMap::new(),
            cli_launch: true,
            pipeline,
            revision,
        }
    }
}

/// The synthesized invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub command: String,
    pub params_file: Option<PathBuf>,
    /// False when the remote form asked for the command to be printed only.
    pub cli_launch: bool,
}

pub struct Launcher<'a, P: Prompter + ?Sized, A: LaunchApi + ?Sized> {
    options: LaunchOptions,
    prompter: &'a mut P,
    api: &'a A,
}

impl<'a, P: Prompter + ?Sized, A: LaunchApi + ?Sized> Launcher<'a, P, A> {
    pub fn new(options: LaunchOptions, prompter: &'a mut P, api: &'a A) -> Self {
        Self {
            options,
            prompter,
            api,
        }
    }

    /// Collect parameters and build the command without running it.
    pub fn prepare(&mut self) -> Result<LaunchPlan> {
        if self.options.pipeline.is_none() && self.options.web_id.is_none() {
            return Err(LaunchError::Configuration(
                "either a pipeline name or a web launch ID is required".to_string(),
            ));
        }
        let mode = self.options.params_mode();
        if let ParamsMode::File(path) = &mode {
            self.check_output_collision(path)?;
        }
        info!(
            "This tool ignores any pipeline parameter defaults overwritten by Nextflow config files or profiles"
        );

        let mut session =
            LaunchSession::new(self.options.pipeline.clone(), self.options.revision.clone());
        match self.options.web_id.clone() {
            Some(web_id) => self.resume_web_session(&mut session, &web_id)?,
            None => {
                session.store = self.load_pipeline_schema()?;
                reconcile::seed_from_defaults(&mut session.store);
                if let Some(path) = &self.options.params_in {
                    reconcile::apply_params_file(&mut session.store, path)?;
                }
                session.store.merge_engine_flags();
                match self.choose_mode()? {
                    LaunchMode::Web => self.run_web_form(&mut session)?,
                    LaunchMode::Cli => self.run_wizard(&mut session)?,
                }
            }
        }

        session.store.validate_params()?;
        reconcile::strip_defaults(
            &mut session.store,
            &mut session.nxf_flags,
            self.options.save_all,
        );

        let flags = command::ordered_flags(&session.nxf_flags);
        let params = command::ordered_params(&session.store);
        let command = command::build_command(&session.nextflow_cmd, &flags, &params, &mode)?;
        let params_file = match mode {
            ParamsMode::File(path) if !params.is_empty() => Some(path),
            _ => None,
        };
        Ok(LaunchPlan {
            command,
            params_file,
            cli_launch: session.cli_launch,
        })
    }

    /// Prepare, print, and on confirmation run the command through the shell.
    pub fn launch(&mut self) -> Result<Option<ExitStatus>> {
        let plan = self.prepare()?;
        println!("\nNextflow command:\n  {}\n", plan.command);
        if !plan.cli_launch {
            return Ok(None);
        }
        if !self.prompter.confirm("Do you want to run this command now?")? {
            return Ok(None);
        }
        info!("Launching workflow!");
        let status = Command::new("sh").arg("-c").arg(&plan.command).status()?;
        Ok(Some(status))
    }

    fn check_output_collision(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        warn!("Parameter output file already exists! {}", path.display());
        // The file is only replaced once every answer has been collected.
        if self.prompter.confirm("Do you want to overwrite this file?")? {
            info!("{} will be overwritten", path.display());
            Ok(())
        } else {
            Err(LaunchError::OutputCollision(path.to_path_buf()))
        }
    }

    fn load_pipeline_schema(&self) -> Result<SchemaStore> {
        let pipeline = self.options.pipeline.as_deref().unwrap_or_default();
        let dir = Path::new(pipeline);
        if !dir.is_dir() {
            return Err(LaunchError::Configuration(format!(
                "could not find pipeline: {pipeline} (only local pipeline directories are supported)"
            )));
        }
        SchemaStore::load(dir)
    }

    fn choose_mode(&mut self) -> Result<LaunchMode> {
        if let Some(mode) = self.options.mode {
            return Ok(mode);
        }
        info!(
            "Would you like to enter pipeline parameters using a web-based interface or a command-line wizard?"
        );
        let choices = [WEB_CHOICE.to_string(), CLI_CHOICE.to_string()];
        let choice = self.prompter.select("Choose launch method", &choices)?;
        Ok(if choice == WEB_CHOICE {
            LaunchMode::Web
        } else {
            LaunchMode::Cli
        })
    }

    fn run_wizard(&mut self, session: &mut LaunchSession) -> Result<()> {
        let mut engine = PromptEngine::new(&mut *self.prompter)
            .show_hidden(self.options.show_hidden)
            .required_retry_limit(self.options.required_retry_limit);
        let collected = engine.prompt_schema(&mut session.store)?;
        // A skipped group leaves its answers uncollected; nothing gets built.
        if let Some(err) = engine.into_reported_errors().into_iter().next() {
            return Err(err);
        }
        session.nxf_flags.extend(collected.flags);
        Ok(())
    }

    fn run_web_form(&mut self, session: &mut LaunchSession) -> Result<()> {
        let mut form = RemoteForm::new(self.api, self.options.launch_url.clone());
        form.submit(session)?;
        if let Some(url) = form.web_url() {
            if self.options.open_browser {
                remote::show_form(url);
            } else {
                info!("Open this URL to fill in the form: {url}");
            }
        }
        info!("Waiting for form to be completed in the browser. Remember to click Finished when you're done.");
        form.wait_for_completion(session, self.options.poll)
    }

    fn resume_web_session(&mut self, session: &mut LaunchSession, web_id: &str) -> Result<()> {
        let form = RemoteForm::resume(self.api, self.options.launch_url.clone(), web_id);
        if !form.poll_once(session)? {
            info!("Waiting for form to be completed in the browser. Remember to click Finished when you're done.");
            if let Some(url) = form.web_url() {
                info!("URL: {url}");
            }
            form.wait_for_completion(session, self.options.poll)?;
        }
        session.store.flatten();
        session.store.load_defaults();
        reconcile::seed_from_defaults(&mut session.store);
        if let Some(path) = &self.options.params_in {
            // Form answers outrank the file; it only fills gaps.
            for (id, value) in session.store.read_params_file(path)? {
                session.store.input_params.entry(id).or_insert(value);
            }
        }
        Ok(())
    }
}
