use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::error::LaunchError;
use crate::launch::{LaunchMode, LaunchOptions, Launcher};
use crate::prompt::TerminalPrompter;
use crate::remote::HttpLaunchApi;
use crate::settings;

#[derive(Parser)]
#[command(name = "nf-launch")]
#[command(about = "Interactively collect pipeline parameters and build a nextflow run command", version)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Print debug logs, including full launch API responses.")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Launch a pipeline, collecting parameters in the terminal or a browser form")]
    Launch(LaunchArgs),
    #[command(about = "Show the effective launcher settings and where they are read from")]
    Settings,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Web,
    Cli,
}

impl From<ModeArg> for LaunchMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Web => LaunchMode::Web,
            ModeArg::Cli => LaunchMode::Cli,
        }
    }
}

#[derive(Parser)]
#[command(
    long_about = "Walks the pipeline's nextflow_schema.json, asks for each parameter and prints the resulting `nextflow run` command.",
    after_help = "Main options:\n  <PIPELINE> or --id <WEB_ID>\n\nOptional options:\n  --revision <REV>\n  --command-only\n  --params-in <FILE>\n  --params-out <FILE> (default: ./nf-params.json)\n  --save-all\n  --show-hidden\n  --url <URL>\n  --mode <web|cli>\n  --no-browser"
)]
struct LaunchArgs {
    #[arg(help = "Local pipeline directory or pipeline name")]
    pipeline: Option<String>,
    #[arg(short, long, help = "Release tag, branch or commit to run")]
    revision: Option<String>,
    #[arg(long, help = "Resume a launch form that was already created in the browser")]
    id: Option<String>,
    #[arg(short, long, help = "Pass parameters as command-line flags instead of a params file")]
    command_only: bool,
    #[arg(short = 'p', long, help = "JSON file with parameter values to start from")]
    params_in: Option<PathBuf>,
    #[arg(short = 'o', long, help = "Where to write the parameter file")]
    params_out: Option<PathBuf>,
    #[arg(short = 'a', long, help = "Keep parameters that equal their default")]
    save_all: bool,
    #[arg(short = 'x', long, help = "Also ask for hidden parameters")]
    show_hidden: bool,
    #[arg(short, long, help = "Launch form service URL")]
    url: Option<String>,
    #[arg(long, value_enum, help = "Skip the launch method question")]
    mode: Option<ModeArg>,
    #[arg(long, help = "Print the form URL instead of opening a browser")]
    no_browser: bool,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        init_logging(self.verbose);
        match self.command {
            Command::Launch(args) => args.run(),
            Command::Settings => show_settings(),
        }
    }
}

impl LaunchArgs {
    fn run(self) -> anyhow::Result<()> {
        let settings = settings::load_settings().context("failed to load launcher settings")?;
        let params_out = match self.params_out {
            Some(path) => path,
            None => std::env::current_dir()?.join(crate::command::DEFAULT_PARAMS_FILE),
        };
        let options = LaunchOptions {
            pipeline: self.pipeline,
            revision: self.revision,
            web_id: self.id,
            command_only: self.command_only,
            params_in: self.params_in,
            params_out,
            save_all: self.save_all,
            show_hidden: self.show_hidden,
            launch_url: self.url.unwrap_or_else(|| settings.web_launch_url.clone()),
            mode: self.mode.map(LaunchMode::from),
            open_browser: !self.no_browser,
            poll: settings.wait_policy(),
            required_retry_limit: settings.required_retry_limit,
        };

        let mut prompter = TerminalPrompter::stdio();
        let api = HttpLaunchApi::new();
        let mut launcher = Launcher::new(options, &mut prompter, &api);
        match launcher.launch() {
            Ok(Some(status)) if !status.success() => {
                std::process::exit(status.code().unwrap_or(1));
            }
            Ok(_) => Ok(()),
            Err(LaunchError::Cancelled) => {
                eprintln!("Launch cancelled.");
                std::process::exit(1);
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn show_settings() -> anyhow::Result<()> {
    let path = settings::settings_path()?;
    let settings = settings::load_settings_from(&path)?;
    println!("# {}", path.display());
    print!("{}", serde_yaml_bw::to_string(&settings)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
