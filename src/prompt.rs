use std::io::{self, BufRead, IsTerminal, Stdout, Write};

use crate::error::{LaunchError, Result};

/// Terminal seam used by the prompt engine and the launcher.
///
/// Every method that waits for the user returns [`LaunchError::Cancelled`]
/// when input is closed, which ends the whole session.
pub trait Prompter {
    /// Free-text entry. An empty reply resolves to `default` when given.
    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String>;

    /// Closed choice. The first entry is the pre-selected one.
    fn select(&mut self, message: &str, choices: &[String]) -> Result<String>;

    fn confirm(&mut self, message: &str) -> Result<bool>;

    /// Identifier, description and help text shown above a question.
    fn header(&mut self, title: &str, description: Option<&str>, help_text: Option<&str>);

    /// Validation or required-field feedback.
    fn error(&mut self, message: &str);

    /// Whether a human is on the other end. Unbounded re-prompting is only
    /// allowed when this is true.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Line-based prompts over any reader/writer pair.
pub struct TerminalPrompter<R, W> {
    reader: R,
    writer: W,
    interactive: bool,
}

impl TerminalPrompter<io::StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin = io::stdin();
        let interactive = stdin.is_terminal();
        Self {
            reader: stdin.lock(),
            writer: io::stdout(),
            interactive,
        }
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(reader: R, writer: W, interactive: bool) -> Self {
        Self {
            reader,
            writer,
            interactive,
        }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        write!(self.writer, "{prompt}")?;
        self.writer.flush()?;
        let mut buffer = String::new();
        let bytes = self.reader.read_line(&mut buffer)?;
        if bytes == 0 {
            writeln!(self.writer)?;
            return Err(LaunchError::Cancelled);
        }
        Ok(buffer.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        let prompt = match default {
            Some(default) if !default.is_empty() => format!("? {message} [{default}]: "),
            _ => format!("? {message}: "),
        };
        let reply = self.read_line(&prompt)?;
        if reply.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(reply)
    }

    fn select(&mut self, message: &str, choices: &[String]) -> Result<String> {
        if choices.is_empty() {
            return self.input(message, None);
        }
        writeln!(self.writer, "? {message}")?;
        for (idx, choice) in choices.iter().enumerate() {
            writeln!(self.writer, "  {}) {choice}", idx + 1)?;
        }
        loop {
            let reply = self.read_line("  Choice [1]: ")?;
            let trimmed = reply.trim();
            if trimmed.is_empty() {
                return Ok(choices[0].clone());
            }
            if let Ok(idx) = trimmed.parse::<usize>()
                && (1..=choices.len()).contains(&idx)
            {
                return Ok(choices[idx - 1].clone());
            }
            if let Some(choice) = choices.iter().find(|choice| choice.as_str() == trimmed) {
                return Ok(choice.clone());
            }
            writeln!(
                self.writer,
                "  Invalid choice. Options: {}",
                choices.join(", ")
            )?;
        }
    }

    fn confirm(&mut self, message: &str) -> Result<bool> {
        let reply = self.read_line(&format!("{message} [y/N]: "))?;
        Ok(matches!(
            reply.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }

    fn header(&mut self, title: &str, description: Option<&str>, help_text: Option<&str>) {
        if description.is_none() && help_text.is_none() {
            return;
        }
        let _ = writeln!(self.writer, "\n{title}");
        if let Some(description) = description {
            let _ = writeln!(self.writer, "  {description}");
        }
        if let Some(help) = help_text {
            for line in help.trim().lines() {
                let _ = writeln!(self.writer, "  {line}");
            }
        }
    }

    fn error(&mut self, message: &str) {
        let _ = writeln!(self.writer, "  {message}");
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}
