use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};

/// Source of interactive answers for values missing from flags, env and file.
pub trait Prompter {
    fn ask(&mut self, question: &str) -> Result<String>;

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        self.ask(question)
    }

    fn warn(&mut self, _message: &str) {}
}

/// Reads answers line by line from stdin.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}").context("failed to write prompt")?;
        stdout.flush().context("failed to flush prompt")?;
        drop(stdout);

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read answer from stdin")?;
        if read == 0 {
            bail!("stdin closed before answering: {}", question.trim());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn warn(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Fails every prompt; used with `--no-input`.
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn ask(&mut self, question: &str) -> Result<String> {
        bail!(
            "missing value and prompting is disabled: {}",
            question.trim().trim_end_matches(':')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{NonInteractive, Prompter};

    #[test]
    fn non_interactive_names_the_missing_value() {
        let error = NonInteractive
            .ask_secret("Enter NYTimes password: ")
            .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "missing value and prompting is disabled: Enter NYTimes password"
        );
    }
}
