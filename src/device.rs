//! Prompt recognition for interactive device shells.
//!
//! A [`PromptMatcher`] classifies the trailing, newline-less part of the
//! shell buffer: a command prompt, a pager prompt that needs a keypress, a
//! password request, or plain output. Output cleanup helpers used by both
//! transports live here too.

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// What the trailing line of the shell buffer means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// The device is waiting for a command.
    Prompt,
    /// Paged output; the device waits for the continuation key.
    More,
    /// The device asks for a password.
    Password,
    Output,
}

pub struct PromptMatcher {
    prompts: RegexSet,
    privileged: Option<Regex>,
    more: Option<RegexSet>,
    password: Regex,
    /// Last prompt text seen.
    current_prompt: Option<String>,
}

impl PromptMatcher {
    /// Compiles a matcher.
    ///
    /// # Arguments
    ///
    /// * `prompts` - patterns for any command prompt
    /// * `privileged` - pattern a prompt matches once elevation succeeded
    /// * `more` - pager prompts answered with a space
    pub fn new<I, S>(prompts: I, privileged: Option<&str>, more: I) -> Result<Self, ConnectError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let prompts = RegexSet::new(prompts)
            .map_err(|e| ConnectError::InternalServerError(format!("prompt regex: {e}")))?;
        let more: Vec<S> = more.into_iter().collect();
        let more = if more.is_empty() {
            None
        } else {
            Some(
                RegexSet::new(more)
                    .map_err(|e| ConnectError::InternalServerError(format!("more regex: {e}")))?,
            )
        };
        let privileged = privileged
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConnectError::InternalServerError(format!("privileged regex: {e}")))?;
        Ok(Self {
            prompts,
            privileged,
            more,
            password: PASSWORD_PROMPT.clone(),
            current_prompt: None,
        })
    }

    /// Classifies the trailing line and remembers it when it is a prompt.
    pub fn read(&mut self, line: &str) -> LineKind {
        let line = IGNORE_START_LINE.replace(line, "");
        let line = line.trim_end_matches(['\r', '\n']);
        trace!("Read line: '{:?}'", line);
        if self.more.as_ref().is_some_and(|m| m.is_match(line)) {
            return LineKind::More;
        }
        if self.password.is_match(line) {
            return LineKind::Password;
        }
        if self.prompts.is_match(line) {
            self.current_prompt = Some(line.trim().to_string());
            return LineKind::Prompt;
        }
        LineKind::Output
    }

    /// Checks a line against the prompt patterns without updating state.
    pub fn is_prompt(&self, line: &str) -> bool {
        let line = IGNORE_START_LINE.replace(line, "");
        self.prompts.is_match(line.trim_end_matches(['\r', '\n']))
    }

    /// True if the last prompt seen is a privileged one.
    ///
    /// Drivers without a privileged pattern are always considered elevated.
    pub fn is_privileged(&self) -> bool {
        match (&self.privileged, &self.current_prompt) {
            (None, _) => true,
            (Some(re), Some(prompt)) => re.is_match(prompt),
            (Some(_), None) => false,
        }
    }

    pub fn current_prompt(&self) -> Option<&str> {
        self.current_prompt.as_deref()
    }
}

/// Matches carriage returns and backspaces at the start of a line.
///
/// Terminals emit these when redrawing pager prompts, and they interfere
/// with prompt matching and the stored output.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

/// Password request, shared by login and elevation.
pub static PASSWORD_PROMPT: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?i)(pass(word|wd)|secret)\s*:\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid PASSWORD_PROMPT regex: {err}"),
    });

/// Username request of a telnet login.
pub static LOGIN_PROMPT: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?i)(user\s*name|login|user)\s*:\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid LOGIN_PROMPT regex: {err}"),
    });

/// Lines some devices print when login is refused.
pub static LOGIN_FAILED: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)(login incorrect|authentication failed|access denied|bad password|login invalid)")
    {
        Ok(re) => re,
        Err(err) => panic!("invalid LOGIN_FAILED regex: {err}"),
    }
});

/// Cleans raw shell text collected for one command.
///
/// Drops the echoed command at the start and the trailing prompt line, and
/// strips pager redraw noise from every line.
pub fn normalize_output(raw: &str, command: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for line in raw.split_inclusive('\n') {
        cleaned.push_str(&IGNORE_START_LINE.replace(line, ""));
    }
    let cleaned = cleaned.replace("\r\n", "\n");

    let mut content = cleaned.as_str();
    let command = command.trim();
    if !command.is_empty() {
        let head = content.trim_start_matches(['\n', '\r']);
        if let Some(rest) = head.strip_prefix(command) {
            content = rest.trim_start_matches([' ', '\r']);
            content = content.strip_prefix('\n').unwrap_or(content);
        }
    }

    // Remove the trailing prompt
    match content.rfind('\n') {
        Some(pos) => content[..pos].trim_end_matches('\r').to_string(),
        None => String::new(),
    }
}

/// The part of the buffer after its last newline.
pub fn tail_line(buffer: &str) -> &str {
    match buffer.rfind('\n') {
        Some(pos) => &buffer[pos + 1..],
        None => buffer,
    }
}
