//! Command framing over a shared shell stream.
//!
//! A single remote shell carries every command and its output on one
//! stdin/stdout pair, with no side channel for exit status. Each command is
//! therefore wrapped as
//!
//! ```text
//! { <command>
//! } && printf '%s\n' '<ok-token>' || printf '%s\n' '<fail-token>'
//! ```
//!
//! and the reader consumes lines until one ends with either token. Everything
//! before it is the command's output.
//!
//! Both tokens embed the session UUID. Ordinary command output can only end a
//! response early if it reproduces that UUID, which callers never feed
//! through the shell.

use uuid::Uuid;

/// How a framed command finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Success,
    Failure,
}

/// The two completion tokens of one shell session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentinels {
    ok: String,
    fail: String,
}

impl Sentinels {
    pub fn for_session(session: Uuid) -> Self {
        let id = session.simple();
        Self {
            ok: format!("ria-remote:{id}:end-ok"),
            fail: format!("ria-remote:{id}:end-fail"),
        }
    }

    pub fn ok(&self) -> &str {
        &self.ok
    }

    pub fn fail(&self) -> &str {
        &self.fail
    }

    /// Wrap `command` so that its completion is announced on stdout.
    pub fn frame(&self, command: &str) -> String {
        format!(
            "{{ {command}\n}} && printf '%s\\n' {ok} || printf '%s\\n' {fail}\n",
            ok = sh_quote(&self.ok),
            fail = sh_quote(&self.fail),
        )
    }

    /// Check whether `line` (without its newline) ends a response.
    ///
    /// Returns the completion and whatever output preceded the token on the
    /// same line, which happens when the command's output lacks a trailing
    /// newline.
    pub fn match_line<'a>(&self, line: &'a str) -> Option<(Completion, &'a str)> {
        if let Some(prefix) = line.strip_suffix(self.ok.as_str()) {
            return Some((Completion::Success, prefix));
        }
        if let Some(prefix) = line.strip_suffix(self.fail.as_str()) {
            return Some((Completion::Failure, prefix));
        }
        None
    }
}

/// Accumulates output lines until a sentinel arrives.
#[derive(Debug)]
pub struct ResponseCollector<'s> {
    sentinels: &'s Sentinels,
    lines: Vec<String>,
}

impl<'s> ResponseCollector<'s> {
    pub fn new(sentinels: &'s Sentinels) -> Self {
        Self {
            sentinels,
            lines: Vec::new(),
        }
    }

    /// Feed one line. Returns the completion once the response is over.
    pub fn feed(&mut self, line: &str) -> Option<Completion> {
        match self.sentinels.match_line(line) {
            Some((completion, prefix)) => {
                if !prefix.is_empty() {
                    self.lines.push(prefix.to_string());
                }
                Some(completion)
            }
            None => {
                self.lines.push(line.to_string());
                None
            }
        }
    }

    /// Output lines joined with `\n`.
    pub fn into_output(self) -> String {
        self.lines.join("\n")
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Sentinels {
        Sentinels::for_session(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0))
    }

    fn run(sentinels: &Sentinels, stream: &str) -> (Option<Completion>, String) {
        let mut collector = ResponseCollector::new(sentinels);
        let mut completion = None;
        for line in stream.lines() {
            completion = collector.feed(line);
            if completion.is_some() {
                break;
            }
        }
        (completion, collector.into_output())
    }

    #[test]
    fn frame_wraps_command() {
        let s = sentinels();
        let framed = s.frame("uname -s");
        assert!(framed.starts_with("{ uname -s\n} && printf '%s\\n' 'ria-remote:"));
        assert!(framed.ends_with(":end-fail'\n"));
    }

    #[test]
    fn collects_output_until_ok() {
        let s = sentinels();
        let stream = format!("Linux\n{}\nleftover\n", s.ok());
        assert_eq!(run(&s, &stream), (Some(Completion::Success), "Linux".into()));
    }

    #[test]
    fn failure_token() {
        let s = sentinels();
        let stream = format!("{}\n", s.fail());
        assert_eq!(run(&s, &stream), (Some(Completion::Failure), String::new()));
    }

    #[test]
    fn output_without_trailing_newline() {
        let s = sentinels();
        let stream = format!("line one\n1|l{}\n", s.ok());
        assert_eq!(
            run(&s, &stream),
            (Some(Completion::Success), "line one\n1|l".into())
        );
    }

    #[test]
    fn empty_lines_are_output() {
        let s = sentinels();
        let stream = format!("\n\n{}\n", s.ok());
        assert_eq!(run(&s, &stream), (Some(Completion::Success), "\n".into()));
    }

    #[test]
    fn adversarial_output_does_not_complete() {
        let s = sentinels();
        let other = Sentinels::for_session(Uuid::from_u128(1));
        let truncated = &s.ok()[..s.ok().len() - 1];
        let adversarial = [
            "ria-remote:end-ok".to_string(),
            "end-ok".to_string(),
            "ria-remote::end-ok".to_string(),
            truncated.to_string(),
            other.ok().to_string(),
            other.fail().to_string(),
            format!("{} trailing text", s.ok()),
            format!("{}x", s.fail()),
            "ria-remote:12345678-9abc-def0-1234-56789abcdef0:end-ok".to_string(),
        ];
        for line in &adversarial {
            let (completion, output) = run(&s, line);
            assert_eq!(completion, None, "false completion on {line:?}");
            assert_eq!(&output, line);
        }
    }

    #[test]
    fn sentinels_differ_per_session() {
        assert_ne!(
            Sentinels::for_session(Uuid::new_v4()),
            Sentinels::for_session(Uuid::new_v4())
        );
    }

    #[test]
    fn quoting() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), "'it'\\''s'");
    }
}
