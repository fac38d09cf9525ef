//! Structured command builder.
//!
//! Commands destined for a gateway are assembled as typed program/argument
//! lists and only rendered to a shell string at the transport boundary
//! (e.g. when the SSH gateway hands them to the remote shell). Local
//! execution never goes through a shell at all.

use std::borrow::Cow;
use std::fmt;

/// A command to run on a gateway host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Append one positional argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several positional arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `--name value` as two arguments.
    pub fn option(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    /// Set an environment variable for the command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    /// Render as a single POSIX shell command line with every token quoted.
    pub fn to_shell_string(&self) -> String {
        let mut out = String::new();
        if let Some(dir) = &self.working_dir {
            out.push_str("cd ");
            out.push_str(&shell_quote(dir));
            out.push_str(" && ");
        }
        for (key, value) in &self.env {
            out.push_str(key);
            out.push('=');
            out.push_str(&shell_quote(value));
            out.push(' ');
        }
        out.push_str(&shell_quote(&self.program));
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_quote(arg));
        }
        out
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Quote `s` for a POSIX shell. Tokens made only of safe characters are
/// returned unchanged.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '+' | '@')
        });
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_tokens_are_not_quoted() {
        assert_eq!(shell_quote("docker"), "docker");
        assert_eq!(shell_quote("/srv/cosmos/outputs"), "/srv/cosmos/outputs");
        assert_eq!(shell_quote("label=cosmos.gpu"), "label=cosmos.gpu");
    }

    #[test]
    fn unsafe_tokens_are_single_quoted() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("{{.Names}}"), "'{{.Names}}'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn renders_full_command_line() {
        let cmd = RemoteCommand::new("docker")
            .arg("ps")
            .option("--filter", "label=cosmos.gpu")
            .option("--format", "{{.Names}}")
            .env("DOCKER_HOST", "unix:///var/run/docker.sock")
            .current_dir("/srv/cosmos");
        assert_eq!(
            cmd.to_shell_string(),
            "cd /srv/cosmos && DOCKER_HOST=unix:///var/run/docker.sock docker ps \
             --filter label=cosmos.gpu --format '{{.Names}}'"
        );
    }

    #[test]
    fn accessors_expose_structure() {
        let cmd = RemoteCommand::new("ls").args(["-la", "/tmp"]);
        assert_eq!(cmd.program(), "ls");
        assert_eq!(cmd.get_args(), ["-la", "/tmp"]);
        assert!(cmd.get_env().is_empty());
        assert_eq!(cmd.working_dir(), None);
        assert_eq!(cmd.to_string(), "ls -la /tmp");
    }
}
