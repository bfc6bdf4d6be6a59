//! Command Rewriter - normalizes proposed commands before execution
//!
//! The terminal is non-interactive and its output is fed back to a model with
//! a limited input budget, so a fixed chain of rules makes common commands
//! non-interactive and quiet:
//!
//! ```text
//! apt-get install nginx
//!   │ 1. assume yes      → apt-get install -y nginx
//!   │ 2. quiet           → apt-get install -qq -y nginx
//!   │ 3. wget -nv        (no-op: no download tool)
//!   │ 4. tar without -v  (no-op: no archive tool)
//!   ▼
//! apt-get install -qq -y nginx
//! ```
//!
//! Each rule is guarded by a check for its own flag, so rewriting an already
//! rewritten command is a no-op.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref APT_ASSUME_YES: Regex =
        Regex::new(r"(apt(?:-get)?\s+(?:install|upgrade)\s+|add-apt-repository\s+)(\S+)")
            .expect("valid assume-yes pattern");
    static ref APT_QUIET: Regex = Regex::new(r"(apt(?:-get)?\s+(?:install|upgrade)\s+)(\S+)")
        .expect("valid quiet pattern");
    static ref WGET: Regex = Regex::new(r"(wget\s+)(\S+)").expect("valid wget pattern");
    /// A `tar` command token and its arguments, up to the next `;`, `&` or `|`
    static ref TAR_INVOCATION: Regex =
        Regex::new(r"(^|[\s;&|(])(tar\s[^;&|]*)").expect("valid tar invocation pattern");
    static ref TAR_VERBOSE: Regex =
        Regex::new(r"^(tar\s+)(-?[A-Za-z]*v[A-Za-z]*)(\s+.+)").expect("valid tar pattern");
    static ref TAR_LONG_VERBOSE: Regex =
        Regex::new(r"\s+--verbose\b").expect("valid tar --verbose pattern");
}

/// One rewrite rule in the chain
pub trait RewriteRule: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Rewrite `command`, or borrow it unchanged
    fn apply<'a>(&self, command: &'a str) -> Cow<'a, str>;
}

/// Adds `-y` to package-manager install/upgrade invocations
pub struct AssumeYes;

impl RewriteRule for AssumeYes {
    fn name(&self) -> &'static str {
        "assume-yes"
    }

    fn apply<'a>(&self, command: &'a str) -> Cow<'a, str> {
        if command.contains("-y") {
            return Cow::Borrowed(command);
        }
        APT_ASSUME_YES.replace_all(command, "${1}-y $2")
    }
}

/// Adds `-qq` to package-manager install/upgrade invocations
pub struct Quiet;

impl RewriteRule for Quiet {
    fn name(&self) -> &'static str {
        "quiet"
    }

    fn apply<'a>(&self, command: &'a str) -> Cow<'a, str> {
        if command.contains("-q") {
            return Cow::Borrowed(command);
        }
        APT_QUIET.replace_all(command, "${1}-qq $2")
    }
}

/// Adds `-nv` to download-tool invocations
pub struct NonVerboseDownload;

impl RewriteRule for NonVerboseDownload {
    fn name(&self) -> &'static str {
        "non-verbose-download"
    }

    fn apply<'a>(&self, command: &'a str) -> Cow<'a, str> {
        if command.contains("-nv") || command.contains("apt") {
            return Cow::Borrowed(command);
        }
        WGET.replace_all(command, "${1}-nv $2")
    }
}

/// Strips verbose flags from archive-extraction invocations
pub struct QuietArchive;

impl RewriteRule for QuietArchive {
    fn name(&self) -> &'static str {
        "quiet-archive"
    }

    fn apply<'a>(&self, command: &'a str) -> Cow<'a, str> {
        TAR_INVOCATION.replace_all(command, |caps: &Captures| {
            format!("{}{}", &caps[1], strip_tar_verbose(&caps[2]))
        })
    }
}

/// Remove `v` from the first flag group and any `--verbose` of one invocation
fn strip_tar_verbose(invocation: &str) -> String {
    let stripped = TAR_VERBOSE.replace(invocation, |caps: &Captures| {
        let flags = caps[2].replace('v', "");
        if flags.is_empty() || flags == "-" {
            // the group was only `-v`; drop it along with its separator
            format!("{}{}", &caps[1], caps[3].trim_start())
        } else {
            format!("{}{}{}", &caps[1], flags, &caps[3])
        }
    });
    TAR_LONG_VERBOSE.replace_all(&stripped, "").into_owned()
}

/// Ordered chain of rewrite rules
pub struct CommandRewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl CommandRewriter {
    /// The fixed chain: assume-yes, quiet, non-verbose download, quiet archive
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(AssumeYes),
                Box::new(Quiet),
                Box::new(NonVerboseDownload),
                Box::new(QuietArchive),
            ],
        }
    }

    /// Apply every rule in order, each seeing the previous rule's result
    pub fn rewrite(&self, command: &str) -> String {
        let mut current = command.to_string();
        for rule in &self.rules {
            let rewritten = rule.apply(&current).into_owned();
            if rewritten != current {
                tracing::debug!(rule = rule.name(), from = %current, to = %rewritten, "Command rewritten");
                current = rewritten;
            }
        }
        current
    }
}

impl Default for CommandRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(command: &str) -> String {
        CommandRewriter::new().rewrite(command)
    }

    #[test]
    fn test_apt_install() {
        assert_eq!(rewrite("apt-get install nginx"), "apt-get install -qq -y nginx");
        assert_eq!(rewrite("sudo apt upgrade"), "sudo apt upgrade");
        assert_eq!(rewrite("sudo apt upgrade curl"), "sudo apt upgrade -qq -y curl");
    }

    #[test]
    fn test_add_apt_repository_gets_assume_yes_only() {
        assert_eq!(
            rewrite("sudo add-apt-repository ppa:deadsnakes/ppa"),
            "sudo add-apt-repository -y ppa:deadsnakes/ppa"
        );
    }

    #[test]
    fn test_existing_flags_are_respected() {
        assert_eq!(rewrite("apt-get install -y nginx"), "apt-get install -qq -y nginx");
        assert_eq!(rewrite("apt-get -q install nginx"), "apt-get -q install nginx");
    }

    #[test]
    fn test_wget() {
        assert_eq!(
            rewrite("wget https://example.com/file.tar.gz"),
            "wget -nv https://example.com/file.tar.gz"
        );
        assert_eq!(
            rewrite("apt-get install wget && wget https://example.com/x"),
            "apt-get install -qq -y wget && wget https://example.com/x"
        );
    }

    #[test]
    fn test_tar_verbose_stripped() {
        assert_eq!(rewrite("tar xvf archive.tar"), "tar xf archive.tar");
        assert_eq!(rewrite("tar -xzvf node.tar.gz -C /opt"), "tar -xzf node.tar.gz -C /opt");
        assert_eq!(rewrite("tar -v -xf a.tar"), "tar -xf a.tar");
        assert_eq!(rewrite("tar --verbose -xf a.tar"), "tar -xf a.tar");
        assert_eq!(rewrite("tar czf backup.tgz dir"), "tar czf backup.tgz dir");
    }

    #[test]
    fn test_verbose_outside_tar_is_kept() {
        assert_eq!(rewrite("python3 avatar.py --verbose"), "python3 avatar.py --verbose");
        assert_eq!(rewrite("cd guitar --verbose"), "cd guitar --verbose");
        assert_eq!(rewrite("avatar xvf a.tar"), "avatar xvf a.tar");
        assert_eq!(
            rewrite("tar xf a.tar && curl --verbose http://x"),
            "tar xf a.tar && curl --verbose http://x"
        );
        assert_eq!(
            rewrite("curl --verbose http://x | tar xvzf - --verbose -C /opt"),
            "curl --verbose http://x | tar xzf - -C /opt"
        );
    }

    #[test]
    fn test_unrelated_commands_untouched() {
        for command in ["ls -la", "cd /tmp", "echo \"hello\"", "python3 -V"] {
            assert_eq!(rewrite(command), command);
        }
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let inputs = [
            "apt-get install nginx",
            "sudo apt install python3 python3-pip",
            "wget http://example.com/a.zip",
            "tar xvf a.tar",
            "cd /tmp && wget https://example.com/b && tar -xvzf b",
            "sudo add-apt-repository universe",
        ];
        for input in inputs {
            let once = rewrite(input);
            assert_eq!(rewrite(&once), once, "not idempotent for {:?}", input);
        }
    }
}
