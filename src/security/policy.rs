//! Command vetting before execution on the host.
//!
//! This is advisory defense-in-depth, not a sandbox. Commands are split on
//! whitespace and a few operators; shell grammar (quoting, variables, globs,
//! aliases, encoded commands) is not parsed, so a determined user can evade
//! every rule here. Its job is to stop accidental or obvious abuse.

use std::collections::HashSet;
use std::path::PathBuf;

/// Commands that read or navigate the filesystem. Under `strict_cwd` they may
/// not be pointed at absolute paths.
const READ_NAVIGATE_COMMANDS: &[&str] = &[
    "cd",
    "chdir",
    "pushd",
    "ls",
    "dir",
    "tree",
    "cat",
    "type",
    "more",
    "less",
    "head",
    "tail",
    "stat",
    "find",
    "get-content",
    "gc",
    "set-location",
    "sl",
    "get-childitem",
    "gci",
];

/// Operators that chain or substitute commands.
const CHAINING_PATTERNS: &[&str] = &[";", "&&", "||", "`", "$(", "\n"];

/// Policy configuration, fixed for the lifetime of a host run.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Directory commands run in.
    pub cwd: PathBuf,
    /// Keep commands inside `cwd` (no `..`, no absolute read/navigate paths).
    pub strict_cwd: bool,
    /// Lowercase command names allowed to run; empty means unrestricted.
    pub allow_list: HashSet<String>,
    /// Flag chaining/substitution syntax with a warning.
    pub warn_on_dangerous_syntax: bool,
    /// Maximum command length in bytes.
    pub max_command_length: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            strict_cwd: false,
            allow_list: HashSet::new(),
            warn_on_dangerous_syntax: true,
            max_command_length: 4096,
        }
    }
}

impl PolicyConfig {
    /// Build an allow-list from user-supplied names.
    pub fn with_allow_list<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allow_list = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Enable or disable `strict_cwd`.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_cwd = strict;
        self
    }
}

/// Outcome of evaluating a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Run it.
    Accept,
    /// Do not run it.
    Reject(PolicyViolation),
    /// Run it, but tell the user why it looks risky.
    Warn(String),
}

/// Reason a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Command is empty.
    EmptyCommand,
    /// Command exceeds maximum length.
    CommandTooLong { length: usize, max: usize },
    /// Command contains invalid character.
    InvalidCharacter(char),
    /// A token walks out of the working directory.
    PathTraversal { token: String },
    /// A read/navigate command was given an absolute path.
    AbsolutePath { command: String, path: String },
    /// Leading command is not allow-listed.
    NotAllowed { command: String },
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "command cannot be empty"),
            Self::CommandTooLong { length, max } => {
                write!(f, "command too long: {} chars (max: {})", length, max)
            }
            Self::InvalidCharacter(c) => {
                write!(f, "command contains invalid character: {:?}", c)
            }
            Self::PathTraversal { token } => {
                write!(f, "path traversal outside working directory: {}", token)
            }
            Self::AbsolutePath { command, path } => {
                write!(f, "absolute path not allowed for {}: {}", command, path)
            }
            Self::NotAllowed { command } => {
                write!(f, "command '{}' is not in the allow-list", command)
            }
        }
    }
}

impl std::error::Error for PolicyViolation {}

/// Command policy evaluator.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    config: PolicyConfig,
}

impl CommandPolicy {
    /// Create a new policy with the given config.
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Policy configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate a command. Rules are checked in a fixed order and the first
    /// rejection wins.
    pub fn evaluate(&self, command: &str) -> Verdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Verdict::Reject(PolicyViolation::EmptyCommand);
        }

        if command.len() > self.config.max_command_length {
            return Verdict::Reject(PolicyViolation::CommandTooLong {
                length: command.len(),
                max: self.config.max_command_length,
            });
        }

        if command.contains('\0') {
            return Verdict::Reject(PolicyViolation::InvalidCharacter('\0'));
        }

        let segments = split_segments(trimmed);

        if self.config.strict_cwd {
            for token in segments.iter().flatten() {
                if has_parent_component(token) {
                    return Verdict::Reject(PolicyViolation::PathTraversal {
                        token: token.to_string(),
                    });
                }
            }

            for segment in &segments {
                let Some((head, args)) = segment.split_first() else {
                    continue;
                };
                let base = command_base(head);
                if !READ_NAVIGATE_COMMANDS.contains(&base.as_str()) {
                    continue;
                }
                if let Some(path) = args.iter().find(|a| is_absolute_like(a)) {
                    return Verdict::Reject(PolicyViolation::AbsolutePath {
                        command: base,
                        path: path.to_string(),
                    });
                }
            }
        }

        if !self.config.allow_list.is_empty() {
            let base = trimmed
                .split_whitespace()
                .next()
                .map(command_base)
                .unwrap_or_default();
            if !self.config.allow_list.contains(&base) {
                return Verdict::Reject(PolicyViolation::NotAllowed { command: base });
            }
        }

        if self.config.warn_on_dangerous_syntax {
            if let Some(pattern) = CHAINING_PATTERNS.iter().find(|p| trimmed.contains(*p)) {
                let shown = if *pattern == "\n" { "newline" } else { pattern };
                return Verdict::Warn(format!(
                    "command contains chaining/substitution syntax ({}); it runs unrestricted",
                    shown
                ));
            }
        }

        Verdict::Accept
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

/// Split a command line into simple-command segments of whitespace tokens.
fn split_segments(command: &str) -> Vec<Vec<&str>> {
    command
        .split(['\n', ';', '|', '&'])
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect()
}

/// Lowercased command name without directory or `.exe`.
fn command_base(token: &str) -> String {
    let name = token
        .trim_matches(|c| c == '"' || c == '\'')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(token)
        .to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

fn has_parent_component(token: &str) -> bool {
    token
        .trim_matches(|c| c == '"' || c == '\'')
        .split(['/', '\\'])
        .any(|part| part == "..")
}

fn is_absolute_like(token: &str) -> bool {
    let token = token.trim_matches(|c| c == '"' || c == '\'');
    if token.starts_with('/') || token.starts_with('\\') || token.starts_with('~') {
        return true;
    }
    let bytes = token.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Sanitize a command string for logging.
///
/// This removes control characters and caps the length.
pub fn sanitize_for_display(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> CommandPolicy {
        CommandPolicy::new(PolicyConfig::default().strict(true))
    }

    #[test]
    fn test_accepts_plain_command() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.evaluate("ls -la"), Verdict::Accept);
        assert_eq!(policy.evaluate("echo hello world"), Verdict::Accept);
        assert_eq!(policy.evaluate("cat /etc/passwd"), Verdict::Accept);
    }

    #[test]
    fn test_rejects_empty() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.evaluate(""),
            Verdict::Reject(PolicyViolation::EmptyCommand)
        );
        assert_eq!(
            policy.evaluate("   \t "),
            Verdict::Reject(PolicyViolation::EmptyCommand)
        );
    }

    #[test]
    fn test_rejects_too_long() {
        let policy = CommandPolicy::new(PolicyConfig {
            max_command_length: 10,
            ..Default::default()
        });
        assert!(matches!(
            policy.evaluate("this is a very long command"),
            Verdict::Reject(PolicyViolation::CommandTooLong { .. })
        ));
    }

    #[test]
    fn test_rejects_null_byte() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.evaluate("ls\0 -la"),
            Verdict::Reject(PolicyViolation::InvalidCharacter('\0'))
        );
    }

    #[test]
    fn test_strict_rejects_traversal() {
        let policy = strict();
        assert!(matches!(
            policy.evaluate("cd ../../etc"),
            Verdict::Reject(PolicyViolation::PathTraversal { .. })
        ));
        assert!(matches!(
            policy.evaluate("cd .."),
            Verdict::Reject(PolicyViolation::PathTraversal { .. })
        ));
        assert!(matches!(
            policy.evaluate("type ..\\secret.txt"),
            Verdict::Reject(PolicyViolation::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_strict_rejects_absolute_read() {
        let policy = strict();
        match policy.evaluate("cat /etc/passwd") {
            Verdict::Reject(PolicyViolation::AbsolutePath { command, path }) => {
                assert_eq!(command, "cat");
                assert_eq!(path, "/etc/passwd");
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert!(matches!(policy.evaluate("dir C:\\Windows"), Verdict::Reject(_)));
        assert!(matches!(policy.evaluate("ls ~"), Verdict::Reject(_)));
    }

    #[test]
    fn test_strict_accepts_relative() {
        let policy = strict();
        assert_eq!(policy.evaluate("ls"), Verdict::Accept);
        assert_eq!(policy.evaluate("cat src/main.rs"), Verdict::Accept);
        assert_eq!(policy.evaluate("cd sub.dir"), Verdict::Accept);
        // Absolute paths for non-read commands are outside this rule.
        assert_eq!(policy.evaluate("echo /etc"), Verdict::Accept);
    }

    #[test]
    fn test_strict_checks_every_segment() {
        let policy = CommandPolicy::new(PolicyConfig {
            strict_cwd: true,
            warn_on_dangerous_syntax: false,
            ..Default::default()
        });
        assert!(matches!(policy.evaluate("echo hi; cat /etc/shadow"), Verdict::Reject(_)));
        assert!(matches!(policy.evaluate("ls | tail /var/log/syslog"), Verdict::Reject(_)));
    }

    #[test]
    fn test_non_strict_allows_traversal() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.evaluate("cd ../../etc"), Verdict::Accept);
    }

    #[test]
    fn test_allow_list_rejects_other_commands() {
        let policy = CommandPolicy::new(PolicyConfig::default().with_allow_list(["ls", "pwd"]));
        match policy.evaluate("rm -rf /") {
            Verdict::Reject(violation) => {
                assert_eq!(
                    violation,
                    PolicyViolation::NotAllowed {
                        command: "rm".into()
                    }
                );
                assert!(violation.to_string().contains("'rm'"));
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert_eq!(policy.evaluate("ls -la"), Verdict::Accept);
        assert_eq!(policy.evaluate("PWD"), Verdict::Accept);
        assert_eq!(policy.evaluate("/bin/ls"), Verdict::Accept);
    }

    #[test]
    fn test_allow_list_is_case_insensitive() {
        let policy = CommandPolicy::new(PolicyConfig::default().with_allow_list(["Git"]));
        assert_eq!(policy.evaluate("git status"), Verdict::Accept);
        assert_eq!(policy.evaluate("GIT.EXE log"), Verdict::Accept);
    }

    #[test]
    fn test_warns_on_chaining() {
        let policy = CommandPolicy::default();
        for cmd in [
            "echo $(whoami)",
            "echo `id`",
            "cmd1 && cmd2",
            "cmd1 || cmd2",
            "cmd1; cmd2",
            "echo a\necho b",
        ] {
            assert!(
                matches!(policy.evaluate(cmd), Verdict::Warn(_)),
                "expected warning for {:?}",
                cmd
            );
        }
        assert_eq!(policy.evaluate("ls | wc -l"), Verdict::Accept);
    }

    #[test]
    fn test_warning_can_be_disabled() {
        let policy = CommandPolicy::new(PolicyConfig {
            warn_on_dangerous_syntax: false,
            ..Default::default()
        });
        assert_eq!(policy.evaluate("cmd1 && cmd2"), Verdict::Accept);
    }

    #[test]
    fn test_rejection_wins_over_warning() {
        let policy = CommandPolicy::new(PolicyConfig::default().with_allow_list(["ls"]));
        assert!(matches!(policy.evaluate("rm x; ls"), Verdict::Reject(_)));
    }

    #[test]
    fn test_sanitize_for_display() {
        assert_eq!(sanitize_for_display("hello"), "hello");
        assert_eq!(sanitize_for_display("hello\nworld"), "helloworld");
        assert_eq!(sanitize_for_display("hello\x00world"), "helloworld");
        assert_eq!(sanitize_for_display(&"a".repeat(500)).len(), 200);
    }
}
