//! Shell discovery with per-platform fallback.
//!
//! The resolver turns an optional override plus the platform defaults into an
//! ordered list of [`ShellCandidate`]s. It never fails: if nothing can be
//! found on `PATH`, the unfiltered list is returned so that the eventual
//! spawn reports a real error instead of silently doing nothing.

use std::path::Path;

use tracing::debug;

/// Operating-system family, as far as shell selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Built-in candidates, most preferred first.
    pub fn default_shells(&self) -> &'static [&'static str] {
        match self {
            Self::Unix => &["bash", "sh"],
            Self::Windows => &["powershell.exe", "cmd.exe"],
        }
    }
}

/// How a shell expects its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// `cmd.exe`
    Cmd,
    /// `powershell.exe` / `pwsh`
    PowerShell,
    /// Everything else: `sh`, `bash`, `zsh`, ...
    Posix,
}

impl ShellKind {
    /// Classify a shell by its file stem, ignoring case and directory.
    pub fn classify(program: &str) -> Self {
        let name = program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(program)
            .to_ascii_lowercase();
        let stem = name.strip_suffix(".exe").unwrap_or(&name);

        match stem {
            "cmd" => Self::Cmd,
            "powershell" | "pwsh" => Self::PowerShell,
            _ => Self::Posix,
        }
    }
}

/// A shell that may be used to run commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCandidate {
    /// Executable name or path.
    pub program: String,
    /// Argument convention.
    pub kind: ShellKind,
}

impl ShellCandidate {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let kind = ShellKind::classify(&program);
        Self { program, kind }
    }

    /// Arguments that run `command` once and exit.
    pub fn one_shot_args(&self, command: &str) -> Vec<String> {
        let mut args: Vec<String> = match self.kind {
            ShellKind::Cmd => vec!["/d".into(), "/s".into(), "/c".into()],
            ShellKind::PowerShell => {
                vec!["-NoLogo".into(), "-NoProfile".into(), "-Command".into()]
            }
            ShellKind::Posix => vec!["-c".into()],
        };
        args.push(command.to_string());
        args
    }

    /// Arguments that start the shell interactively.
    pub fn interactive_args(&self) -> Vec<String> {
        match self.kind {
            ShellKind::Cmd => Vec::new(),
            ShellKind::PowerShell => vec!["-NoLogo".into()],
            ShellKind::Posix => vec!["-i".into()],
        }
    }

    /// Whether the program was given with a directory component.
    pub fn is_path_qualified(&self) -> bool {
        self.program.contains('/') || self.program.contains('\\')
    }

    /// Short display name (file name without directory).
    pub fn name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

/// Build the candidate list for the given override and platform.
///
/// `probe` answers whether a bare executable name resolves on this system.
/// Path-qualified overrides are trusted without probing.
pub fn resolve_with<F>(shell_override: Option<&str>, platform: Platform, probe: F) -> Vec<ShellCandidate>
where
    F: Fn(&str) -> bool,
{
    let mut all: Vec<ShellCandidate> = Vec::new();

    let names = shell_override
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .into_iter()
        .chain(platform.default_shells().iter().copied());

    for name in names {
        if !all.iter().any(|c| c.program == name) {
            all.push(ShellCandidate::new(name));
        }
    }

    let usable: Vec<ShellCandidate> = all
        .iter()
        .filter(|c| c.is_path_qualified() || probe(&c.program))
        .cloned()
        .collect();

    if usable.is_empty() {
        debug!(
            candidates = all.len(),
            "no shell candidate found on PATH, keeping unfiltered list"
        );
        all
    } else {
        usable
    }
}

/// Build the candidate list for the running platform, probing `PATH`.
pub fn resolve(shell_override: Option<&str>) -> Vec<ShellCandidate> {
    resolve_with(shell_override, Platform::current(), |name| {
        which::which(name).is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(ShellKind::classify("cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::classify("C:\\Windows\\System32\\CMD.EXE"), ShellKind::Cmd);
        assert_eq!(ShellKind::classify("powershell.exe"), ShellKind::PowerShell);
        assert_eq!(ShellKind::classify("/usr/bin/pwsh"), ShellKind::PowerShell);
        assert_eq!(ShellKind::classify("/bin/bash"), ShellKind::Posix);
        assert_eq!(ShellKind::classify("zsh"), ShellKind::Posix);
    }

    #[test]
    fn test_one_shot_args() {
        let sh = ShellCandidate::new("sh");
        assert_eq!(sh.one_shot_args("echo hi"), vec!["-c", "echo hi"]);

        let cmd = ShellCandidate::new("cmd.exe");
        assert_eq!(cmd.one_shot_args("dir"), vec!["/d", "/s", "/c", "dir"]);

        let ps = ShellCandidate::new("powershell.exe");
        assert_eq!(
            ps.one_shot_args("Get-Date"),
            vec!["-NoLogo", "-NoProfile", "-Command", "Get-Date"]
        );
    }

    #[test]
    fn test_interactive_args() {
        assert_eq!(ShellCandidate::new("bash").interactive_args(), vec!["-i"]);
        assert!(ShellCandidate::new("cmd.exe").interactive_args().is_empty());
        assert_eq!(
            ShellCandidate::new("pwsh").interactive_args(),
            vec!["-NoLogo"]
        );
    }

    #[test]
    fn test_override_first_then_defaults() {
        let shells = resolve_with(Some("zsh"), Platform::Unix, |_| true);
        let names: Vec<_> = shells.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["zsh", "bash", "sh"]);
    }

    #[test]
    fn test_windows_defaults() {
        let shells = resolve_with(None, Platform::Windows, |_| true);
        let names: Vec<_> = shells.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["powershell.exe", "cmd.exe"]);
        assert_eq!(shells[0].kind, ShellKind::PowerShell);
        assert_eq!(shells[1].kind, ShellKind::Cmd);
    }

    #[test]
    fn test_duplicate_override_removed() {
        let shells = resolve_with(Some("sh"), Platform::Unix, |_| true);
        let names: Vec<_> = shells.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["sh", "bash"]);
    }

    #[test]
    fn test_probe_filters_missing() {
        let shells = resolve_with(Some("fish"), Platform::Unix, |name| name == "sh");
        let names: Vec<_> = shells.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["sh"]);
    }

    #[test]
    fn test_path_override_trusted_without_probe() {
        let shells = resolve_with(Some("/opt/shells/myshell"), Platform::Unix, |_| false);
        assert_eq!(shells.len(), 1);
        assert_eq!(shells[0].program, "/opt/shells/myshell");
        assert_eq!(shells[0].name(), "myshell");
    }

    #[test]
    fn test_nothing_found_falls_back_to_unfiltered() {
        let shells = resolve_with(None, Platform::Unix, |_| false);
        let names: Vec<_> = shells.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["bash", "sh"]);
    }

    #[test]
    fn test_blank_override_ignored() {
        let shells = resolve_with(Some("  "), Platform::Unix, |_| true);
        assert_eq!(shells.len(), 2);
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_finds_sh() {
        let shells = resolve(None);
        assert!(shells.iter().any(|c| c.program == "sh"));
    }
}
