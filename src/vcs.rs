//! Version control adapters
//!
//! The replay engine never builds command lines itself. It describes what it
//! wants as a [`VcsAction`] and hands it to a [`VcsAdapter`], which turns the
//! action into a concrete [`VcsCommand`] and, in live mode, runs it.
//!
//! ## Adapters
//!
//! | Adapter | Dates passed as | Notes |
//! |---------|-----------------|-------|
//! | [`GitVcs`] | `GIT_AUTHOR_DATE` / `GIT_COMMITTER_DATE` env | commits with `-a` |
//! | [`FossilVcs`] | `--date-override` | supports `init` and `open` |
//! | [`RecordingVcs`] | inherited from the wrapped adapter | runs nothing |
//!
//! Commands run as blocking subprocesses in the repository directory with
//! stdout and stderr captured. A non-zero exit status is a fatal
//! [`BakError::CommandFailed`].

use crate::error::{BakError, Result};
use crate::text::format_command_line;
use crate::timestamp::CommitDates;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use tracing::{debug, trace};

/// Supported version control systems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    /// git, the default
    #[default]
    Git,
    /// fossil
    Fossil,
}

impl VcsKind {
    /// Executable name used when none is configured
    pub fn default_exe(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Fossil => "fossil",
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_exe())
    }
}

impl FromStr for VcsKind {
    type Err = BakError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(VcsKind::Git),
            "fossil" => Ok(VcsKind::Fossil),
            other => Err(BakError::config(format!("Unknown VCS '{}'", other))),
        }
    }
}

/// A logical version control operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VcsAction {
    /// Create the repository file with a backdated creation time
    Init {
        /// Repository file name
        repo_name: String,
        /// Creation date in VCS override format
        date: String,
    },
    /// Open a checkout of the repository in the working directory
    Open {
        /// Repository file name
        repo_name: String,
    },
    /// Start tracking a path
    Add {
        /// Path relative to the working directory
        path: String,
    },
    /// Commit every tracked change
    Commit {
        /// Aggregated commit message
        message: String,
        /// Synthesized author and commit dates
        dates: CommitDates,
    },
    /// A free-form sub-command from the annotation file
    Run {
        /// Arguments after the executable
        args: Vec<String>,
    },
}

impl VcsAction {
    /// Whether this is an [`VcsAction::Add`]
    pub fn is_add(&self) -> bool {
        matches!(self, VcsAction::Add { .. })
    }

    /// Whether this is a [`VcsAction::Commit`]
    pub fn is_commit(&self) -> bool {
        matches!(self, VcsAction::Commit { .. })
    }
}

/// A concrete subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VcsCommand {
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: PathBuf,
}

impl VcsCommand {
    fn new(program: &str, cwd: &Path, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            env: Vec::new(),
            cwd: cwd.to_path_buf(),
        }
    }

    /// Program and arguments rendered for the log
    pub fn command_line(&self) -> String {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(self.program.as_str());
        items.extend(self.args.iter().map(String::as_str));
        format_command_line(&items)
    }
}

/// Narrow boundary between the replay engine and a VCS
pub trait VcsAdapter {
    /// Which system this adapter drives
    fn kind(&self) -> VcsKind;

    /// Build the command for an action without running it
    fn command(&self, action: &VcsAction) -> Result<VcsCommand>;

    /// Run an action, returning its combined output
    fn execute(&mut self, action: &VcsAction) -> Result<String> {
        run_command(&self.command(action)?)
    }
}

impl<T: VcsAdapter + ?Sized> VcsAdapter for Box<T> {
    fn kind(&self) -> VcsKind {
        (**self).kind()
    }

    fn command(&self, action: &VcsAction) -> Result<VcsCommand> {
        (**self).command(action)
    }

    fn execute(&mut self, action: &VcsAction) -> Result<String> {
        (**self).execute(action)
    }
}

/// Build the adapter for a VCS kind
///
/// `repo_name` only applies to fossil.
pub fn adapter_for(
    kind: VcsKind,
    repo_dir: &Path,
    exe: Option<&str>,
    repo_name: Option<&str>,
) -> Box<dyn VcsAdapter> {
    let exe = exe.unwrap_or(kind.default_exe());
    match kind {
        VcsKind::Git => Box::new(GitVcs::new(repo_dir).with_exe(exe)),
        VcsKind::Fossil => {
            let mut fossil = FossilVcs::new(repo_dir).with_exe(exe);
            if let Some(name) = repo_name {
                fossil = fossil.with_repo_name(name);
            }
            Box::new(fossil)
        }
    }
}

/// Run a command to completion, capturing stdout and stderr
pub fn run_command(command: &VcsCommand) -> Result<String> {
    debug!("Running {} in {:?}", command.command_line(), command.cwd);

    let output = Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    trace!("Output: {}", text);

    if !output.status.success() {
        return Err(BakError::CommandFailed {
            command: command.command_line(),
            status: output.status.to_string(),
            output: text,
        });
    }
    Ok(text)
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// git adapter
#[derive(Debug, Clone)]
pub struct GitVcs {
    repo_dir: PathBuf,
    exe: String,
}

impl GitVcs {
    /// Create an adapter for an existing git working tree
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            exe: VcsKind::Git.default_exe().to_string(),
        }
    }

    /// Use a specific git executable
    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = exe.into();
        self
    }
}

impl VcsAdapter for GitVcs {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn command(&self, action: &VcsAction) -> Result<VcsCommand> {
        match action {
            VcsAction::Init { .. } | VcsAction::Open { .. } => Err(BakError::config(
                "git repositories must be created before replay",
            )),
            VcsAction::Add { path } => Ok(VcsCommand::new(&self.exe, &self.repo_dir, owned(&["add", path.as_str()]))),
            VcsAction::Commit { message, dates } => {
                let mut command = VcsCommand::new(&self.exe, &self.repo_dir, owned(&["commit", "-a", "-m", message.as_str()]));
                command.env = vec![
                    ("GIT_AUTHOR_DATE".to_string(), dates.author_string()),
                    ("GIT_COMMITTER_DATE".to_string(), dates.commit_string()),
                ];
                Ok(command)
            }
            VcsAction::Run { args } => Ok(VcsCommand::new(&self.exe, &self.repo_dir, args.clone())),
        }
    }
}

/// fossil adapter
#[derive(Debug, Clone)]
pub struct FossilVcs {
    repo_dir: PathBuf,
    repo_name: String,
    exe: String,
}

impl FossilVcs {
    /// Create an adapter; the repository file defaults to `<dir name>.fossil`
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let repo_dir = repo_dir.into();
        let repo_name = default_repo_name(&repo_dir);
        Self {
            repo_dir,
            repo_name,
            exe: VcsKind::Fossil.default_exe().to_string(),
        }
    }

    /// Use a specific repository file name
    pub fn with_repo_name(mut self, repo_name: impl Into<String>) -> Self {
        self.repo_name = repo_name.into();
        self
    }

    /// Use a specific fossil executable
    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = exe.into();
        self
    }

    /// Repository file name
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }
}

/// `<dir name>.fossil`
pub fn default_repo_name(repo_dir: &Path) -> String {
    let stem = repo_dir
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    format!("{}.fossil", stem)
}

impl VcsAdapter for FossilVcs {
    fn kind(&self) -> VcsKind {
        VcsKind::Fossil
    }

    fn command(&self, action: &VcsAction) -> Result<VcsCommand> {
        let args: Vec<String> = match action {
            VcsAction::Init { repo_name, date } => vec![
                "init".to_string(),
                repo_name.clone(),
                "--date-override".to_string(),
                date.clone(),
            ],
            VcsAction::Open { repo_name } => vec!["open".to_string(), repo_name.clone()],
            VcsAction::Add { path } => vec!["add".to_string(), path.clone()],
            VcsAction::Commit { message, dates } => vec![
                "commit".to_string(),
                "-m".to_string(),
                message.clone(),
                "--date-override".to_string(),
                dates.commit_string(),
            ],
            VcsAction::Run { args } => args.clone(),
        };
        Ok(VcsCommand::new(&self.exe, &self.repo_dir, args))
    }
}

/// Adapter that records actions and never runs anything
///
/// Command lines come from the wrapped adapter, so logs match a real run.
///
/// # Examples
///
/// ```rust
/// use bak_to_git::vcs::{GitVcs, RecordingVcs, VcsAction, VcsAdapter};
///
/// let mut vcs = RecordingVcs::new(GitVcs::new("/tmp/repo"));
/// vcs.execute(&VcsAction::Add { path: "a.txt".to_string() })?;
/// assert_eq!(vcs.adds(), 1);
/// assert_eq!(vcs.commands()[0].command_line(), "git add a.txt");
/// # Ok::<(), bak_to_git::BakError>(())
/// ```
pub struct RecordingVcs {
    inner: Box<dyn VcsAdapter>,
    actions: Vec<VcsAction>,
    commands: Vec<VcsCommand>,
    fail_at: Option<usize>,
}

impl RecordingVcs {
    /// Wrap an adapter
    pub fn new(inner: impl VcsAdapter + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            actions: Vec::new(),
            commands: Vec::new(),
            fail_at: None,
        }
    }

    /// Fail the `n`th execution (0-based) with [`BakError::CommandFailed`]
    pub fn with_failure_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Actions executed so far
    pub fn actions(&self) -> &[VcsAction] {
        &self.actions
    }

    /// Commands executed so far
    pub fn commands(&self) -> &[VcsCommand] {
        &self.commands
    }

    /// Number of add actions
    pub fn adds(&self) -> usize {
        self.actions.iter().filter(|a| a.is_add()).count()
    }

    /// Number of commit actions
    pub fn commits(&self) -> usize {
        self.actions.iter().filter(|a| a.is_commit()).count()
    }
}

impl VcsAdapter for RecordingVcs {
    fn kind(&self) -> VcsKind {
        self.inner.kind()
    }

    fn command(&self, action: &VcsAction) -> Result<VcsCommand> {
        self.inner.command(action)
    }

    fn execute(&mut self, action: &VcsAction) -> Result<String> {
        let command = self.inner.command(action)?;
        if self.fail_at == Some(self.actions.len()) {
            return Err(BakError::CommandFailed {
                command: command.command_line(),
                status: "exit status: 1".to_string(),
                output: String::new(),
            });
        }
        self.actions.push(action.clone());
        self.commands.push(command);
        Ok(String::new())
    }
}

impl fmt::Debug for RecordingVcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingVcs")
            .field("kind", &self.inner.kind())
            .field("actions", &self.actions.len())
            .finish()
    }
}
