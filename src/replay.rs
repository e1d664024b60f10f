//! Replaying annotated changes as commits
//!
//! The replay engine is the last step of the pipeline. It reads the annotated
//! rows, forms one [`CommitGroup`] per timestamp tag, and turns each group
//! into a commit in the target repository, oldest first.
//!
//! ## State Machine
//!
//! ```text
//! INIT → LOAD_ANNOTATIONS → (REPO_SETUP) → per tag {
//!     PRE_COMMANDS → COPY_AND_STAGE → COMMIT → POST_COMMANDS
//! } → DONE
//! ```
//!
//! Any error moves the engine to `ABORTED`; the failing tag and command are
//! written to the action log and the error is returned wrapped in
//! [`BakError::ReplayAborted`]. Groups already committed stay committed.
//!
//! ## What-if Mode
//!
//! Unless `do_commit` is set, the engine computes and logs every action
//! exactly as a live run would but copies nothing, touches no mtimes and never
//! invokes the VCS. Paths the live run would have created are tracked in
//! memory so that "add" decisions, and therefore the log, match a live run.
//!
//! ## Add-once
//!
//! A path is added only when it did not exist in the working tree before its
//! first copy. Running the same annotation file twice never adds anything the
//! second time.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bak_to_git::action_log::ActionLog;
//! use bak_to_git::replay::ReplayBuilder;
//! use bak_to_git::vcs::VcsKind;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = ReplayBuilder::new("./repo")
//!     .vcs(VcsKind::Fossil)
//!     .init_date("2021-07-14T16:20:01")
//!     .build()?;
//!
//! let mut log = ActionLog::in_memory();
//! let report = engine.run_file(Path::new("step-1-files-changed.csv"), &mut log)?;
//! println!("{} commits", report.groups_committed);
//! # Ok(())
//! # }
//! ```

use crate::action_log::ActionLog;
use crate::annotations::read_annotations;
use crate::error::{BakError, Result};
use crate::filter::FilterList;
use crate::grouping::{commit_groups, CommitGroup};
use crate::text::split_quoted;
use crate::timestamp::{parse_iso_datetime, VCS_DATE_FORMAT};
use crate::types::{AnnotatedRow, AuxCommand, ChangeRecord};
use crate::vcs::{adapter_for, default_repo_name, VcsAction, VcsAdapter, VcsKind};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replay settings, logged as JSON when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Working tree of the target repository
    pub repo_dir: PathBuf,
    /// Which VCS to drive
    pub vcs: VcsKind,
    /// VCS executable
    pub vcs_exe: String,
    /// Fossil repository file name, relative to `repo_dir`
    pub repo_name: Option<String>,
    /// Repository creation date; triggers repository setup (fossil only)
    pub init_date: Option<String>,
    /// Live mode when true, what-if mode otherwise
    pub do_commit: bool,
    /// Filter list file, if any
    pub filter_file: Option<PathBuf>,
}

/// Where the engine is in its run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayState {
    /// Not started
    #[default]
    Init,
    /// Reading and grouping rows
    LoadAnnotations,
    /// Creating and opening the repository
    RepoSetup,
    /// Running `pre:` and `rename:` commands of a group
    PreCommands,
    /// Copying files and adding new paths
    CopyAndStage,
    /// Committing a group
    Commit,
    /// Running `post:` commands of a group
    PostCommands,
    /// Finished successfully
    Done,
    /// Stopped by an error
    Aborted,
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplayState::Init => "INIT",
            ReplayState::LoadAnnotations => "LOAD_ANNOTATIONS",
            ReplayState::RepoSetup => "REPO_SETUP",
            ReplayState::PreCommands => "PRE_COMMANDS",
            ReplayState::CopyAndStage => "COPY_AND_STAGE",
            ReplayState::Commit => "COMMIT",
            ReplayState::PostCommands => "POST_COMMANDS",
            ReplayState::Done => "DONE",
            ReplayState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Counts from a replay run
///
/// In what-if mode the counts describe what a live run would do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Commit groups processed
    pub groups_committed: usize,
    /// Paths added to version control
    pub adds_issued: usize,
    /// Files copied into the working tree
    pub files_copied: usize,
    /// `pre:` and `rename:` commands run
    pub pre_commands_run: usize,
    /// `post:` commands run
    pub post_commands_run: usize,
    /// Filter replacements made
    pub filter_hits: usize,
    /// Final state
    pub state: ReplayState,
    /// Tag of the group that failed, if any
    pub failed_tag: Option<String>,
}

/// Builder for [`ReplayEngine`]
#[derive(Debug, Clone)]
pub struct ReplayBuilder {
    repo_dir: PathBuf,
    vcs: VcsKind,
    vcs_exe: Option<String>,
    repo_name: Option<String>,
    init_date: Option<String>,
    do_commit: bool,
    filter_file: Option<PathBuf>,
}

impl ReplayBuilder {
    /// Start a builder for the given working tree, git and what-if by default
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            vcs: VcsKind::Git,
            vcs_exe: None,
            repo_name: None,
            init_date: None,
            do_commit: false,
            filter_file: None,
        }
    }

    /// Set the version control system
    pub fn vcs(mut self, kind: VcsKind) -> Self {
        self.vcs = kind;
        self
    }

    /// Set the VCS executable (default `git` or `fossil` from `PATH`)
    pub fn vcs_exe(mut self, exe: impl Into<String>) -> Self {
        self.vcs_exe = Some(exe.into());
        self
    }

    /// Set the fossil repository file name (default `<dir name>.fossil`)
    pub fn repo_name(mut self, name: impl Into<String>) -> Self {
        self.repo_name = Some(name.into());
        self
    }

    /// Create the repository with this ISO date before replaying
    ///
    /// Only valid for fossil. The date should be at or before the first
    /// backup, e.g. `2021-07-14T16:20:01`.
    pub fn init_date(mut self, date: impl Into<String>) -> Self {
        self.init_date = Some(date.into());
        self
    }

    /// Run live (true) or in what-if mode (false)
    pub fn do_commit(mut self, live: bool) -> Self {
        self.do_commit = live;
        self
    }

    /// Apply the filter list in this file while copying
    pub fn filter_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.filter_file = Some(path.into());
        self
    }

    fn into_config(self) -> Result<ReplayConfig> {
        let init_date = match self.init_date {
            Some(date) => {
                if self.vcs != VcsKind::Fossil {
                    return Err(BakError::config(
                        "--init-date creates a fossil repository; git repositories must already exist",
                    ));
                }
                Some(parse_iso_datetime(&date)?.format(VCS_DATE_FORMAT).to_string())
            }
            None => None,
        };

        let repo_name = match self.vcs {
            VcsKind::Fossil => Some(self.repo_name.unwrap_or_else(|| default_repo_name(&self.repo_dir))),
            VcsKind::Git => None,
        };

        Ok(ReplayConfig {
            vcs_exe: self.vcs_exe.unwrap_or_else(|| self.vcs.default_exe().to_string()),
            repo_dir: self.repo_dir,
            vcs: self.vcs,
            repo_name,
            init_date,
            do_commit: self.do_commit,
            filter_file: self.filter_file,
        })
    }

    /// Build an engine driving the real VCS executable
    pub fn build(self) -> Result<ReplayEngine<Box<dyn VcsAdapter>>> {
        let config = self.into_config()?;
        let adapter = adapter_for(
            config.vcs,
            &config.repo_dir,
            Some(&config.vcs_exe),
            config.repo_name.as_deref(),
        );
        ReplayEngine::new(config, adapter)
    }

    /// Build an engine around a caller-supplied adapter
    pub fn build_with<A: VcsAdapter>(self, adapter: A) -> Result<ReplayEngine<A>> {
        let config = self.into_config()?;
        if adapter.kind() != config.vcs {
            return Err(BakError::config(format!(
                "adapter drives {} but the replay is configured for {}",
                adapter.kind(),
                config.vcs
            )));
        }
        ReplayEngine::new(config, adapter)
    }
}

/// Replays commit groups into a working tree
pub struct ReplayEngine<A: VcsAdapter> {
    config: ReplayConfig,
    filter: FilterList,
    vcs: A,
    state: ReplayState,
    report: ReplayReport,
    /// Paths this run has created (or would have, in what-if mode)
    created: HashSet<PathBuf>,
}

impl<A: VcsAdapter> ReplayEngine<A> {
    fn new(config: ReplayConfig, vcs: A) -> Result<Self> {
        let filter = match &config.filter_file {
            Some(path) => FilterList::load(path)?,
            None => FilterList::empty(),
        };
        Ok(Self {
            config,
            filter,
            vcs,
            state: ReplayState::Init,
            report: ReplayReport::default(),
            created: HashSet::new(),
        })
    }

    /// Settings in effect
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Counts from the current or last run, including an aborted one
    pub fn report(&self) -> &ReplayReport {
        &self.report
    }

    /// The VCS adapter
    pub fn vcs(&self) -> &A {
        &self.vcs
    }

    /// Load an annotation file and replay it
    pub fn run_file(&mut self, csv_path: &Path, log: &mut ActionLog) -> Result<ReplayReport> {
        log.write(format!("Read {}", csv_path.display()))?;
        let rows = read_annotations(csv_path)?;
        self.run(&rows, log)
    }

    /// Replay annotation rows
    ///
    /// # Errors
    ///
    /// Returns the first error encountered. Errors inside a group are wrapped
    /// in [`BakError::ReplayAborted`] with the group's tag.
    pub fn run(&mut self, rows: &[AnnotatedRow], log: &mut ActionLog) -> Result<ReplayReport> {
        self.report = ReplayReport::default();
        self.created.clear();

        info!("Replay configuration: {}", serde_json::to_string(&self.config)?);

        match self.run_inner(rows, log) {
            Ok(()) => {
                self.state = ReplayState::Done;
                self.report.state = self.state;
                log.write("END")?;
                Ok(self.report.clone())
            }
            Err(e) => {
                let failed_in = self.state;
                self.state = ReplayState::Aborted;
                self.report.state = self.state;
                self.report.failed_tag = match &e {
                    BakError::ReplayAborted { tag, .. } => Some(tag.clone()),
                    _ => None,
                };
                let at = self
                    .report
                    .failed_tag
                    .as_ref()
                    .map(|tag| format!(" ({})", tag))
                    .unwrap_or_default();
                // The log itself may be what failed; the original error wins.
                let _ = log.write(format!("ABORTED{} in {}: {}", at, failed_in, e.root_cause()));
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, rows: &[AnnotatedRow], log: &mut ActionLog) -> Result<()> {
        log.write("BEGIN")?;
        if self.config.do_commit {
            log.write("MODE: COMMIT")?;
        } else {
            log.write("MODE: What-if (actions logged, repository not affected)")?;
        }

        self.state = ReplayState::LoadAnnotations;
        let groups = commit_groups(rows);
        let skipped = rows
            .iter()
            .filter_map(AnnotatedRow::as_change)
            .filter(|r| r.skip_flag.is_skip())
            .count();
        log.write(format!(
            "Loaded {} rows: {} commit groups, {} rows skipped",
            rows.len(),
            groups.len(),
            skipped
        ))?;

        self.check_repository()?;
        if self.config.init_date.is_some() {
            self.state = ReplayState::RepoSetup;
            self.setup_repository(log)?;
        }

        for group in &groups {
            self.replay_group(group, log)
                .map_err(|e| BakError::aborted_at(group.tag.as_str(), e))?;
        }
        Ok(())
    }

    fn check_repository(&self) -> Result<()> {
        let dir = &self.config.repo_dir;
        match self.config.vcs {
            VcsKind::Git => {
                if !dir.is_dir() {
                    return Err(BakError::DirectoryNotFound(dir.clone()));
                }
                if !dir.join(".git").exists() {
                    return Err(BakError::config(format!(
                        "Git repository directory not found in {:?}",
                        dir
                    )));
                }
            }
            VcsKind::Fossil => {
                if self.config.init_date.is_none() && !dir.is_dir() {
                    return Err(BakError::DirectoryNotFound(dir.clone()));
                }
            }
        }
        Ok(())
    }

    fn setup_repository(&mut self, log: &mut ActionLog) -> Result<()> {
        let dir = self.config.repo_dir.clone();
        let repo_name = self
            .config
            .repo_name
            .clone()
            .unwrap_or_else(|| default_repo_name(&dir));
        let date = self.config.init_date.clone().unwrap_or_default();

        let repo_file = dir.join(&repo_name);
        if repo_file.exists() {
            return Err(BakError::AlreadyExists(repo_file));
        }

        if !dir.exists() {
            log.write(format!("mkdir {}", dir.display()))?;
            if self.config.do_commit {
                fs::create_dir_all(&dir)?;
            }
        }

        self.run_action(&VcsAction::Init { repo_name: repo_name.clone(), date }, "RUN:", log)?;
        self.run_action(&VcsAction::Open { repo_name }, "RUN:", log)?;
        Ok(())
    }

    fn replay_group(&mut self, group: &CommitGroup, log: &mut ActionLog) -> Result<()> {
        let tag = group.tag.as_str();
        info!("Replaying {} ({} files)", tag, group.members.len());

        // Validate the message before anything touches the working tree.
        let message = group.message()?;
        log.write(format!(
            "({}) DATES author={} commit={}",
            tag,
            group.dates.author_string(),
            group.dates.commit_string()
        ))?;

        self.state = ReplayState::PreCommands;
        let mut post = Vec::new();
        for member in &group.members {
            match &member.aux_command {
                AuxCommand::None => {}
                AuxCommand::Pre(payload) => {
                    let action = VcsAction::Run { args: split_quoted(payload) };
                    self.run_action(&action, &format!("({}) RUN (PRE):", tag), log)?;
                    self.report.pre_commands_run += 1;
                }
                AuxCommand::Rename { from } => {
                    let to = self.target_name(member)?;
                    let action = VcsAction::Run {
                        args: vec!["mv".to_string(), from.clone(), to.clone()],
                    };
                    self.run_action(&action, &format!("({}) RUN (PRE):", tag), log)?;
                    self.created.insert(self.config.repo_dir.join(&to));
                    self.report.pre_commands_run += 1;
                }
                AuxCommand::Post(payload) => post.push(payload.clone()),
            }
        }

        self.state = ReplayState::CopyAndStage;
        for member in &group.members {
            self.copy_and_stage(member, group, log)?;
        }

        self.state = ReplayState::Commit;
        let commit = VcsAction::Commit {
            message,
            dates: group.dates,
        };
        self.run_action(&commit, &format!("({}) RUN:", tag), log)?;
        self.report.groups_committed += 1;

        self.state = ReplayState::PostCommands;
        for payload in post {
            let action = VcsAction::Run { args: split_quoted(&payload) };
            self.run_action(&action, &format!("({}) RUN (POST):", tag), log)?;
            self.report.post_commands_run += 1;
        }

        Ok(())
    }

    fn copy_and_stage(&mut self, member: &ChangeRecord, group: &CommitGroup, log: &mut ActionLog) -> Result<()> {
        let name = self.target_name(member)?;
        let target = self.config.repo_dir.join(&name);
        let existed = target.exists() || self.created.contains(&target);

        log.write(format!("COPY {}", member.current_path.display()))?;
        log.write(format!("  TO {}", target.display()))?;

        let hits = if self.config.do_commit {
            let hits = self.filter.copy_filtered(&member.current_path, &target)?;
            let mtime = FileTime::from_system_time(group.dates.commit_system_time());
            filetime::set_file_times(&target, mtime, mtime)?;
            hits
        } else {
            self.filter.preview_hits(&member.current_path)?
        };
        for hit in &hits {
            log.write(format!(
                "FILTER {} ({}): {}",
                member.current_path.display(),
                hit.line,
                hit.item
            ))?;
        }
        self.report.filter_hits += hits.len();
        self.report.files_copied += 1;
        self.created.insert(target);

        if existed {
            debug!("{} already tracked", name);
        } else {
            let action = VcsAction::Add { path: name };
            self.run_action(&action, &format!("({}) RUN:", group.tag), log)?;
            self.report.adds_issued += 1;
        }
        Ok(())
    }

    /// File name the record is copied to inside the working tree
    fn target_name(&self, member: &ChangeRecord) -> Result<String> {
        Path::new(&member.logical_id)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BakError::row(
                    member.row_number,
                    format!("base_name '{}' has no file name", member.logical_id),
                )
            })
    }

    fn run_action(&mut self, action: &VcsAction, label: &str, log: &mut ActionLog) -> Result<()> {
        let command = self.vcs.command(action)?;
        log.write(format!("{} {}", label, command.command_line()))?;
        if self.config.do_commit {
            let output = self.vcs.execute(action)?;
            if !output.is_empty() {
                log.write(format!("OUTPUT: {}", output))?;
            }
        }
        Ok(())
    }
}

impl<A: VcsAdapter> fmt::Debug for ReplayEngine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}
