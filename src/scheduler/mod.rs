//! Batch job scripts and submission.
//!
//! A [`Job`] renders one script from a [`JobSpec`] and a [`JobDriver`]:
//!
//! ```text
//! <shebang>
//!
//! <job header>
//! <env prelude>
//!
//! <worker command>
//! ```
//!
//! then submits it through a [`CommandRunner`] and keeps the job id the
//! batch system reports. Drivers only differ in their header directives
//! and commands.

mod local;
mod lsf;
mod oar;
mod pbs;
mod sge;
mod slurm;

pub use local::LocalDriver;
pub use lsf::LsfDriver;
pub use oar::OarDriver;
pub use pbs::PbsDriver;
pub use sge::SgeDriver;
pub use slurm::SlurmDriver;

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Supported workload managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerSystem {
    Local,
    Slurm,
    Pbs,
    Moab,
    Sge,
    Oar,
    Lsf,
}

impl SchedulerSystem {
    pub const ALL: [SchedulerSystem; 7] = [
        SchedulerSystem::Local,
        SchedulerSystem::Slurm,
        SchedulerSystem::Pbs,
        SchedulerSystem::Moab,
        SchedulerSystem::Sge,
        SchedulerSystem::Oar,
        SchedulerSystem::Lsf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerSystem::Local => "local",
            SchedulerSystem::Slurm => "slurm",
            SchedulerSystem::Pbs => "pbs",
            SchedulerSystem::Moab => "moab",
            SchedulerSystem::Sge => "sge",
            SchedulerSystem::Oar => "oar",
            SchedulerSystem::Lsf => "lsf",
        }
    }

    /// The driver for this system.
    pub fn driver(self) -> Box<dyn JobDriver> {
        match self {
            SchedulerSystem::Local => Box::new(LocalDriver),
            SchedulerSystem::Slurm => Box::new(SlurmDriver),
            SchedulerSystem::Pbs => Box::new(PbsDriver::pbs()),
            SchedulerSystem::Moab => Box::new(PbsDriver::moab()),
            SchedulerSystem::Sge => Box::new(SgeDriver),
            SchedulerSystem::Oar => Box::new(OarDriver),
            SchedulerSystem::Lsf => Box::new(LsfDriver::detect()),
        }
    }
}

impl fmt::Display for SchedulerSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerSystem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        SchedulerSystem::ALL
            .into_iter()
            .find(|sys| sys.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "scheduler_system must be one of {}, got '{}'",
                    SchedulerSystem::ALL.map(|s| s.as_str()).join(", "),
                    s
                )
            })
    }
}

/// Parse a human memory size into bytes.
///
/// `"128G"`, `"8 GiB"`, `"1e6 kB"` and bare numbers (bytes) are accepted;
/// single-letter and `*B` units are decimal, `*iB` units binary.
pub fn parse_bytes(s: &str) -> Result<u64> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = if compact.chars().any(|c| c.is_ascii_digit()) {
        compact
    } else {
        format!("1{}", compact)
    };
    let split = compact
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let (number, unit) = compact.split_at(split);
    let invalid = || Error::Validation(format!("cannot parse memory size '{}'", s));

    let n: f64 = number.parse().map_err(|_| invalid())?;
    let multiplier: f64 = match unit.to_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        "p" | "pb" => 1e15,
        "kib" => 1024.0,
        "mib" => 1024f64.powi(2),
        "gib" => 1024f64.powi(3),
        "tib" => 1024f64.powi(4),
        "pib" => 1024f64.powi(5),
        _ => return Err(invalid()),
    };
    if n < 0.0 {
        return Err(invalid());
    }
    Ok((n * multiplier) as u64)
}

/// Abstract resources of one batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub cores: u32,
    pub processes: u32,
    /// Bytes.
    pub memory: Option<u64>,
    /// `HH:MM:SS`
    pub walltime: Option<String>,
    pub queue: Option<String>,
    pub project: Option<String>,
    pub log_directory: Option<PathBuf>,
    /// Shell lines run before the worker command.
    pub env_prelude: Vec<String>,
    /// Header lines appended after the driver's own.
    pub extra_header: Vec<String>,
    /// Header lines containing any of these substrings are dropped.
    pub header_skip: Vec<String>,
    pub shebang: String,
    pub command_prefix: String,
    pub freva_args: Vec<String>,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            cores: 1,
            processes: 1,
            memory: None,
            walltime: None,
            queue: None,
            project: None,
            log_directory: None,
            env_prelude: Vec::new(),
            extra_header: Vec::new(),
            header_skip: Vec::new(),
            shebang: "#!/usr/bin/env bash".to_string(),
            command_prefix: "freva".to_string(),
            freva_args: Vec::new(),
        }
    }
}

impl JobSpec {
    /// Build from a `[scheduler_options]` section.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<JobSpec> {
        let mut spec = JobSpec::default();
        let get = |key: &str| options.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let lines = |value: &str| -> Vec<String> {
            value
                .split([';', '\n'])
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        };
        let count = |key: &str, value: &str| {
            value.parse::<u32>().map_err(|_| {
                Error::Configuration(format!("scheduler option {} must be a number, got '{}'", key, value))
            })
        };

        if let Some(name) = get("name") {
            spec.name = name.to_string();
        }
        if let Some(cores) = get("cores") {
            spec.cores = count("cores", cores)?.max(1);
        }
        if let Some(processes) = get("processes") {
            spec.processes = count("processes", processes)?.max(1);
        }
        if let Some(memory) = get("memory") {
            spec.memory = Some(parse_bytes(memory)?);
        }
        spec.walltime = get("walltime").map(str::to_string);
        spec.queue = get("queue").map(str::to_string);
        spec.project = get("project").map(str::to_string);
        spec.log_directory = get("log_directory").map(PathBuf::from);
        if let Some(source) = get("source") {
            spec.env_prelude.push(format!("source {}", source));
        }
        if let Some(extra) = get("env_extra") {
            spec.env_prelude.extend(lines(extra));
        }
        if let Some(extra) = get("job_extra") {
            spec.extra_header.extend(lines(extra));
        }
        if let Some(skip) = get("header_skip") {
            spec.header_skip = skip
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(shebang) = get("shebang") {
            spec.shebang = shebang.to_string();
        }
        Ok(spec)
    }

    pub fn worker_command(&self) -> String {
        std::iter::once(self.command_prefix.as_str())
            .chain(self.freva_args.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The script text for the given pieces.
pub fn assemble_script(shebang: &str, header: &str, env_prelude: &str, command: &str) -> String {
    format!("{}\n\n{}\n{}\n\n{}\n", shebang, header, env_prelude, command)
}

/// `HH:MM[:SS]` → `HH:MM`
pub(crate) fn hours_minutes(walltime: &str) -> String {
    walltime.split(':').take(2).collect::<Vec<_>>().join(":")
}

/// Binary-unit ceiling (`27G`, `512M`, `4K`), as used by SLURM and SGE.
pub(crate) fn format_bytes_binary_ceil(n: u64) -> String {
    const KIB: f64 = 1024.0;
    let n = n as f64;
    if n >= KIB.powi(3) {
        format!("{}G", (n / KIB.powi(3)).ceil() as u64)
    } else if n >= KIB.powi(2) {
        format!("{}M", (n / KIB.powi(2)).ceil() as u64)
    } else if n >= KIB {
        format!("{}K", (n / KIB).ceil() as u64)
    } else {
        "1K".to_string()
    }
}

/// Per-system directives and commands.
pub trait JobDriver: Send + Sync {
    fn system(&self) -> SchedulerSystem;

    fn submit_command(&self) -> &str;

    fn cancel_command(&self) -> &str;

    /// Pattern with a named group `job_id`.
    fn job_id_regexp(&self) -> &str {
        r"(?P<job_id>\d+)"
    }

    /// Native header lines for `spec`.
    fn header(&self, spec: &JobSpec) -> Vec<String>;

    fn parse_job_id(&self, output: &str) -> Result<String> {
        let re = Regex::new(self.job_id_regexp())?;
        re.captures(output)
            .and_then(|c| c.name("job_id"))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                Error::BatchSubmit(format!(
                    "could not find a job id in {} output: {}",
                    self.submit_command(),
                    output.trim()
                ))
            })
    }

    /// Command line submitting the script written to `path`.
    fn submit_argv(&self, path: &Path, _script: &str) -> Vec<String> {
        let mut argv: Vec<String> = self
            .submit_command()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        argv.push(path.display().to_string());
        argv
    }

    /// Data passed on the submit command's stdin.
    fn submit_stdin(&self, _script: &str) -> Option<String> {
        None
    }

    fn cancel_argv(&self, job_id: &str) -> Vec<String> {
        let mut argv: Vec<String> = self
            .cancel_command()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        argv.push(job_id.to_string());
        argv
    }
}

/// Exit status and captured output of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands; swapped for a recorder in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, optionally feeding `stdin`.
    async fn run(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput>;

    /// Start in the background; returns the process id.
    async fn spawn(&self, argv: &[String]) -> Result<u32>;

    /// SIGKILL a process; an already gone process is not an error.
    fn kill(&self, pid: u32) -> Result<()>;
}

/// Runs commands on this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::BatchSubmit("empty command".to_string()))?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::BatchSubmit(format!("cannot run {}: {}", program, e)))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn(&self, argv: &[String]) -> Result<u32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::BatchSubmit("empty command".to_string()))?;
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::BatchSubmit(format!("cannot start {}: {}", program, e)))?;
        child
            .id()
            .ok_or_else(|| Error::BatchSubmit(format!("{} exited before reporting a pid", program)))
    }

    fn kill(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| Error::BatchSubmit(format!("invalid process id {}", pid)))?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid, "process already gone");
                Ok(())
            }
            Err(e) => Err(Error::BatchSubmit(format!("cannot kill {}: {}", pid, e))),
        }
    }
}

/// Cancel outputs that mean the job is gone already.
const GONE_MARKERS: &[&str] = &[
    "invalid job",
    "unknown job",
    "not found",
    "does not exist",
    "already completed",
    "has already finished",
];

/// Cancel `job_id` with `driver`.
pub async fn cancel_job(driver: &dyn JobDriver, job_id: &str, runner: &dyn CommandRunner) -> Result<()> {
    if driver.system() == SchedulerSystem::Local {
        let pid = job_id
            .parse::<u32>()
            .map_err(|_| Error::BatchSubmit(format!("'{}' is not a process id", job_id)))?;
        return runner.kill(pid);
    }
    let argv = driver.cancel_argv(job_id);
    let out = runner.run(&argv, None).await?;
    if out.status == 0 {
        info!(job_id, system = %driver.system(), "job cancelled");
        return Ok(());
    }
    let text = format!("{} {}", out.stdout, out.stderr).to_lowercase();
    if GONE_MARKERS.iter().any(|m| text.contains(m)) {
        debug!(job_id, "job already gone");
        return Ok(());
    }
    Err(Error::BatchSubmit(format!(
        "{} exited with {}: stdout: {} stderr: {}",
        argv.join(" "),
        out.status,
        out.stdout.trim(),
        out.stderr.trim()
    )))
}

/// One batch job. Single use: a second `submit` fails.
pub struct Job {
    pub spec: JobSpec,
    driver: Box<dyn JobDriver>,
    job_id: Option<String>,
    script_path: Option<PathBuf>,
}

impl Job {
    pub fn new(system: SchedulerSystem, spec: JobSpec) -> Self {
        Job::with_driver(system.driver(), spec)
    }

    pub fn with_driver(driver: Box<dyn JobDriver>, spec: JobSpec) -> Self {
        Self {
            spec,
            driver,
            job_id: None,
            script_path: None,
        }
    }

    pub fn driver(&self) -> &dyn JobDriver {
        self.driver.as_ref()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    /// Header lines, minus the skipped ones, plus the extra ones.
    pub fn job_header(&self) -> String {
        self.driver
            .header(&self.spec)
            .into_iter()
            .chain(self.spec.extra_header.iter().cloned())
            .filter(|line| !self.spec.header_skip.iter().any(|s| line.contains(s.as_str())))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn job_script(&self) -> String {
        assemble_script(
            &self.spec.shebang,
            &self.job_header(),
            &self.spec.env_prelude.join("\n"),
            &self.spec.worker_command(),
        )
    }

    /// Write the script into `input_dir` and submit it.
    pub async fn submit(&mut self, runner: &dyn CommandRunner, input_dir: &Path) -> Result<String> {
        if self.job_id.is_some() || self.script_path.is_some() {
            return Err(Error::BatchSubmit("job was already submitted".to_string()));
        }

        let script = self.job_script();
        std::fs::create_dir_all(input_dir)?;
        let path = input_dir.join(format!("{}-{}.sh", self.spec.name, uuid::Uuid::new_v4()));
        std::fs::write(&path, &script)?;
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        self.script_path = Some(path.clone());

        let job_id = if self.driver.system() == SchedulerSystem::Local {
            let argv = self.driver.submit_argv(&path, &script);
            runner.spawn(&argv).await?.to_string()
        } else {
            let argv = self.driver.submit_argv(&path, &script);
            let stdin = self.driver.submit_stdin(&script);
            let out = runner.run(&argv, stdin.as_deref()).await?;
            if out.status != 0 {
                return Err(Error::BatchSubmit(format!(
                    "{} exited with {}: stdout: {} stderr: {}",
                    argv.first().map(String::as_str).unwrap_or_default(),
                    out.status,
                    out.stdout.trim(),
                    out.stderr.trim()
                )));
            }
            self.driver.parse_job_id(&out.stdout)?
        };

        info!(job_id = %job_id, system = %self.driver.system(), script = %path.display(), "job submitted");
        self.job_id = Some(job_id.clone());
        Ok(job_id)
    }

    /// Cancel the job; a never submitted job is left alone.
    pub async fn cancel(&self, runner: &dyn CommandRunner) -> Result<()> {
        match &self.job_id {
            None => Ok(()),
            Some(id) => cancel_job(self.driver.as_ref(), id, runner).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call and answers with a canned output.
    pub(crate) struct RecordingRunner {
        pub calls: Mutex<Vec<(Vec<String>, Option<String>)>>,
        pub killed: Mutex<Vec<u32>>,
        pub output: CommandOutput,
    }

    impl RecordingRunner {
        pub(crate) fn answering(status: i32, stdout: &str, stderr: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                killed: Mutex::new(Vec::new()),
                output: CommandOutput {
                    status,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            }
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((argv.to_vec(), stdin.map(str::to_string)));
            Ok(self.output.clone())
        }

        async fn spawn(&self, argv: &[String]) -> Result<u32> {
            self.calls.lock().unwrap().push((argv.to_vec(), None));
            Ok(4242)
        }

        fn kill(&self, pid: u32) -> Result<()> {
            self.killed.lock().unwrap().push(pid);
            Ok(())
        }
    }

    #[test]
    fn parses_memory_sizes() {
        assert_eq!(parse_bytes("128G").unwrap(), 128_000_000_000);
        assert_eq!(parse_bytes("8 GiB").unwrap(), 8 * 1024u64.pow(3));
        assert_eq!(parse_bytes("1e6 kB").unwrap(), 1_000_000_000);
        assert_eq!(parse_bytes("1000").unwrap(), 1000);
        assert_eq!(parse_bytes("5MB").unwrap(), 5_000_000);
        assert_eq!(parse_bytes("MB").unwrap(), 1_000_000);
        assert!(parse_bytes("12 parsecs").is_err());
    }

    #[test]
    fn binary_ceiling() {
        assert_eq!(format_bytes_binary_ceil(28_000_000_000), "27G");
        assert_eq!(format_bytes_binary_ceil(1024 * 1024 * 512), "512M");
        assert_eq!(format_bytes_binary_ceil(5000), "5K");
        assert_eq!(format_bytes_binary_ceil(10), "1K");
    }

    #[test]
    fn scheduler_names() {
        assert_eq!("SLURM".parse::<SchedulerSystem>().unwrap(), SchedulerSystem::Slurm);
        assert!("condor".parse::<SchedulerSystem>().is_err());
        for sys in SchedulerSystem::ALL {
            assert_eq!(sys.driver().system(), sys);
        }
    }

    #[test]
    fn spec_from_options() {
        let mut opts = BTreeMap::new();
        opts.insert("memory".to_string(), "10G".to_string());
        opts.insert("queue".to_string(), "compute".to_string());
        opts.insert("source".to_string(), "/opt/freva/activate_sh".to_string());
        opts.insert("job_extra".to_string(), "#SBATCH --exclusive; #SBATCH --mail-type=END".to_string());
        opts.insert("cores".to_string(), "4".to_string());
        let spec = JobSpec::from_options(&opts).unwrap();
        assert_eq!(spec.memory, Some(10_000_000_000));
        assert_eq!(spec.queue.as_deref(), Some("compute"));
        assert_eq!(spec.env_prelude, vec!["source /opt/freva/activate_sh"]);
        assert_eq!(spec.extra_header.len(), 2);
        assert_eq!(spec.cores, 4);

        opts.insert("cores".to_string(), "many".to_string());
        assert!(JobSpec::from_options(&opts).is_err());
    }

    #[test]
    fn script_template() {
        let s = assemble_script("#!/bin/sh", "#X a\n#X b", "module load x", "freva plugin run t");
        assert_eq!(s, "#!/bin/sh\n\n#X a\n#X b\nmodule load x\n\nfreva plugin run t\n");
    }

    #[test]
    fn header_skip_drops_lines() {
        let spec = JobSpec {
            header_skip: vec!["--mem".to_string()],
            memory: Some(1_000_000_000),
            ..JobSpec::default()
        };
        let job = Job::new(SchedulerSystem::Slurm, spec);
        assert!(!job.job_header().contains("--mem"));
        assert!(job.job_header().contains("#SBATCH -J worker"));
    }

    #[tokio::test]
    async fn submit_once_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::answering(0, "Submitted batch job 777\n", "");
        let mut job = Job::new(SchedulerSystem::Slurm, JobSpec::default());
        assert_eq!(job.submit(&runner, dir.path()).await.unwrap(), "777");

        let script = job.script_path().unwrap().to_path_buf();
        assert!(script.starts_with(dir.path()));
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
        assert!(matches!(
            job.submit(&runner, dir.path()).await,
            Err(Error::BatchSubmit(_))
        ));

        job.cancel(&runner).await.unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, vec!["sbatch".to_string(), script.display().to_string()]);
        assert_eq!(calls.last().unwrap().0, vec!["scancel", "777"]);
    }

    #[tokio::test]
    async fn failed_submit_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::answering(1, "", "sbatch: error: invalid partition");
        let mut job = Job::new(SchedulerSystem::Slurm, JobSpec::default());
        let err = job.submit(&runner, dir.path()).await.unwrap_err().to_string();
        assert!(err.contains("invalid partition"), "{}", err);
        assert!(job.job_id().is_none());
    }

    #[tokio::test]
    async fn cancel_swallows_gone_jobs() {
        let runner = RecordingRunner::answering(1, "", "scancel: error: Invalid job id specified");
        cancel_job(&SlurmDriver, "12", &runner).await.unwrap();

        let runner = RecordingRunner::answering(1, "", "permission denied");
        assert!(cancel_job(&SlurmDriver, "12", &runner).await.is_err());

        let unsubmitted = Job::new(SchedulerSystem::Pbs, JobSpec::default());
        unsubmitted.cancel(&runner).await.unwrap();
    }

    #[tokio::test]
    async fn local_jobs_spawn_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::answering(0, "", "");
        let mut job = Job::new(SchedulerSystem::Local, JobSpec::default());
        assert_eq!(job.submit(&runner, dir.path()).await.unwrap(), "4242");
        assert_eq!(runner.calls.lock().unwrap()[0].0[0], "bash");
        job.cancel(&runner).await.unwrap();
        assert_eq!(*runner.killed.lock().unwrap(), vec![4242]);
    }

    #[tokio::test]
    async fn system_runner_feeds_stdin() {
        let out = SystemRunner
            .run(&["cat".to_string()], Some("hello"))
            .await
            .unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    fn killing_a_missing_process_is_fine() {
        // Max pid on Linux is below this value.
        SystemRunner.kill(4_194_304 + 17).unwrap();
    }
}
