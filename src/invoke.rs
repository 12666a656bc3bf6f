//! Running a plugin end to end.
//!
//! ```text
//! resolve tool → parse arguments → setup_configuration
//!   → save / show config (and stop)
//!   → history row (not-scheduled)
//!   → in-process: running → plugin → index outputs → store results → finished
//!   → batch:      job script → submit → scheduled
//! ```
//!
//! A batch job re-enters through `--scheduled-id`, which loads the stored
//! configuration and runs it in-process. Any failure after the row moved
//! to `running` marks it `broken` before the error is returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ConfigHandle, SCHEDULER_SECTION};
use crate::crawler::{self, LoadOptions};
use crate::drs::{self, USER_DATA_TYPE};
use crate::error::{Error, Result};
use crate::history::{HistoryStore, NewEntry, ResultSpec};
use crate::models::{ResultType, Status};
use crate::parameters::ConfigRecord;
use crate::plugin::{CommandPluginRunner, OutputFile, Plugin, PluginRunner, RunContext, SpecialVariables};
use crate::registry::PluginRegistry;
use crate::scheduler::{CommandRunner, Job, JobSpec, SystemRunner};
use crate::solr::IndexCores;
use crate::user::{SystemUserProvider, UserInfo, UserProvider};

/// Caller choices for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub batchmode: bool,
    pub caption: Option<String>,
    /// Save the configuration to the user's default location.
    pub save: bool,
    /// Save the configuration to this file.
    pub save_config: Option<PathBuf>,
    pub show_config: bool,
    /// Run a previously scheduled history entry.
    pub scheduled_id: Option<i64>,
}

/// What an invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    ConfigShown(String),
    ConfigSaved(PathBuf),
    Finished {
        row_id: i64,
        status: Status,
        outputs: Vec<PathBuf>,
    },
    Scheduled {
        row_id: i64,
        job_id: String,
        script: PathBuf,
    },
}

/// Everything a plugin run needs, with injectable collaborators.
pub struct Engine {
    config: ConfigHandle,
    registry: PluginRegistry,
    history: HistoryStore,
    cores: Option<IndexCores>,
    users: Arc<dyn UserProvider>,
    runner: Arc<dyn PluginRunner>,
    commands: Arc<dyn CommandRunner>,
}

impl Engine {
    pub fn new(config: ConfigHandle, registry: PluginRegistry, history: HistoryStore) -> Self {
        Self {
            config,
            registry,
            history,
            cores: None,
            users: Arc::new(SystemUserProvider),
            runner: Arc::new(CommandPluginRunner),
            commands: Arc::new(SystemRunner),
        }
    }

    /// Index plugin outputs into these cores.
    pub fn with_index(mut self, cores: IndexCores) -> Self {
        self.cores = Some(cores);
        self
    }

    pub fn with_users(mut self, users: Arc<dyn UserProvider>) -> Self {
        self.users = users;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn PluginRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_command_runner(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Run `tool` with `name=value` argument tokens.
    pub async fn run_plugin<I, S>(&self, tool: &str, tokens: I, opts: &RunOptions) -> Result<RunOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plugin = self.registry.get_plugin(tool)?;
        let user = self.users.current_user()?;

        if let Some(row_id) = opts.scheduled_id {
            return self.run_scheduled(plugin, row_id, &user, opts).await;
        }

        let config = self.config.current();
        let special = SpecialVariables::new(&user, &config, plugin.name());
        let mut record = plugin.parameters.parse_arguments(tokens, true, false, false)?;
        plugin.fill_output_dir(&mut record, &special.user_output_dir);
        let resolved = plugin.setup_configuration(&record, &special, false)?;

        if opts.save || opts.save_config.is_some() {
            let path = match &opts.save_config {
                Some(path) => path.clone(),
                None => default_config_file(&user, &config, plugin.name()),
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, plugin.render_config(&resolved))?;
            info!(tool = plugin.name(), path = %path.display(), "configuration saved");
            return Ok(RunOutcome::ConfigSaved(path));
        }
        if opts.show_config {
            return Ok(RunOutcome::ConfigShown(plugin.render_config(&resolved)));
        }

        let errors = plugin.parameters.validate_errors(&resolved);
        if !errors.is_empty() {
            return Err(errors.into_error());
        }
        let resolved = plugin.setup_configuration(&record, &special, true)?;

        let version = plugin.version_string();
        let info = self.registry.version_info(plugin).await;
        let version_id = self
            .history
            .register_version(
                plugin.name(),
                &version,
                &info.repository,
                &info.commit,
                env!("CARGO_PKG_VERSION"),
            )
            .await?;
        self.history
            .register_parameters(plugin.name(), version_id, &plugin.parameters)
            .await?;
        let row_id = self
            .history
            .store_history(NewEntry {
                tool: plugin.name(),
                version: &version,
                configuration: &resolved,
                uid: &user.name,
                status: Status::NotScheduled,
                slurm_output: None,
                flag: 0,
                version_details_id: Some(version_id),
            })
            .await?;

        if opts.batchmode || self.is_external(&user)? {
            return self.submit(plugin, row_id, &user, opts).await;
        }
        self.execute(plugin, row_id, &resolved, &user, opts.caption.as_deref())
            .await
    }

    /// Members of the configured external group may only run batch jobs.
    fn is_external(&self, user: &UserInfo) -> Result<bool> {
        let Some(group) = self.config.current().external_group() else {
            return Ok(false);
        };
        let external = self.users.is_member_of(user, &group)?;
        if external {
            info!(user = %user.name, group = %group, "external user, forcing batch mode");
        }
        Ok(external)
    }

    async fn submit(&self, plugin: &Plugin, row_id: i64, user: &UserInfo, opts: &RunOptions) -> Result<RunOutcome> {
        let config = self.config.current();
        let system = config.scheduler_system()?;
        let mut spec = JobSpec::from_options(&config.get_section(SCHEDULER_SECTION)?)?;
        spec.name = plugin.name().to_lowercase();
        if spec.log_directory.is_none() {
            spec.log_directory = Some(config.scheduler_output_dir());
        }
        if let Some(path) = config.path() {
            spec.env_prelude.push(format!(
                "export {}={}",
                crate::config::CONFIG_FILE_ENV,
                shell_quote(&path.display().to_string())
            ));
        }
        spec.command_prefix = format!("freva plugin run {}", shell_quote(plugin.name()));
        spec.freva_args = vec!["--scheduled-id".to_string(), row_id.to_string()];
        if let Some(caption) = &opts.caption {
            spec.freva_args.push("--caption".to_string());
            spec.freva_args.push(shell_quote(caption));
        }

        let mut job = Job::new(system, spec);
        let job_id = job
            .submit(self.commands.as_ref(), &config.scheduler_input_dir())
            .await?;
        let script = job
            .script_path()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !self
            .history
            .schedule_entry(row_id, &user.name, &script.display().to_string())
            .await?
        {
            warn!(row_id, "history entry was not in status not-scheduled");
        }
        info!(tool = plugin.name(), row_id, job_id = %job_id, "plugin scheduled");
        Ok(RunOutcome::Scheduled { row_id, job_id, script })
    }

    async fn run_scheduled(
        &self,
        plugin: &Plugin,
        row_id: i64,
        user: &UserInfo,
        opts: &RunOptions,
    ) -> Result<RunOutcome> {
        let entry = self.history.get_entry(row_id).await?;
        if entry.tool != plugin.name().to_lowercase() {
            return Err(Error::Validation(format!(
                "history entry {} belongs to '{}', not '{}'",
                row_id,
                entry.tool,
                plugin.name()
            )));
        }
        if entry.status != Status::Scheduled {
            return Err(Error::Validation(format!(
                "history entry {} is {}, expected scheduled",
                row_id, entry.status
            )));
        }
        let record = entry.config_map();
        self.execute(plugin, row_id, &record, user, opts.caption.as_deref())
            .await
    }

    async fn execute(
        &self,
        plugin: &Plugin,
        row_id: i64,
        record: &ConfigRecord,
        user: &UserInfo,
        caption: Option<&str>,
    ) -> Result<RunOutcome> {
        self.history
            .upgrade_status(row_id, &user.name, Status::Running)
            .await?;

        match self.run_and_record(plugin, row_id, record, user, caption).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(tool = plugin.name(), row_id, error = %e, "plugin run failed");
                if let Err(status_err) = self
                    .history
                    .upgrade_status(row_id, &user.name, Status::Broken)
                    .await
                {
                    warn!(row_id, error = %status_err, "cannot mark history entry broken");
                }
                Err(e)
            }
        }
    }

    async fn run_and_record(
        &self,
        plugin: &Plugin,
        row_id: i64,
        record: &ConfigRecord,
        user: &UserInfo,
        caption: Option<&str>,
    ) -> Result<RunOutcome> {
        let config = self.config.current();
        let ctx = RunContext {
            user: user.clone(),
            row_id,
            output_dir: user.output_dir(&config, plugin.name()),
            plots_dir: user.plots_dir(&config, plugin.name()),
            cache_dir: user.cache_dir(&config, plugin.name()),
        };
        for dir in [&ctx.output_dir, &ctx.plots_dir, &ctx.cache_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let outputs = self.runner.run(plugin, record, &ctx).await?;
        self.index_outputs(plugin, user, &outputs).await?;

        let results: BTreeMap<String, ResultSpec> = outputs
            .iter()
            .map(|out| {
                (
                    out.path.display().to_string(),
                    ResultSpec {
                        kind: out.kind,
                        preview_path: out.preview.clone(),
                        caption: caption.map(str::to_string).or_else(|| out.caption.clone()),
                    },
                )
            })
            .collect();
        let preview_root = config.preview_path();
        self.history
            .store_results(row_id, &results, preview_root.as_deref())
            .await?;

        let status = if outputs.is_empty() {
            Status::FinishedNoOutput
        } else {
            Status::Finished
        };
        self.history
            .upgrade_status(row_id, &user.name, status)
            .await?;
        info!(tool = plugin.name(), row_id, status = %status, "plugin run recorded");
        Ok(RunOutcome::Finished {
            row_id,
            status,
            outputs: outputs.into_iter().map(|o| o.path).collect(),
        })
    }

    /// Link data outputs into the user data tree and index them.
    async fn index_outputs(&self, plugin: &Plugin, user: &UserInfo, outputs: &[OutputFile]) -> Result<()> {
        let Some(cores) = &self.cores else {
            return Ok(());
        };
        let config = self.config.current();
        let Ok(drs) = config.get_drs_config() else {
            return Ok(());
        };
        if drs.get(USER_DATA_TYPE).is_err() {
            return Ok(());
        }

        let mut files = Vec::new();
        for out in outputs.iter().filter(|o| o.kind == ResultType::Data) {
            let file = drs::user_data_file(drs, &user.name, plugin.name(), &out.path)?;
            let dest = file.to_path();
            drs::link_file(&out.path, &dest)?;
            let mtime = crawler::mtime_of(&dest)?;
            files.push((file, mtime));
        }
        if files.is_empty() {
            return Ok(());
        }
        let stats = crawler::ingest_files(cores, files, &LoadOptions::default()).await?;
        info!(tool = plugin.name(), files = stats.files, "plugin outputs indexed");
        Ok(())
    }
}

/// Where `--save` without a path puts a plugin configuration.
pub fn default_config_file(user: &UserInfo, config: &crate::config::Config, tool: &str) -> PathBuf {
    let tool = tool.to_lowercase();
    user.base_dir(config)
        .join("config")
        .join(&tool)
        .join(format!("{}.conf", tool))
}

/// Quote `s` for a POSIX shell when it contains anything unusual.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("DummyPlugin"), "DummyPlugin");
        assert_eq!(shell_quote("/etc/freva/x.conf"), "/etc/freva/x.conf");
        assert_eq!(shell_quote("a caption"), "'a caption'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn default_save_location() {
        let cfg = crate::config::Config::from_str(
            "[evaluation_system]\nbase_dir = evaluation_system\n",
            Path::new("/"),
        )
        .unwrap();
        let user = UserInfo {
            name: "jdoe".to_string(),
            uid: 1,
            home: PathBuf::from("/home/jdoe"),
        };
        assert_eq!(
            default_config_file(&user, &cfg, "DummyPlugin"),
            PathBuf::from("/home/jdoe/evaluation_system/config/dummyplugin/dummyplugin.conf")
        );
    }
}
