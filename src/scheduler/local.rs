use super::{JobDriver, JobSpec, SchedulerSystem};

/// Runs the script as a background process; the pid is the job id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDriver;

impl JobDriver for LocalDriver {
    fn system(&self) -> SchedulerSystem {
        SchedulerSystem::Local
    }

    /// The prelude relies on bash builtins such as `source`.
    fn submit_command(&self) -> &str {
        "bash"
    }

    fn cancel_command(&self) -> &str {
        "kill -9"
    }

    fn header(&self, _spec: &JobSpec) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CommandRunner, Job, SystemRunner};

    #[test]
    fn no_directives() {
        let job = Job::new(SchedulerSystem::Local, JobSpec::default());
        assert_eq!(job.job_header(), "");
        assert!(job.job_script().starts_with("#!/usr/bin/env bash\n\n"));
        assert_eq!(LocalDriver.cancel_argv("12"), vec!["kill", "-9", "12"]);
    }

    #[tokio::test]
    async fn prelude_with_source_runs_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec {
            env_prelude: vec!["source /dev/null".to_string(), "MARK=ready".to_string()],
            command_prefix: "echo".to_string(),
            freva_args: vec!["$MARK".to_string()],
            ..JobSpec::default()
        };
        let job = Job::new(SchedulerSystem::Local, spec);
        let script = job.job_script();
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, &script).unwrap();

        let argv = LocalDriver.submit_argv(&path, &script);
        assert_eq!(argv[0], "bash");
        let out = SystemRunner.run(&argv, None).await.unwrap();
        assert_eq!(out.status, 0, "stderr: {}", out.stderr);
        assert_eq!(out.stdout.trim(), "ready");
        assert!(out.stderr.is_empty(), "stderr: {}", out.stderr);
    }
}
