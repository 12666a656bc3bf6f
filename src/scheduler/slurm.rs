use super::{format_bytes_binary_ceil, JobDriver, JobSpec, SchedulerSystem};

#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmDriver;

impl JobDriver for SlurmDriver {
    fn system(&self) -> SchedulerSystem {
        SchedulerSystem::Slurm
    }

    fn submit_command(&self) -> &str {
        "sbatch"
    }

    fn cancel_command(&self) -> &str {
        "scancel"
    }

    fn header(&self, spec: &JobSpec) -> Vec<String> {
        let mut lines = vec![format!("#SBATCH -J {}", spec.name)];
        if let Some(dir) = &spec.log_directory {
            lines.push(format!("#SBATCH -e {}/{}-%J.err", dir.display(), spec.name));
            lines.push(format!("#SBATCH -o {}/{}-%J.out", dir.display(), spec.name));
        }
        if let Some(queue) = &spec.queue {
            lines.push(format!("#SBATCH -p {}", queue));
        }
        if let Some(project) = &spec.project {
            lines.push(format!("#SBATCH -A {}", project));
        }
        lines.push("#SBATCH -n 1".to_string());
        lines.push(format!("#SBATCH --cpus-per-task={}", spec.cores));
        if let Some(memory) = spec.memory {
            lines.push(format!("#SBATCH --mem={}", format_bytes_binary_ceil(memory)));
        }
        if let Some(walltime) = &spec.walltime {
            lines.push(format!("#SBATCH -t {}", walltime));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{parse_bytes, Job};
    use std::path::PathBuf;

    #[test]
    fn worker_header() {
        let spec = JobSpec {
            walltime: Some("00:02:00".to_string()),
            cores: 8,
            memory: Some(parse_bytes("28GB").unwrap()),
            ..JobSpec::default()
        };
        let header = Job::new(SchedulerSystem::Slurm, spec).job_header();
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#SBATCH -J worker",
                "#SBATCH -n 1",
                "#SBATCH --cpus-per-task=8",
                "#SBATCH --mem=27G",
                "#SBATCH -t 00:02:00",
            ]
        );
        assert!(!header.contains("-p "));
        assert!(!header.contains("-A "));
    }

    #[test]
    fn queue_project_and_logs() {
        let spec = JobSpec {
            queue: Some("compute".to_string()),
            project: Some("bb1234".to_string()),
            log_directory: Some(PathBuf::from("/scratch/logs")),
            ..JobSpec::default()
        };
        let header = SlurmDriver.header(&spec).join("\n");
        assert!(header.contains("#SBATCH -p compute"));
        assert!(header.contains("#SBATCH -A bb1234"));
        assert!(header.contains("#SBATCH -o /scratch/logs/worker-%J.out"));
    }

    #[test]
    fn job_id_from_sbatch() {
        assert_eq!(
            SlurmDriver.parse_job_id("Submitted batch job 4711\n").unwrap(),
            "4711"
        );
        assert!(SlurmDriver.parse_job_id("sbatch: error").is_err());
    }
}
