use super::{format_bytes_binary_ceil, JobDriver, JobSpec, SchedulerSystem};

/// Sun/Univa Grid Engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SgeDriver;

impl JobDriver for SgeDriver {
    fn system(&self) -> SchedulerSystem {
        SchedulerSystem::Sge
    }

    fn submit_command(&self) -> &str {
        "qsub"
    }

    fn cancel_command(&self) -> &str {
        "qdel"
    }

    fn header(&self, spec: &JobSpec) -> Vec<String> {
        let mut lines = vec![format!("#$ -N {}", spec.name)];
        if let Some(queue) = &spec.queue {
            lines.push(format!("#$ -q {}", queue));
        }
        if let Some(project) = &spec.project {
            lines.push(format!("#$ -P {}", project));
        }
        if let Some(walltime) = &spec.walltime {
            lines.push(format!("#$ -l h_rt={}", walltime));
        }
        if let Some(memory) = spec.memory {
            lines.push(format!("#$ -l h_vmem={}", format_bytes_binary_ceil(memory)));
        }
        if let Some(dir) = &spec.log_directory {
            lines.push(format!("#$ -e {}/", dir.display()));
            lines.push(format!("#$ -o {}/", dir.display()));
        }
        lines.push("#$ -cwd".to_string());
        lines.push("#$ -j y".to_string());
        lines
    }
}
