use super::{JobDriver, JobSpec, SchedulerSystem};

/// PBS/Torque, and Moab which shares its `#PBS` directives.
#[derive(Debug, Clone, Copy)]
pub struct PbsDriver {
    moab: bool,
}

impl PbsDriver {
    pub fn pbs() -> Self {
        Self { moab: false }
    }

    pub fn moab() -> Self {
        Self { moab: true }
    }
}

/// PBS memory strings: whole units once a value reaches ten of them.
fn pbs_format_bytes_ceil(n: u64) -> String {
    const KIB: u64 = 1024;
    let ceil_div = |unit: u64| n.div_ceil(unit);
    if n >= 10 * KIB.pow(3) {
        format!("{}GB", ceil_div(KIB.pow(3)))
    } else if n >= 10 * KIB.pow(2) {
        format!("{}MB", ceil_div(KIB.pow(2)))
    } else if n >= 10 * KIB {
        format!("{}kB", ceil_div(KIB))
    } else {
        format!("{}B", n)
    }
}

impl JobDriver for PbsDriver {
    fn system(&self) -> SchedulerSystem {
        if self.moab {
            SchedulerSystem::Moab
        } else {
            SchedulerSystem::Pbs
        }
    }

    fn submit_command(&self) -> &str {
        if self.moab {
            "msub"
        } else {
            "qsub"
        }
    }

    fn cancel_command(&self) -> &str {
        if self.moab {
            "canceljob"
        } else {
            "qdel"
        }
    }

    fn header(&self, spec: &JobSpec) -> Vec<String> {
        let mut lines = vec![format!("#PBS -N {}", spec.name)];
        if let Some(queue) = &spec.queue {
            lines.push(format!("#PBS -q {}", queue));
        }
        if let Some(project) = &spec.project {
            lines.push(format!("#PBS -A {}", project));
        }
        let mut select = format!("select=1:ncpus={}", spec.cores);
        if let Some(memory) = spec.memory {
            select.push_str(&format!(":mem={}", pbs_format_bytes_ceil(memory)));
        }
        lines.push(format!("#PBS -l {}", select));
        if let Some(walltime) = &spec.walltime {
            lines.push(format!("#PBS -l walltime={}", walltime));
        }
        if let Some(dir) = &spec.log_directory {
            lines.push(format!("#PBS -o {}/", dir.display()));
        }
        // stderr goes into the -o file
        lines.push("#PBS -j oe".to_string());
        lines
    }
}
