use std::path::{Path, PathBuf};

use super::{hours_minutes, JobDriver, JobSpec, SchedulerSystem};

const UNITS_KEY: &str = "LSF_UNIT_FOR_LIMITS";
const DEFAULT_UNITS: &str = "kb";

/// IBM LSF. Scripts go to `bsub` on stdin.
#[derive(Debug, Clone)]
pub struct LsfDriver {
    units: String,
}

impl LsfDriver {
    /// Memory units from the site's `lsf.conf`.
    pub fn detect() -> Self {
        let candidates = ["LSF_ENVDIR", "LSF_CONFDIR"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(|dir| PathBuf::from(dir).join("lsf.conf"))
            .chain(std::iter::once(PathBuf::from("/etc/lsf.conf")));
        let units = candidates
            .filter_map(|path| units_from_conf(&path))
            .next()
            .unwrap_or_else(|| DEFAULT_UNITS.to_string());
        Self { units }
    }

    pub fn with_units(units: &str) -> Self {
        Self {
            units: units.to_lowercase(),
        }
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    fn format_memory(&self, n: u64) -> String {
        let power = match self.units.as_str() {
            "kb" => 1,
            "mb" => 2,
            "gb" => 3,
            "tb" => 4,
            "pb" => 5,
            "eb" => 6,
            "zb" => 7,
            _ => 1,
        };
        let value = (n as f64 / 1000f64.powi(power)).ceil() as u64;
        value.to_string()
    }
}

fn units_from_conf(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        (key.trim() == UNITS_KEY).then(|| value.trim().trim_matches('"').to_lowercase())
    })
}

impl JobDriver for LsfDriver {
    fn system(&self) -> SchedulerSystem {
        SchedulerSystem::Lsf
    }

    fn submit_command(&self) -> &str {
        "bsub"
    }

    fn cancel_command(&self) -> &str {
        "bkill"
    }

    fn job_id_regexp(&self) -> &str {
        r"<(?P<job_id>\d+)>"
    }

    fn header(&self, spec: &JobSpec) -> Vec<String> {
        let mut lines = vec![format!("#BSUB -J {}", spec.name)];
        if let Some(dir) = &spec.log_directory {
            lines.push(format!("#BSUB -e {}/{}-%J.err", dir.display(), spec.name));
            lines.push(format!("#BSUB -o {}/{}-%J.out", dir.display(), spec.name));
        }
        if let Some(queue) = &spec.queue {
            lines.push(format!("#BSUB -q {}", queue));
        }
        if let Some(project) = &spec.project {
            lines.push(format!("#BSUB -P {}", project));
        }
        lines.push(format!("#BSUB -n {}", spec.cores));
        if spec.cores > 1 {
            lines.push("#BSUB -R \"span[hosts=1]\"".to_string());
        }
        if let Some(memory) = spec.memory {
            lines.push(format!("#BSUB -M {}", self.format_memory(memory)));
        }
        if let Some(walltime) = &spec.walltime {
            lines.push(format!("#BSUB -W {}", hours_minutes(walltime)));
        }
        lines
    }

    fn submit_argv(&self, _path: &Path, _script: &str) -> Vec<String> {
        vec![self.submit_command().to_string()]
    }

    fn submit_stdin(&self, script: &str) -> Option<String> {
        Some(script.to_string())
    }
}
