use std::path::Path;

use super::{JobDriver, JobSpec, SchedulerSystem};

const DIRECTIVE: &str = "#OAR";

/// OAR. `oarsub` takes its options on the command line and the script
/// body inline, so the `#OAR` lines are lifted out of the script.
#[derive(Debug, Clone, Copy, Default)]
pub struct OarDriver;

/// Split like a POSIX shell word list: whitespace separated, single and
/// double quotes group, backslash escapes outside single quotes.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"'), '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

impl JobDriver for OarDriver {
    fn system(&self) -> SchedulerSystem {
        SchedulerSystem::Oar
    }

    fn submit_command(&self) -> &str {
        "oarsub"
    }

    fn cancel_command(&self) -> &str {
        "oardel"
    }

    fn job_id_regexp(&self) -> &str {
        r"OAR_JOB_ID=(?P<job_id>\d+)"
    }

    fn header(&self, spec: &JobSpec) -> Vec<String> {
        let mut lines = vec![format!("{} -n {}", DIRECTIVE, spec.name)];
        if let Some(queue) = &spec.queue {
            lines.push(format!("{} -q {}", DIRECTIVE, queue));
        }
        if let Some(project) = &spec.project {
            lines.push(format!("{} --project {}", DIRECTIVE, project));
        }
        let mut resources = format!("/nodes=1/core={}", spec.cores);
        if let Some(walltime) = &spec.walltime {
            resources.push_str(&format!(",walltime={}", walltime));
        }
        lines.push(format!("{} -l {}", DIRECTIVE, resources));
        if let Some(dir) = &spec.log_directory {
            lines.push(format!("{} -O {}/{}-%jobid%.out", DIRECTIVE, dir.display(), spec.name));
            lines.push(format!("{} -E {}/{}-%jobid%.err", DIRECTIVE, dir.display(), spec.name));
        }
        lines
    }

    fn submit_argv(&self, _path: &Path, script: &str) -> Vec<String> {
        let (directives, body): (Vec<&str>, Vec<&str>) = script
            .lines()
            .partition(|line| line.trim_start().starts_with(DIRECTIVE));
        let mut argv = vec![self.submit_command().to_string()];
        for line in directives {
            let options = line.trim_start().trim_start_matches(DIRECTIVE);
            argv.extend(split_words(options));
        }
        argv.push(body.join("\n"));
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_splitting() {
        assert_eq!(split_words("-n worker  -l /nodes=1"), vec!["-n", "worker", "-l", "/nodes=1"]);
        assert_eq!(
            split_words(r#"-p "host = 'a b'" -t 'it''s' a\ b"#),
            vec!["-p", "host = 'a b'", "-t", "its", "a b"]
        );
        assert_eq!(split_words(r#"-x "" end"#), vec!["-x", "", "end"]);
        assert!(split_words("   ").is_empty());
    }

    #[test]
    fn resources_without_memory() {
        let spec = JobSpec {
            cores: 2,
            memory: Some(8_000_000_000),
            walltime: Some("00:10:00".to_string()),
            ..JobSpec::default()
        };
        let header = OarDriver.header(&spec);
        assert_eq!(header, vec!["#OAR -n worker", "#OAR -l /nodes=1/core=2,walltime=00:10:00"]);
    }

    #[test]
    fn directives_move_to_argv() {
        let script = "#!/usr/bin/env bash\n\n#OAR -n worker\n#OAR -l /nodes=1/core=2\n#OAR -p \"gpu = 'YES'\"\nsource env\n\nfreva plugin run x\n";
        let argv = OarDriver.submit_argv(Path::new("/tmp/x.sh"), script);
        assert_eq!(
            &argv[..7],
            &["oarsub", "-n", "worker", "-l", "/nodes=1/core=2", "-p", "gpu = 'YES'"]
        );
        let body = argv.last().unwrap();
        assert!(body.contains("freva plugin run x"));
        assert!(!body.contains("#OAR"));
    }

    #[test]
    fn job_id_from_oarsub() {
        let out = "[ADMISSION RULE] Set default walltime to 7200.\nOAR_JOB_ID=20391\n";
        assert_eq!(OarDriver.parse_job_id(out).unwrap(), "20391");
        assert!(OarDriver.parse_job_id("Generate a job key... 7200").is_err());
    }
}
