//! Synthesizes the declarative build instructions handed to the daemon's build
//! operation: a Dockerfile generated fresh for every build.

use std::{fmt, fs, io, path::Path};

use crate::{scripts, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    From(String),
    AddSource,
    AddArtifacts,
    Env(String, String),
    Prepare,
    Run,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::From(base) => write!(f, "FROM {base}"),
            Step::AddSource => write!(f, "ADD ./src {mount}/", mount = scripts::SRC_MOUNT),
            Step::AddArtifacts => {
                write!(f, "ADD ./artifacts {mount}/", mount = scripts::ARTIFACTS_MOUNT)
            }
            Step::Env(name, value) => write!(f, "ENV {name} {value}"),
            Step::Prepare => write!(f, "RUN {script}", script = scripts::PREPARE),
            Step::Run => write!(f, "CMD {script}", script = scripts::RUN),
        }
    }
}

#[derive(Debug)]
pub struct ImageDescriptor {
    steps: Vec<Step>,
}

impl ImageDescriptor {
    /// Base image, add-source, add-artifacts iff artifacts were extracted, one env step
    /// per entry in input order, then the mandatory prepare and run steps.
    pub fn new(base: &str, has_artifacts: bool, envs: &[String]) -> Result<Self> {
        Self::assemble(base, has_artifacts, envs, true)
    }

    /// Descriptor for the runtime pass of an extended build. The compile already ran in
    /// the build container, so no prepare step is emitted.
    pub fn for_prepared_source(base: &str, has_artifacts: bool, envs: &[String]) -> Result<Self> {
        Self::assemble(base, has_artifacts, envs, false)
    }

    fn assemble(base: &str, has_artifacts: bool, envs: &[String], prepare: bool) -> Result<Self> {
        let mut steps = vec![Step::From(base.to_owned()), Step::AddSource];
        if has_artifacts {
            steps.push(Step::AddArtifacts);
        }
        for entry in envs {
            // Values may themselves contain `=`; only the first one splits.
            let (name, value) = entry.split_once('=').ok_or_else(|| {
                format!("malformed environment entry {entry:?}, expected NAME=VALUE")
            })?;
            steps.push(Step::Env(name.to_owned(), value.to_owned()));
        }
        if prepare {
            steps.push(Step::Prepare);
        }
        steps.push(Step::Run);
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Renders the descriptor into `context_dir/Dockerfile`.
    pub fn write_to(&self, context_dir: &Path) -> io::Result<()> {
        fs::write(context_dir.join("Dockerfile"), self.to_string())
    }
}

impl fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|entry| entry.to_string()).collect()
    }

    #[test]
    fn test_minimal_descriptor_has_four_steps() {
        let descriptor = ImageDescriptor::new("base:v1", false, &[]).unwrap();
        assert_eq!(
            descriptor.steps(),
            [
                Step::From("base:v1".to_owned()),
                Step::AddSource,
                Step::Prepare,
                Step::Run,
            ]
        );
    }

    #[test]
    fn test_full_descriptor_order() {
        let descriptor =
            ImageDescriptor::new("base:v1", true, &envs(&["A=1", "B=2"])).unwrap();
        assert_eq!(
            descriptor.steps(),
            [
                Step::From("base:v1".to_owned()),
                Step::AddSource,
                Step::AddArtifacts,
                Step::Env("A".to_owned(), "1".to_owned()),
                Step::Env("B".to_owned(), "2".to_owned()),
                Step::Prepare,
                Step::Run,
            ]
        );
    }

    #[test]
    fn test_env_splits_on_first_equals_only() {
        let descriptor =
            ImageDescriptor::new("base:v1", false, &envs(&["OPTS=a=b=c"])).unwrap();
        assert!(descriptor
            .steps()
            .contains(&Step::Env("OPTS".to_owned(), "a=b=c".to_owned())));
    }

    #[test]
    fn test_duplicate_env_entries_are_preserved() {
        let descriptor =
            ImageDescriptor::new("base:v1", false, &envs(&["A=1", "A=2"])).unwrap();
        let env_steps: Vec<_> = descriptor
            .steps()
            .iter()
            .filter(|step| matches!(step, Step::Env(..)))
            .collect();
        assert_eq!(env_steps.len(), 2);
    }

    #[test]
    fn test_malformed_env_entry_fails_fast() {
        let result = ImageDescriptor::new("base:v1", false, &envs(&["NOVALUE"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("NOVALUE"));
    }

    #[test]
    fn test_rendering() {
        let descriptor =
            ImageDescriptor::new("base:v1", true, &envs(&["PORT=8080"])).unwrap();
        assert_eq!(
            descriptor.to_string(),
            "FROM base:v1\n\
             ADD ./src /usr/src/\n\
             ADD ./artifacts /usr/artifacts/\n\
             ENV PORT 8080\n\
             RUN /usr/bin/prepare\n\
             CMD /usr/bin/run\n"
        );
    }

    #[test]
    fn test_prepared_source_descriptor_skips_prepare() {
        let descriptor =
            ImageDescriptor::for_prepared_source("runtime:v1", false, &[]).unwrap();
        assert_eq!(
            descriptor.steps(),
            [
                Step::From("runtime:v1".to_owned()),
                Step::AddSource,
                Step::Run,
            ]
        );
    }
}
