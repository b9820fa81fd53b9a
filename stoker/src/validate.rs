//! Checks that an image can take part in a build: no configured entrypoint, and the
//! lifecycle scripts its role requires present in the filesystem.

use std::fmt;

use log::{debug, info};

use crate::{container, docker, docker::DockerClient, scripts, Result};

/// One image to validate, with the lifecycle scripts its role in the build requires.
pub struct Requirement<'a> {
    image: &'a str,
    description: &'static str,
    scripts: Vec<&'static str>,
}

impl<'a> Requirement<'a> {
    /// The single image of a direct build, which both compiles and runs the source.
    pub fn direct(image: &'a str) -> Self {
        Self {
            image,
            description: "Runtime image",
            scripts: vec![scripts::PREPARE, scripts::RUN],
        }
    }

    /// The image the `validate` subcommand checks allows a full direct build, and
    /// incremental rebuilds when requested.
    pub fn target(image: &'a str, incremental: bool) -> Self {
        Self {
            image,
            description: "Target image",
            scripts: with_save_artifacts(vec![scripts::PREPARE, scripts::RUN], incremental),
        }
    }

    /// The compile side of an extended build.
    pub fn build(image: &'a str, incremental: bool) -> Self {
        Self {
            image,
            description: "Build image",
            scripts: with_save_artifacts(vec![scripts::PREPARE], incremental),
        }
    }

    /// The runtime side of an extended build, which only ever runs the output.
    pub fn runtime(image: &'a str) -> Self {
        Self {
            image,
            description: "Runtime image",
            scripts: vec![scripts::RUN],
        }
    }

    pub fn scripts(&self) -> &[&'static str] {
        &self.scripts
    }
}

fn with_save_artifacts(mut required: Vec<&'static str>, incremental: bool) -> Vec<&'static str> {
    if incremental {
        required.push(scripts::SAVE_ARTIFACTS);
    }
    required
}

#[derive(Debug)]
enum Cause {
    Entrypoint,
    MissingFile(&'static str),
}

#[derive(Debug)]
pub struct ValidationError {
    description: &'static str,
    image: String,
    cause: Cause,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{description} {image} failed validation: ",
            description = self.description,
            image = self.image
        )?;
        match self.cause {
            Cause::Entrypoint => {
                write!(f, "the image declares an entrypoint, which would prevent the build from invoking lifecycle scripts")
            }
            Cause::MissingFile(path) => write!(f, "required file {path} is missing"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates each requirement in turn. The first failure aborts the batch.
pub fn validate_all(client: &DockerClient, requirements: &[Requirement]) -> Result<()> {
    for requirement in requirements {
        validate_one(client, requirement)?;
        info!(
            "{description} {image} passes validation",
            description = requirement.description,
            image = requirement.image
        );
    }
    Ok(())
}

fn validate_one(client: &DockerClient, requirement: &Requirement) -> Result<()> {
    pull_if_absent(client, requirement.image)?;

    let inspect = client.inspect_image(requirement.image)?;
    if inspect
        .config
        .entrypoint
        .as_deref()
        .is_some_and(|entrypoint| !entrypoint.is_empty())
    {
        return Err(ValidationError {
            description: requirement.description,
            image: requirement.image.to_owned(),
            cause: Cause::Entrypoint,
        }
        .into());
    }

    debug!(
        "image {image} ({id}) declares no entrypoint",
        image = requirement.image,
        id = inspect.id
    );
    let probe = container::probe_container(client, requirement.image)?;
    for script in requirement.scripts() {
        if !file_exists(client, probe.id(), script)? {
            return Err(ValidationError {
                description: requirement.description,
                image: requirement.image.to_owned(),
                cause: Cause::MissingFile(script),
            }
            .into());
        }
        debug!(
            "image {image} contains {script}",
            image = requirement.image
        );
    }

    Ok(())
}

/// Existence is probed by attempting to copy the path out of the container: a NotFound
/// error means the file is absent, anything else propagates.
fn file_exists(client: &DockerClient, id: &str, path: &str) -> Result<bool, docker::Error> {
    match client.copy_from_container(id, path) {
        Ok(contents) => Ok(!contents.is_empty()),
        Err(error) if error.is_not_found() => Ok(false),
        Err(error) => Err(error),
    }
}

pub fn pull_if_absent(client: &DockerClient, image: &str) -> Result<(), docker::Error> {
    match client.images(image)?.first() {
        None => {
            info!("Image {image} not found in local registry, pulling");
            client.pull(image)?;
        }
        Some(summary) => debug!(
            "Image {image} is available locally ({id})",
            id = summary.id
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_requires_prepare_and_run() {
        let requirement = Requirement::direct("base:v1");
        assert_eq!(
            requirement.scripts(),
            ["/usr/bin/prepare", "/usr/bin/run"]
        );
    }

    #[test]
    fn test_target_adds_save_artifacts_when_incremental() {
        let requirement = Requirement::target("base:v1", true);
        assert_eq!(
            requirement.scripts(),
            ["/usr/bin/prepare", "/usr/bin/run", "/usr/bin/save-artifacts"]
        );
        let requirement = Requirement::target("base:v1", false);
        assert_eq!(
            requirement.scripts(),
            ["/usr/bin/prepare", "/usr/bin/run"]
        );
    }

    #[test]
    fn test_extended_roles_split_the_scripts() {
        assert_eq!(
            Requirement::build("builder:v1", false).scripts(),
            ["/usr/bin/prepare"]
        );
        assert_eq!(
            Requirement::build("builder:v1", true).scripts(),
            ["/usr/bin/prepare", "/usr/bin/save-artifacts"]
        );
        assert_eq!(
            Requirement::runtime("runtime:v1").scripts(),
            ["/usr/bin/run"]
        );
    }
}
