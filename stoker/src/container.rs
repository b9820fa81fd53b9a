//! Short-lived containers created for a single purpose: probing an image, extracting
//! artifacts, or compiling source. Whatever happens, the container is removed before
//! control returns to the pipeline.

use std::path::Path;

use log::{debug, warn};

use crate::docker::{self, DockerClient};

/// Removes the container when dropped, so every exit path of a runner cleans up. A
/// removal failure is logged, never propagated; the primary failure stays authoritative.
pub struct ContainerGuard<'a> {
    client: &'a DockerClient,
    id: String,
}

impl ContainerGuard<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.client.remove_container(&self.id) {
            warn!("failed to remove container {id}: {error}", id = self.id);
        }
    }
}

pub struct RunSpec<'a> {
    pub image: &'a str,
    pub command: Option<&'a [String]>,
    /// Named volumes declared at creation.
    pub volumes: &'a [&'a str],
    /// Host directory to in-container path bind mounts supplied at start.
    pub binds: &'a [(&'a Path, &'a str)],
    pub user: Option<&'a str>,
}

pub struct Completion {
    pub exit_code: i64,
}

/// Creates, starts, and waits on a container, then hands back the removal guard so the
/// caller can act on the container (commit it) before it disappears.
pub fn run_keeping<'a>(
    client: &'a DockerClient,
    spec: RunSpec<'_>,
) -> Result<(ContainerGuard<'a>, Completion), docker::Error> {
    let id = client.create_container(spec.image, spec.command, spec.volumes, spec.user)?;
    let guard = ContainerGuard { client, id };

    let binds: Vec<String> = spec
        .binds
        .iter()
        .map(|(host, target)| format!("{host}:{target}", host = host.display()))
        .collect();
    client.start_container(guard.id(), &binds)?;
    let exit_code = client.wait_container(guard.id())?;

    match client.logs(guard.id()) {
        Ok(logs) if !logs.trim().is_empty() => {
            debug!("container {id} output:\n{logs}", id = guard.id());
        }
        Ok(_) => {}
        Err(error) => debug!(
            "could not collect logs from container {id}: {error}",
            id = guard.id()
        ),
    }

    Ok((guard, Completion { exit_code }))
}

/// Runs a container to completion and removes it.
pub fn run_to_completion(
    client: &DockerClient,
    spec: RunSpec<'_>,
) -> Result<Completion, docker::Error> {
    let (guard, completion) = run_keeping(client, spec)?;
    drop(guard);
    Ok(completion)
}

/// Starts a no-op container from the image and waits for it to exit, returning the
/// guard so the caller can probe the container's filesystem before removal.
pub fn probe_container<'a>(
    client: &'a DockerClient,
    image: &str,
) -> Result<ContainerGuard<'a>, docker::Error> {
    let command = [String::from("/bin/true")];
    let id = client.create_container(image, Some(&command), &[], None)?;
    let guard = ContainerGuard { client, id };
    client.start_container(guard.id(), &[])?;
    client.wait_container(guard.id())?;
    Ok(guard)
}
