//! Incremental builds mine the image left behind by a prior build of the same tag for
//! whatever its `save-artifacts` script chooses to preserve.

use std::path::Path;

use log::{debug, warn};

use crate::{
    container::{self, RunSpec},
    docker::DockerClient,
    scripts, Result,
};

/// True iff an image for the prior build tag is present after an attempted pull. A pull
/// failure means the image does not exist; the build degrades to a clean one instead of
/// aborting.
pub fn prior_build_exists(client: &DockerClient, tag: &str) -> bool {
    match client.images(tag) {
        Ok(images) if !images.is_empty() => true,
        Ok(_) => match client.pull(tag) {
            Ok(()) => client
                .images(tag)
                .map(|images| !images.is_empty())
                .unwrap_or(false),
            Err(error) => {
                debug!("no prior build image {tag}: {error}");
                false
            }
        },
        Err(error) => {
            debug!("could not list images for {tag}: {error}");
            false
        }
    }
}

/// Runs the prior image's `save-artifacts` script with `target_dir` bound to the
/// artifacts mount. A non-zero exit is reported as a warning and the build continues
/// with whatever the script managed to write.
pub fn save_artifacts(client: &DockerClient, image: &str, target_dir: &Path) -> Result<()> {
    debug!(
        "saving build artifacts from {image} to {target}",
        target = target_dir.display()
    );
    let command = [scripts::SAVE_ARTIFACTS.to_owned()];
    let completion = container::run_to_completion(
        client,
        RunSpec {
            image,
            command: Some(&command),
            volumes: &[scripts::ARTIFACTS_MOUNT],
            binds: &[(target_dir, scripts::ARTIFACTS_MOUNT)],
            user: None,
        },
    )?;
    if completion.exit_code != 0 {
        warn!(
            "save-artifacts in {image} exited with code {code}, continuing with whatever was saved",
            code = completion.exit_code
        );
    }
    Ok(())
}
