//! The build pipeline: validates the images involved, acquires source, optionally
//! extracts artifacts from a prior build, and drives the daemon-side build that yields
//! the tagged result.

use std::{fmt, fs, path::PathBuf};

use log::{debug, info};

use crate::{
    artifacts,
    container::{self, RunSpec},
    context::BuildContext,
    descriptor::ImageDescriptor,
    docker::DockerClient,
    scripts, source,
    validate::{self, Requirement},
    Result,
};

/// Validated parameters for one pipeline run. Immutable after CLI parsing.
#[derive(Debug)]
pub struct BuildRequest {
    pub source: String,
    /// The image the built application runs in. Doubles as the build image for direct
    /// builds.
    pub image: String,
    pub tag: String,
    pub build_image: Option<String>,
    pub clean: bool,
    pub envs: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<PathBuf>,
}

/// How the pipeline wires its sub-steps. Direct builds compile and run in one image;
/// extended builds compile in a dedicated build image and transplant the output into
/// the runtime image.
#[derive(Debug, PartialEq, Eq)]
enum Strategy<'a> {
    Direct,
    Extended { build_image: &'a str },
}

impl BuildRequest {
    fn strategy(&self) -> Strategy<'_> {
        match self.build_image.as_deref() {
            Some(build_image) => Strategy::Extended { build_image },
            None => Strategy::Direct,
        }
    }

    /// The tag a prior run of this request would have left behind, which incremental
    /// builds mine for artifacts.
    fn prior_build_tag(&self) -> String {
        match self.strategy() {
            Strategy::Direct => self.tag.clone(),
            Strategy::Extended { .. } => build_stage_tag(&self.tag),
        }
    }
}

/// The tag the committed build container receives in an extended build, so a later
/// incremental run can extract artifacts from it.
fn build_stage_tag(tag: &str) -> String {
    format!("{tag}-build")
}

/// The daemon accepted and ran the build, but produced no image.
#[derive(Debug)]
pub struct BuildFailure {
    stage: &'static str,
    image: String,
    detail: String,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{stage} failed for {image}: {detail}",
            stage = self.stage,
            image = self.image,
            detail = self.detail
        )
    }
}

impl std::error::Error for BuildFailure {}

pub fn run(client: &DockerClient, request: &BuildRequest) -> Result<()> {
    // Validation happens before any container or filesystem work, so a failure here
    // leaves nothing to clean up.
    let requirements = match request.strategy() {
        Strategy::Direct => vec![Requirement::direct(&request.image)],
        Strategy::Extended { build_image } => vec![
            Requirement::build(build_image, false),
            Requirement::runtime(&request.image),
        ],
    };
    validate::validate_all(client, &requirements)?;

    let context = BuildContext::create(request.working_dir.as_deref())?;

    source::fetch(&request.source, &context.src_dir())?;

    let prior_tag = request.prior_build_tag();
    let incremental = should_attempt_incremental(client, request, &prior_tag);
    if incremental {
        info!("Existing image {prior_tag} detected, performing incremental build");
        fs::create_dir(context.artifacts_dir())?;
        artifacts::save_artifacts(client, &prior_tag, &context.artifacts_dir())?;
    } else {
        info!("Performing clean build of {tag}", tag = request.tag);
    }

    let built = match request.strategy() {
        Strategy::Direct => direct_build(client, request, &context, incremental)?,
        Strategy::Extended { build_image } => {
            extended_build(client, request, build_image, &context, incremental)?
        }
    };
    info!("Built image {built}");
    Ok(())
}

/// A clean build never consults the daemon; otherwise an incremental build is attempted
/// exactly when the prior-build image can be found.
fn should_attempt_incremental(
    client: &DockerClient,
    request: &BuildRequest,
    prior_tag: &str,
) -> bool {
    !request.clean && artifacts::prior_build_exists(client, prior_tag)
}

fn direct_build(
    client: &DockerClient,
    request: &BuildRequest,
    context: &BuildContext,
    incremental: bool,
) -> Result<String> {
    let descriptor = ImageDescriptor::new(&request.image, incremental, &request.envs)?;
    execute_daemon_build(client, context, &descriptor, &request.tag)
}

fn extended_build(
    client: &DockerClient,
    request: &BuildRequest,
    build_image: &str,
    context: &BuildContext,
    incremental: bool,
) -> Result<String> {
    // The compiled tree is bind-mounted straight onto the runtime context's src
    // directory, where the second daemon-build pass reads it.
    let runtime_context = context.create_nested("runtime")?;
    fs::create_dir(runtime_context.src_dir())?;

    let src_dir = context.src_dir();
    let output_dir = runtime_context.src_dir();
    let artifacts_dir = context.artifacts_dir();

    let command = [scripts::PREPARE.to_owned()];
    let mut volumes = vec![scripts::SRC_MOUNT, scripts::BUILD_OUTPUT_MOUNT];
    let mut binds: Vec<(&std::path::Path, &str)> = vec![
        (src_dir.as_path(), scripts::SRC_MOUNT),
        (output_dir.as_path(), scripts::BUILD_OUTPUT_MOUNT),
    ];
    if incremental {
        volumes.push(scripts::ARTIFACTS_MOUNT);
        binds.push((artifacts_dir.as_path(), scripts::ARTIFACTS_MOUNT));
    }

    info!("Compiling source in build image {build_image}");
    let (guard, completion) = container::run_keeping(
        client,
        RunSpec {
            image: build_image,
            command: Some(&command),
            volumes: &volumes,
            binds: &binds,
            user: request.user.as_deref(),
        },
    )?;
    if completion.exit_code != 0 {
        return Err(BuildFailure {
            stage: "compile step",
            image: build_image.to_owned(),
            detail: format!(
                "prepare exited with code {code}",
                code = completion.exit_code
            ),
        }
        .into());
    }

    // Commit before the guard removes the container, so a future incremental build can
    // run save-artifacts against the compile state.
    let stage_tag = build_stage_tag(&request.tag);
    let image_id = client.commit_container(guard.id())?;
    client.tag_image(&image_id, &stage_tag)?;
    drop(guard);
    info!("Committed build container as {stage_tag}");

    let descriptor = ImageDescriptor::for_prepared_source(&request.image, false, &request.envs)?;
    execute_daemon_build(client, &runtime_context, &descriptor, &request.tag)
}

fn execute_daemon_build(
    client: &DockerClient,
    context: &BuildContext,
    descriptor: &ImageDescriptor,
    tag: &str,
) -> Result<String> {
    descriptor.write_to(context.dir())?;
    debug!(
        "building {tag} from context {dir}",
        dir = context.dir().display()
    );
    let (image_id, logs) = client.build_image(context.tar_bytes()?, tag)?;
    debug!("build logs:\n{logs}");
    match image_id {
        Some(id) => {
            debug!("daemon produced image {id}");
            Ok(tag.to_owned())
        }
        None => Err(BuildFailure {
            stage: "daemon build",
            image: tag.to_owned(),
            detail: last_log_line(&logs),
        }
        .into()),
    }
}

fn last_log_line(logs: &str) -> String {
    logs.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no build output")
        .trim()
        .to_owned()
}
