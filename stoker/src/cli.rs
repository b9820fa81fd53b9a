use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use log::debug;

use crate::{
    build, docker,
    docker::DockerClient,
    validate::{self, Requirement},
    Result,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Url of the container daemon. Defaults to $DOCKER_HOST, or the local daemon on
    /// the default port.
    #[arg(long = "url", global = true)]
    url: Option<String>,

    /// Timeout in seconds applied to every daemon call.
    #[arg(long = "timeout", global = true, default_value_t = 120)]
    timeout: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a runnable image by injecting application source into a base image
    #[command(arg_required_else_help = true)]
    Build(BuildArgs),

    /// Check that an image can take part in a build
    #[command(arg_required_else_help = true)]
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Directory or repository url containing the application source.
    source: String,

    /// Image the source is injected into. Pulled when not available locally.
    image: String,

    /// Tag for the built image.
    tag: String,

    /// Compile the source in this image and transplant its output into the runtime
    /// image.
    #[arg(long = "build-image")]
    build_image: Option<String>,

    /// Do not reuse artifacts from an earlier build of the same tag.
    #[arg(long = "clean", default_value_t)]
    clean: bool,

    /// Perform the compile step as the specified user.
    #[arg(long = "user")]
    user: Option<String>,

    /// Environment variable for the built image, NAME=VALUE. May be repeated.
    #[arg(long = "env", short = 'e')]
    envs: Vec<String>,

    /// Assemble the build context in this directory and leave it behind for
    /// inspection instead of using a temporary one.
    #[arg(long = "dir")]
    dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Image to validate.
    image: String,

    /// Also validate this image as the compile side of an extended build.
    #[arg(long = "build-image")]
    build_image: Option<String>,

    /// Additionally require support for incremental builds.
    #[arg(long = "incremental", default_value_t)]
    incremental: bool,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let url = docker::resolve_daemon_url(self.url.as_deref());
        let client = DockerClient::new(url, Duration::from_secs(self.timeout))?;

        let version = client.version().map_err(|error| {
            format!(
                "could not connect to container daemon at {url}: {error}",
                url = client.base_url()
            )
        })?;
        debug!(
            "connected to daemon version {version} (kernel {kernel})",
            version = version.version,
            kernel = version.kernel_version
        );

        match self.command {
            Commands::Build(args) => {
                let request = build::BuildRequest {
                    source: args.source,
                    image: args.image,
                    tag: args.tag,
                    build_image: args.build_image,
                    clean: args.clean,
                    envs: args.envs,
                    user: args.user,
                    working_dir: args.dir,
                };
                build::run(&client, &request)
            }
            Commands::Validate(args) => {
                let mut requirements = vec![Requirement::target(&args.image, args.incremental)];
                if let Some(build_image) = &args.build_image {
                    requirements.push(Requirement::build(build_image, args.incremental));
                }
                validate::validate_all(&client, &requirements)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_parsing() {
        let cli = Cli::parse_from([
            "stoker",
            "build",
            "/srv/app",
            "base:v1",
            "app:v1",
            "--build-image",
            "builder:v1",
            "--clean",
            "-e",
            "A=1",
            "--env",
            "B=2",
            "--timeout",
            "30",
        ]);
        assert_eq!(cli.timeout, 30);
        let Commands::Build(args) = cli.command else {
            panic!("expected a build command");
        };
        assert_eq!(args.source, "/srv/app");
        assert_eq!(args.image, "base:v1");
        assert_eq!(args.tag, "app:v1");
        assert_eq!(args.build_image.as_deref(), Some("builder:v1"));
        assert!(args.clean);
        assert_eq!(args.envs, ["A=1", "B=2"]);
        assert_eq!(args.user, None);
        assert_eq!(args.dir, None);
    }

    #[test]
    fn test_validate_command_parsing() {
        let cli = Cli::parse_from(["stoker", "validate", "base:v1", "--incremental"]);
        assert_eq!(cli.timeout, 120);
        let Commands::Validate(args) = cli.command else {
            panic!("expected a validate command");
        };
        assert_eq!(args.image, "base:v1");
        assert!(args.incremental);
        assert_eq!(args.build_image, None);
    }
}
