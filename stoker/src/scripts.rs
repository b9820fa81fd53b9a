//! Well-known paths an image must provide to take part in a build, and the
//! mount points the pipeline wires into its containers.

use constcat::concat;

const BIN_DIR: &str = "/usr/bin/";

pub const PREPARE: &str = concat!(BIN_DIR, "prepare");
pub const RUN: &str = concat!(BIN_DIR, "run");
pub const SAVE_ARTIFACTS: &str = concat!(BIN_DIR, "save-artifacts");

/// Where the application source is injected.
pub const SRC_MOUNT: &str = "/usr/src";

/// Where artifacts from a prior build are made available.
pub const ARTIFACTS_MOUNT: &str = "/usr/artifacts";

/// Where the build image's `prepare` script leaves its output in an extended build.
pub const BUILD_OUTPUT_MOUNT: &str = "/usr/build";
