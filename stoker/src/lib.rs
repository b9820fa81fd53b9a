pub(crate) mod artifacts;
pub(crate) mod build;
pub(crate) mod container;
pub(crate) mod context;
pub(crate) mod descriptor;
pub(crate) mod docker;
pub(crate) mod process;
pub(crate) mod scripts;
pub(crate) mod source;
pub(crate) mod temp_path;
pub(crate) mod validate;

pub mod cli;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
