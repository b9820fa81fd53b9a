//! Minimal blocking client for the container daemon's remote HTTP API.
//!
//! One client is constructed per invocation and passed by reference into every
//! component that talks to the daemon.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:2375";

/// Resolves the daemon url from the `--url` flag, falling back to `DOCKER_HOST` and
/// finally the local daemon on the default port.
pub fn resolve_daemon_url(flag: Option<&str>) -> String {
    let configured = flag
        .map(str::to_owned)
        .or_else(|| std::env::var(DOCKER_HOST_ENV).ok())
        .unwrap_or_default();
    normalize_daemon_url(&configured)
}

/// The daemon speaks plain HTTP on a `tcp://` url, and an empty host means the
/// loopback daemon on the default port.
pub fn normalize_daemon_url(url: &str) -> String {
    let url = url.trim();
    let url = match url.strip_prefix("tcp://") {
        Some(rest) => format!("http://{rest}"),
        None if url.is_empty() => String::from("http://"),
        None if !url.contains("://") => format!("http://{url}"),
        None => url.to_owned(),
    };
    let (scheme, host) = url.split_once("://").unwrap_or(("http", ""));
    if host.is_empty() {
        return DEFAULT_DAEMON_URL.to_owned();
    }
    format!("{scheme}://{host}", host = host.trim_end_matches('/'))
}

#[derive(Debug)]
pub enum ErrorKind {
    /// The daemon does not know the requested object. Expected during file-existence
    /// probing; exceptional everywhere else.
    NotFound,
    Api { status: u16, message: String },
    Transport(reqwest::Error),
}

#[derive(Debug)]
pub struct Error {
    op: &'static str,
    kind: ErrorKind,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon call `{op}` failed: ", op = self.op)?;
        match &self.kind {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Api { status, message } => {
                write!(f, "status {status}: {message}", message = message.trim())
            }
            ErrorKind::Transport(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "KernelVersion", default)]
    pub kernel_version: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Config", default)]
    pub config: ImageConfig,
}

#[derive(Deserialize)]
struct ContainerCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct WaitResponse {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// One line of the JSON stream emitted by the `pull` and `build` endpoints.
#[derive(Default, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct CreateContainerBody<'a> {
    #[serde(rename = "Image")]
    image: &'a str,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    cmd: Option<&'a [String]>,
    #[serde(rename = "Volumes")]
    volumes: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Serialize)]
struct StartContainerBody<'a> {
    #[serde(rename = "Binds")]
    binds: &'a [String],
}

#[derive(Serialize)]
struct CopyFromContainerBody<'a> {
    #[serde(rename = "Resource")]
    resource: &'a str,
}

pub struct DockerClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl DockerClient {
    pub fn new(base_url: String, timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{base}{path}", base = self.base_url)
    }

    fn send(
        op: &'static str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let response = request.send().map_err(|error| Error {
            op,
            kind: ErrorKind::Transport(error),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error {
                op,
                kind: ErrorKind::NotFound,
            });
        }
        let message = response.text().unwrap_or_default();
        Err(Error {
            op,
            kind: ErrorKind::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        op: &'static str,
        response: reqwest::blocking::Response,
    ) -> Result<T> {
        response.json().map_err(|error| Error {
            op,
            kind: ErrorKind::Transport(error),
        })
    }

    fn read_text(op: &'static str, response: reqwest::blocking::Response) -> Result<String> {
        response.text().map_err(|error| Error {
            op,
            kind: ErrorKind::Transport(error),
        })
    }

    fn read_bytes(op: &'static str, response: reqwest::blocking::Response) -> Result<Vec<u8>> {
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|error| Error {
                op,
                kind: ErrorKind::Transport(error),
            })
    }

    pub fn version(&self) -> Result<VersionInfo> {
        const OP: &str = "version";
        let response = Self::send(OP, self.http.get(self.url("/version")))?;
        Self::read_json(OP, response)
    }

    pub fn images(&self, filter: &str) -> Result<Vec<ImageSummary>> {
        const OP: &str = "list images";
        let request = self
            .http
            .get(self.url("/images/json"))
            .query(&[("filter", filter)]);
        Self::read_json(OP, Self::send(OP, request)?)
    }

    pub fn pull(&self, image: &str) -> Result<()> {
        const OP: &str = "pull image";
        let request = self
            .http
            .post(self.url("/images/create"))
            .query(&[("fromImage", image)]);
        let text = Self::read_text(OP, Self::send(OP, request)?)?;
        // The endpoint reports failures inside the progress stream, not via the status code.
        if let Some(message) = stream_error(&text) {
            return Err(Error {
                op: OP,
                kind: ErrorKind::Api {
                    status: 200,
                    message,
                },
            });
        }
        Ok(())
    }

    #[allow(dead_code)] // no subcommand pushes yet
    pub fn push(&self, image: &str) -> Result<()> {
        const OP: &str = "push image";
        let request = self
            .http
            .post(self.url(&format!("/images/{image}/push")))
            .header("X-Registry-Auth", "");
        let text = Self::read_text(OP, Self::send(OP, request)?)?;
        if let Some(message) = stream_error(&text) {
            return Err(Error {
                op: OP,
                kind: ErrorKind::Api {
                    status: 200,
                    message,
                },
            });
        }
        Ok(())
    }

    pub fn inspect_image(&self, image: &str) -> Result<ImageInspect> {
        const OP: &str = "inspect image";
        let request = self.http.get(self.url(&format!("/images/{image}/json")));
        Self::read_json(OP, Self::send(OP, request)?)
    }

    pub fn create_container(
        &self,
        image: &str,
        cmd: Option<&[String]>,
        volumes: &[&str],
        user: Option<&str>,
    ) -> Result<String> {
        const OP: &str = "create container";
        let mut volume_map = serde_json::Map::new();
        for volume in volumes {
            volume_map.insert((*volume).to_owned(), serde_json::json!({}));
        }
        let body = CreateContainerBody {
            image,
            cmd,
            volumes: volume_map,
            user,
        };
        let request = self.http.post(self.url("/containers/create")).json(&body);
        let created: ContainerCreated = Self::read_json(OP, Self::send(OP, request)?)?;
        Ok(created.id)
    }

    pub fn start_container(&self, id: &str, binds: &[String]) -> Result<()> {
        const OP: &str = "start container";
        let body = StartContainerBody { binds };
        let request = self
            .http
            .post(self.url(&format!("/containers/{id}/start")))
            .json(&body);
        Self::send(OP, request)?;
        Ok(())
    }

    pub fn wait_container(&self, id: &str) -> Result<i64> {
        const OP: &str = "wait for container";
        let request = self.http.post(self.url(&format!("/containers/{id}/wait")));
        let response: WaitResponse = Self::read_json(OP, Self::send(OP, request)?)?;
        Ok(response.status_code)
    }

    /// Returns the tar archive of `path` inside the container. A [`ErrorKind::NotFound`]
    /// error means the path does not exist, which drives file-existence probing.
    pub fn copy_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        const OP: &str = "copy from container";
        let body = CopyFromContainerBody { resource: path };
        let request = self
            .http
            .post(self.url(&format!("/containers/{id}/copy")))
            .json(&body);
        Self::read_bytes(OP, Self::send(OP, request)?)
    }

    pub fn logs(&self, id: &str) -> Result<String> {
        const OP: &str = "container logs";
        let request = self
            .http
            .get(self.url(&format!("/containers/{id}/logs")))
            .query(&[("stdout", "1"), ("stderr", "1")]);
        let bytes = Self::read_bytes(OP, Self::send(OP, request)?)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn remove_container(&self, id: &str) -> Result<()> {
        const OP: &str = "remove container";
        let request = self
            .http
            .delete(self.url(&format!("/containers/{id}")))
            .query(&[("v", "1"), ("force", "1")]);
        Self::send(OP, request)?;
        Ok(())
    }

    pub fn commit_container(&self, id: &str) -> Result<String> {
        const OP: &str = "commit container";
        let request = self
            .http
            .post(self.url("/commit"))
            .query(&[("container", id)]);
        let response: CommitResponse = Self::read_json(OP, Self::send(OP, request)?)?;
        Ok(response.id)
    }

    pub fn tag_image(&self, image: &str, reference: &str) -> Result<()> {
        const OP: &str = "tag image";
        let (repo, tag) = split_image_reference(reference);
        let mut request = self
            .http
            .post(self.url(&format!("/images/{image}/tag")))
            .query(&[("repo", repo), ("force", "1")]);
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }
        Self::send(OP, request)?;
        Ok(())
    }

    /// Uploads a tar archive of the build context and runs the daemon-side build. The
    /// resulting image id is `None` when the build itself failed; the accompanying logs
    /// say why.
    pub fn build_image(
        &self,
        context_tar: Vec<u8>,
        tag: &str,
    ) -> Result<(Option<String>, String)> {
        const OP: &str = "build image";
        let request = self
            .http
            .post(self.url("/build"))
            .query(&[("t", tag), ("rm", "1")])
            .header("Content-Type", "application/x-tar")
            .body(context_tar);
        let text = Self::read_text(OP, Self::send(OP, request)?)?;
        let mut logs = String::new();
        for line in text.lines() {
            let message: StreamMessage = serde_json::from_str(line).unwrap_or_default();
            if let Some(stream) = message.stream {
                logs.push_str(&stream);
            }
            if let Some(error) = message.error {
                logs.push_str(&error);
                logs.push('\n');
            }
        }
        Ok((built_image_id(&logs), logs))
    }
}

/// The daemon reports the resulting image with a `Successfully built <id>` line at the
/// end of the build stream.
fn built_image_id(logs: &str) -> Option<String> {
    logs.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix("Successfully built ")
            .map(|id| id.trim().to_owned())
    })
}

fn stream_error(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| serde_json::from_str::<StreamMessage>(line).ok()?.error)
}

/// Splits `repository[:tag]`, keeping a `:` that belongs to a registry port with the
/// repository.
pub fn split_image_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (reference, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tcp_scheme() {
        assert_eq!(
            normalize_daemon_url("tcp://10.0.0.1:2375"),
            "http://10.0.0.1:2375"
        );
    }

    #[test]
    fn test_normalize_empty_host() {
        assert_eq!(normalize_daemon_url(""), "http://127.0.0.1:2375");
        assert_eq!(normalize_daemon_url("tcp://"), "http://127.0.0.1:2375");
        assert_eq!(normalize_daemon_url("http://"), "http://127.0.0.1:2375");
    }

    #[test]
    fn test_normalize_passes_through_http() {
        assert_eq!(
            normalize_daemon_url("http://daemon.internal:4243/"),
            "http://daemon.internal:4243"
        );
        assert_eq!(
            normalize_daemon_url("https://daemon.internal"),
            "https://daemon.internal"
        );
    }

    #[test]
    fn test_normalize_bare_host() {
        assert_eq!(
            normalize_daemon_url("daemon.internal:2375"),
            "http://daemon.internal:2375"
        );
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("app"), ("app", None));
        assert_eq!(split_image_reference("app:v1"), ("app", Some("v1")));
        assert_eq!(
            split_image_reference("registry:5000/app:v1"),
            ("registry:5000/app", Some("v1"))
        );
        assert_eq!(
            split_image_reference("registry:5000/app"),
            ("registry:5000/app", None)
        );
    }

    #[test]
    fn test_built_image_id_from_stream() {
        let logs = "Step 1 : FROM base\nStep 2 : ADD ./src /usr/src/\nSuccessfully built 0123456789ab\n";
        assert_eq!(built_image_id(logs).as_deref(), Some("0123456789ab"));
    }

    #[test]
    fn test_built_image_id_missing_on_failure() {
        let logs = "Step 1 : FROM base\nThe command [/bin/sh -c /usr/bin/prepare] returned a non-zero code: 1\n";
        assert_eq!(built_image_id(logs), None);
    }

    #[test]
    fn test_stream_error_detection() {
        let text = "{\"stream\":\"Pulling repository base\"}\n{\"error\":\"image not found\"}\n";
        assert_eq!(stream_error(text).as_deref(), Some("image not found"));
        assert_eq!(stream_error("{\"stream\":\"ok\"}"), None);
    }
}
