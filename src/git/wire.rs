//! git::wire
//!
//! Git smart-HTTP protocol passthrough.
//!
//! # Protocol
//!
//! Three exchanges make up the stateless HTTP transport:
//! - `GET <repo>/info/refs?service=git-upload-pack|git-receive-pack` returns
//!   the ref advertisement, prefixed with a `# service=...` pkt-line and flush
//! - `POST <repo>/git-upload-pack` answers fetch negotiation
//! - `POST <repo>/git-receive-pack` applies a push
//!
//! Pack work is delegated to the `git` executable in `--stateless-rpc` mode.
//! This module only frames and pipes bytes; HTTP routing lives in the service
//! layer.
//!
//! # Limitations
//!
//! - Only protocol v0/v1 is spoken; the `Git-Protocol` header is not forwarded
//! - Gzip-encoded request bodies are rejected
//!
//! # Receive-pack
//!
//! The template repository is non-bare and its checked-out branch is the live
//! template set, so receive-pack runs with
//! `receive.denyCurrentBranch=updateInstead`: a push to the current branch
//! updates the working tree, and is refused if the tree has local edits.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors from wire protocol handling.
#[derive(Debug, Error)]
pub enum WireError {
    /// The `service` parameter is missing or not a git service.
    #[error("unsupported service: {service}")]
    UnknownService {
        /// The requested service
        service: String,
    },

    /// The request body is compressed.
    #[error("compressed request bodies are not supported ({encoding})")]
    Compressed {
        /// The Content-Encoding header value
        encoding: String,
    },

    /// The git executable could not be started.
    #[error("cannot run git: {message}")]
    Spawn {
        /// Description of the failure
        message: String,
    },

    /// The git process exited unsuccessfully.
    #[error("git {service} failed: {message}")]
    Failed {
        /// The service that failed
        service: &'static str,
        /// Captured stderr
        message: String,
    },
}

/// A git smart-HTTP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireService {
    UploadPack,
    ReceivePack,
}

impl WireService {
    /// Parse a `service=` query value such as `git-upload-pack`.
    pub fn parse(service: &str) -> Result<Self, WireError> {
        match service {
            "git-upload-pack" => Ok(WireService::UploadPack),
            "git-receive-pack" => Ok(WireService::ReceivePack),
            other => Err(WireError::UnknownService {
                service: other.to_string(),
            }),
        }
    }

    /// Protocol name, e.g. `git-upload-pack`.
    pub fn name(&self) -> &'static str {
        match self {
            WireService::UploadPack => "git-upload-pack",
            WireService::ReceivePack => "git-receive-pack",
        }
    }

    fn subcommand(&self) -> &'static str {
        match self {
            WireService::UploadPack => "upload-pack",
            WireService::ReceivePack => "receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.name())
    }

    /// Content type of the RPC response.
    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.name())
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        if *self == WireService::ReceivePack {
            command.args(["-c", "receive.denyCurrentBranch=updateInstead"]);
        }
        command
            .arg(self.subcommand())
            .arg("--stateless-rpc")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.env_remove("GIT_DIR");
        command
    }
}

/// Encode one pkt-line.
pub fn pkt_line(data: &str) -> Vec<u8> {
    format!("{:04x}{}", data.len() + 4, data).into_bytes()
}

/// The pkt-line flush packet.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Whether a requested repository name addresses the configured one.
///
/// The `.git` suffix is optional on either side.
pub fn matches_repo_name(requested: &str, configured: &str) -> bool {
    let strip = |s: &str| s.strip_suffix(".git").unwrap_or(s).to_string();
    !requested.is_empty() && strip(requested) == strip(configured)
}

/// Reject compressed request bodies.
pub fn ensure_uncompressed(content_encoding: Option<&str>) -> Result<(), WireError> {
    match content_encoding.map(str::trim) {
        None | Some("") | Some("identity") => Ok(()),
        Some(encoding) => Err(WireError::Compressed {
            encoding: encoding.to_string(),
        }),
    }
}

/// Produce the `info/refs` body for `service`.
pub async fn advertise_refs(repo: &Path, service: WireService) -> Result<Vec<u8>, WireError> {
    let mut command = service.command();
    command.arg("--advertise-refs").arg(repo);
    let refs = run(command, service, Vec::new()).await?;

    let mut body = pkt_line(&format!("# service={}\n", service.name()));
    body.extend_from_slice(FLUSH_PKT);
    body.extend_from_slice(&refs);
    Ok(body)
}

/// Run one stateless RPC exchange and return the response body.
pub async fn rpc(repo: &Path, service: WireService, request: Vec<u8>) -> Result<Vec<u8>, WireError> {
    let mut command = service.command();
    command.arg(repo);
    run(command, service, request).await
}

async fn run(
    mut command: Command,
    service: WireService,
    input: Vec<u8>,
) -> Result<Vec<u8>, WireError> {
    let mut child = command.spawn().map_err(|e| WireError::Spawn {
        message: e.to_string(),
    })?;

    let mut stdin = child.stdin.take().ok_or_else(|| WireError::Spawn {
        message: "stdin not captured".to_string(),
    })?;
    // Feed stdin concurrently so a full stdout pipe cannot deadlock the child.
    let writer = tokio::spawn(async move {
        let result = stdin.write_all(&input).await;
        let _ = stdin.shutdown().await;
        result
    });

    let output = child.wait_with_output().await.map_err(|e| WireError::Spawn {
        message: e.to_string(),
    })?;

    if let Ok(Err(e)) = writer.await {
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            tracing::debug!(error = %e, service = service.name(), "failed writing request to git");
        }
    }

    if !output.status.success() {
        return Err(WireError::Failed {
            service: service.name(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
