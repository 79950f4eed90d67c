//! Remote file listing and fetching through rclone

use crate::error::StorageError;
use crate::types::RemoteFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Read access to the files served for each domain
pub trait RemoteStorage: Send + Sync {
    /// List the entries under `path`
    fn list<'a>(&'a self, path: &'a str, domain: &'a str) -> BoxFuture<'a, Result<Vec<RemoteFile>>>;

    /// Read the full contents of the file at `path`
    fn fetch<'a>(&'a self, path: &'a str, domain: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Captured result of running an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external commands
pub trait CommandExecutor: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, std::io::Result<CommandOutput>>;
}

/// Executes commands as tokio child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioExecutor;

impl CommandExecutor for TokioExecutor {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, std::io::Result<CommandOutput>> {
        async move {
            let output = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await?;

            Ok(CommandOutput {
                status: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        .boxed()
    }
}

/// rclone-backed storage with a remote per domain
pub struct Rclone<X = TokioExecutor> {
    executor: X,
    binary: String,
    default_remote: Option<String>,
    domain_remotes: HashMap<String, String>,
}

impl Rclone<TokioExecutor> {
    pub fn new(
        binary: impl Into<String>,
        default_remote: Option<String>,
        domain_remotes: HashMap<String, String>,
    ) -> Self {
        Self::with_executor(TokioExecutor, binary, default_remote, domain_remotes)
    }
}

impl<X: CommandExecutor> Rclone<X> {
    pub fn with_executor(
        executor: X,
        binary: impl Into<String>,
        default_remote: Option<String>,
        domain_remotes: HashMap<String, String>,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            default_remote,
            domain_remotes,
        }
    }

    /// Resolve the rclone target (`remote:path`) for a domain and path
    fn target(&self, path: &str, domain: &str) -> Result<String> {
        let path = sanitize_path(path)?;

        let remote = self
            .domain_remotes
            .get(&domain.to_ascii_lowercase())
            .or(self.default_remote.as_ref())
            .ok_or_else(|| StorageError::UnknownDomain(domain.to_string()))?;

        if path.is_empty() {
            Ok(remote.clone())
        } else if remote.ends_with(':') || remote.ends_with('/') {
            Ok(format!("{}{}", remote, path))
        } else {
            Ok(format!("{}/{}", remote, path))
        }
    }

    async fn rclone(&self, args: Vec<String>) -> Result<Vec<u8>> {
        debug!(binary = %self.binary, ?args, "Running rclone");

        let output = self.executor.run(&self.binary, &args).await?;

        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(status = ?output.status, stderr = %stderr.trim(), "rclone failed");
            return Err(StorageError::Command {
                status: output.status,
                stderr,
            });
        }

        Ok(output.stdout)
    }
}

impl<X: CommandExecutor> RemoteStorage for Rclone<X> {
    fn list<'a>(
        &'a self,
        path: &'a str,
        domain: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>>> {
        async move {
            let target = self.target(path, domain)?;
            let stdout = self
                .rclone(vec!["lsjson".to_string(), target.clone()])
                .await?;
            let files: Vec<RemoteFile> = serde_json::from_slice(&stdout)?;
            debug!(target = %target, count = files.len(), "Listed remote path");
            Ok(files)
        }
        .boxed()
    }

    fn fetch<'a>(&'a self, path: &'a str, domain: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            let target = self.target(path, domain)?;
            let data = self.rclone(vec!["cat".to_string(), target.clone()]).await?;
            debug!(target = %target, size = data.len(), "Fetched remote file");
            Ok(data)
        }
        .boxed()
    }
}

/// Normalise a request path, rejecting attempts to leave the remote root
pub fn sanitize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s if s.contains('\0') => return Err(StorageError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Path of a listed file relative to the remote root
pub fn join_listing_path(dir: &str, file: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        file.to_string()
    } else if dir == file || dir.ends_with(&format!("/{}", file)) {
        // Listing a single file reports it relative to itself
        dir.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations and replies with a canned output
    struct ScriptedExecutor {
        output: CommandOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedExecutor {
        fn replying(status: i32, stdout: &[u8], stderr: &[u8]) -> Self {
            Self {
                output: CommandOutput {
                    status: Some(status),
                    stdout: stdout.to_vec(),
                    stderr: stderr.to_vec(),
                },
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandExecutor for ScriptedExecutor {
        fn run<'a>(
            &'a self,
            program: &'a str,
            args: &'a [String],
        ) -> BoxFuture<'a, std::io::Result<CommandOutput>> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(call);
            let output = self.output.clone();
            async move { Ok(output) }.boxed()
        }
    }

    fn rclone(executor: ScriptedExecutor) -> Rclone<ScriptedExecutor> {
        let mut domains = HashMap::new();
        domains.insert("images.example.com".to_string(), "s3:example-images".to_string());
        Rclone::with_executor(executor, "rclone", Some("local:".to_string()), domains)
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/photos//2024/./cat.jpg").unwrap(), "photos/2024/cat.jpg");
        assert_eq!(sanitize_path("").unwrap(), "");
        assert!(sanitize_path("photos/../../secrets").is_err());
    }

    #[test]
    fn test_join_listing_path() {
        assert_eq!(join_listing_path("photos", "cat.jpg"), "photos/cat.jpg");
        assert_eq!(join_listing_path("photos/", "cat.jpg"), "photos/cat.jpg");
        assert_eq!(join_listing_path("", "cat.jpg"), "cat.jpg");
        assert_eq!(join_listing_path("photos/cat.jpg", "cat.jpg"), "photos/cat.jpg");
    }

    #[test]
    fn test_target_resolution() {
        let storage = rclone(ScriptedExecutor::replying(0, b"", b""));

        assert_eq!(
            storage.target("a/b.png", "Images.Example.com").unwrap(),
            "s3:example-images/a/b.png"
        );
        assert_eq!(storage.target("a/b.png", "other.test").unwrap(), "local:a/b.png");
        assert_eq!(storage.target("", "images.example.com").unwrap(), "s3:example-images");
    }

    #[test]
    fn test_unknown_domain_without_default() {
        let storage = Rclone::with_executor(
            ScriptedExecutor::replying(0, b"", b""),
            "rclone",
            None,
            HashMap::new(),
        );
        assert!(matches!(
            storage.target("a.png", "nowhere.test"),
            Err(StorageError::UnknownDomain(_))
        ));
    }

    #[tokio::test]
    async fn test_list_parses_lsjson() {
        let stdout = br#"[
            {"Path":"cat.jpg","Name":"cat.jpg","Size":10,"MimeType":"image/jpeg","IsDir":false}
        ]"#;
        let storage = rclone(ScriptedExecutor::replying(0, stdout, b""));

        let files = storage.list("photos", "images.example.com").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].mime_type, "image/jpeg");

        let calls = storage.executor.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec!["rclone", "lsjson", "s3:example-images/photos"]
        );
    }

    #[tokio::test]
    async fn test_fetch_uses_cat() {
        let storage = rclone(ScriptedExecutor::replying(0, b"\x89PNG", b""));

        let data = storage.fetch("a.png", "images.example.com").await.unwrap();
        assert_eq!(data, b"\x89PNG");
        assert_eq!(storage.executor.calls.lock().unwrap()[0][1], "cat");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_command_error() {
        let storage = rclone(ScriptedExecutor::replying(3, b"", b"directory not found"));

        let err = storage.list("missing", "images.example.com").await.unwrap_err();
        match err {
            StorageError::Command { status, stderr } => {
                assert_eq!(status, Some(3));
                assert!(stderr.contains("directory not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let storage = rclone(ScriptedExecutor::replying(0, b"not json", b""));
        let err = storage.list("photos", "images.example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::Parse(_)));
    }

    #[tokio::test]
    async fn test_traversal_never_reaches_rclone() {
        let storage = rclone(ScriptedExecutor::replying(0, b"[]", b""));
        let err = storage.fetch("../etc/passwd", "images.example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
        assert!(storage.executor.calls.lock().unwrap().is_empty());
    }
}
