use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::path::Path;
use std::process::Output;
use std::sync::OnceLock;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};

/// Version-control primitives used by [`crate::sync::SyncOperation`]
#[async_trait]
pub trait Vcs: Send + Sync {
    /// `git init` with HEAD pointing at the sync branch
    async fn init(&self, dir: &Path) -> SyncResult<()>;

    /// Point HEAD at the sync branch without touching the index
    async fn set_head_branch(&self, dir: &Path) -> SyncResult<()>;

    async fn remote_url(&self, dir: &Path) -> SyncResult<Option<String>>;

    /// Add `origin` or update its URL
    async fn set_remote(&self, dir: &Path, url: &str) -> SyncResult<()>;

    async fn add_all(&self, dir: &Path) -> SyncResult<()>;

    async fn has_head(&self, dir: &Path) -> bool;

    async fn is_clean(&self, dir: &Path) -> SyncResult<bool>;

    async fn commit(&self, dir: &Path, message: &str) -> SyncResult<()>;

    /// Force-push the sync branch to `origin`
    async fn push(&self, dir: &Path) -> SyncResult<()>;

    async fn fetch(&self, dir: &Path) -> SyncResult<()>;

    async fn has_remote_branch(&self, dir: &Path) -> SyncResult<bool>;

    async fn reset_hard(&self, dir: &Path) -> SyncResult<()>;

    /// Remove untracked files and directories
    async fn clean(&self, dir: &Path) -> SyncResult<()>;

    async fn pull(&self, dir: &Path) -> SyncResult<()>;

    /// Clone `url` into `dir`, which must be absent or empty
    async fn clone_repo(&self, url: &str, dir: &Path) -> SyncResult<()>;
}

/// [`Vcs`] implementation driving the `git` binary
#[derive(Clone)]
pub struct GitClient {
    token: Option<String>,
    branch: String,
    author_name: String,
    author_email: String,
}

impl std::fmt::Debug for GitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitClient")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("branch", &self.branch)
            .finish()
    }
}

impl GitClient {
    /// Create a new Git client with the given configuration
    pub fn new(config: &Config, token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            branch: config.sync.branch.clone(),
            author_name: config.sync.author_name.clone(),
            author_email: config.sync.author_email.clone(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    // The credential travels per invocation and is never written to .git/config
    fn auth_args(&self) -> Vec<String> {
        match &self.token {
            Some(token) => {
                let credentials = BASE64.encode(format!("x-access-token:{}", token));
                vec![
                    "-c".to_string(),
                    format!("http.extraheader=AUTHORIZATION: basic {}", credentials),
                ]
            }
            None => Vec::new(),
        }
    }

    fn identity_args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("user.name={}", self.author_name),
            "-c".to_string(),
            format!("user.email={}", self.author_email),
        ]
    }

    fn command(&self, dir: Option<&Path>, authenticated: bool) -> AsyncCommand {
        let mut cmd = AsyncCommand::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if authenticated {
            cmd.args(self.auth_args());
        }
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn output(
        &self,
        dir: Option<&Path>,
        authenticated: bool,
        extra: &[String],
        args: &[&str],
    ) -> SyncResult<Output> {
        debug!("git {}", args.join(" "));
        let mut cmd = self.command(dir, authenticated);
        cmd.args(extra).args(args);
        Ok(cmd.output().await?)
    }

    /// Run a command and fail with a classified error on non-zero exit
    async fn run(
        &self,
        dir: Option<&Path>,
        authenticated: bool,
        extra: &[String],
        args: &[&str],
    ) -> SyncResult<String> {
        let output = self.output(dir, authenticated, extra, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let label = args.first().copied().unwrap_or("git");
            return Err(classify_git_error(label, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn head_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }
}

#[async_trait]
impl Vcs for GitClient {
    async fn init(&self, dir: &Path) -> SyncResult<()> {
        self.run(Some(dir), false, &[], &["init"]).await?;
        self.set_head_branch(dir).await
    }

    async fn set_head_branch(&self, dir: &Path) -> SyncResult<()> {
        let head = self.head_ref();
        self.run(Some(dir), false, &[], &["symbolic-ref", "HEAD", &head])
            .await?;
        Ok(())
    }

    async fn remote_url(&self, dir: &Path) -> SyncResult<Option<String>> {
        let output = self
            .output(Some(dir), false, &[], &["remote", "get-url", "origin"])
            .await?;

        if output.status.success() {
            let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(url))
        } else {
            Ok(None)
        }
    }

    async fn set_remote(&self, dir: &Path, url: &str) -> SyncResult<()> {
        match self.remote_url(dir).await? {
            Some(current) if remote_urls_match(&current, url) => Ok(()),
            Some(current) => {
                debug!("Correcting origin of {}: {} -> {}", dir.display(), current, url);
                self.run(Some(dir), false, &[], &["remote", "set-url", "origin", url])
                    .await?;
                Ok(())
            }
            None => {
                self.run(Some(dir), false, &[], &["remote", "add", "origin", url])
                    .await?;
                Ok(())
            }
        }
    }

    async fn add_all(&self, dir: &Path) -> SyncResult<()> {
        self.run(Some(dir), false, &[], &["add", "-A"]).await?;
        Ok(())
    }

    async fn has_head(&self, dir: &Path) -> bool {
        self.output(Some(dir), false, &[], &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn is_clean(&self, dir: &Path) -> SyncResult<bool> {
        let status = self
            .run(Some(dir), false, &[], &["status", "--porcelain"])
            .await?;
        Ok(status.is_empty())
    }

    async fn commit(&self, dir: &Path, message: &str) -> SyncResult<()> {
        let identity = self.identity_args();
        self.run(Some(dir), false, &identity, &["commit", "-m", message])
            .await?;
        Ok(())
    }

    async fn push(&self, dir: &Path) -> SyncResult<()> {
        let refspec = format!("{}:{}", self.head_ref(), self.head_ref());
        self.run(Some(dir), true, &[], &["push", "--force", "origin", &refspec])
            .await?;
        Ok(())
    }

    async fn fetch(&self, dir: &Path) -> SyncResult<()> {
        self.run(Some(dir), true, &[], &["fetch", "origin"]).await?;
        Ok(())
    }

    async fn has_remote_branch(&self, dir: &Path) -> SyncResult<bool> {
        let remote_ref = self.remote_ref();
        let output = self
            .output(
                Some(dir),
                false,
                &[],
                &["rev-parse", "--verify", "--quiet", &remote_ref],
            )
            .await?;
        Ok(output.status.success())
    }

    async fn reset_hard(&self, dir: &Path) -> SyncResult<()> {
        let target = format!("origin/{}", self.branch);
        self.run(Some(dir), false, &[], &["reset", "--hard", &target])
            .await?;
        Ok(())
    }

    async fn clean(&self, dir: &Path) -> SyncResult<()> {
        self.run(Some(dir), false, &[], &["clean", "-fd"]).await?;
        Ok(())
    }

    async fn pull(&self, dir: &Path) -> SyncResult<()> {
        let identity = self.identity_args();
        self.run(Some(dir), true, &identity, &["pull", "origin", &self.branch])
            .await?;
        Ok(())
    }

    async fn clone_repo(&self, url: &str, dir: &Path) -> SyncResult<()> {
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = dir.to_string_lossy();
        self.run(None, true, &[], &["clone", url, &target]).await?;

        // An empty remote leaves HEAD on the client's default branch name
        if !self.has_head(dir).await {
            self.set_head_branch(dir).await?;
        }
        Ok(())
    }
}

fn not_found_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)repository '.*' not found|repository not found|does not appear to be a git repository|not found")
            .expect("valid regex")
    })
}

fn auth_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)authentication failed|could not read username|invalid username or password|remote: permission to .* denied|permission denied \(publickey\)|returned error: 40[13]\b|\bhttp 40[13]\b")
            .expect("valid regex")
    })
}

fn network_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)could not resolve host|timed out|connection refused|unable to access|failed to connect|network is unreachable")
            .expect("valid regex")
    })
}

/// Map git stderr onto the error taxonomy
pub fn classify_git_error(command: &str, stderr: &str) -> SyncError {
    let message = stderr.trim().to_string();
    // Auth is checked before "unable to access", which prefixes HTTP 401/403 failures too
    if auth_pattern().is_match(&message) {
        SyncError::Auth(message)
    } else if not_found_pattern().is_match(&message) {
        SyncError::NotFound(message)
    } else if network_pattern().is_match(&message) {
        SyncError::Network(message)
    } else {
        SyncError::Git {
            command: command.to_string(),
            message,
        }
    }
}

/// Compare remote URLs ignoring a trailing `.git` or slash
pub fn remote_urls_match(actual: &str, expected: &str) -> bool {
    let normalize = |url: &str| -> String {
        url.trim()
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_string()
    };

    normalize(actual) == normalize(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_remote_url_matching() {
        assert!(remote_urls_match(
            "https://github.com/user/repo.git",
            "https://github.com/user/repo"
        ));

        assert!(remote_urls_match(
            "https://github.com/user/repo/",
            "https://github.com/user/repo.git"
        ));

        assert!(!remote_urls_match(
            "https://github.com/user/repo1",
            "https://github.com/user/repo2"
        ));

        // Names are exact-case
        assert!(!remote_urls_match(
            "https://github.com/user/World",
            "https://github.com/user/world"
        ));
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_git_error(
            "clone",
            "remote: Repository not found.\nfatal: repository 'https://github.com/a/b.git/' not found",
        );
        assert_matches!(err, SyncError::NotFound(_));

        let err = classify_git_error(
            "clone",
            "fatal: '/tmp/x.git' does not appear to be a git repository",
        );
        assert_matches!(err, SyncError::NotFound(_));
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_git_error(
            "push",
            "fatal: unable to access 'https://github.com/a/b.git/': The requested URL returned error: 403",
        );
        assert_matches!(err, SyncError::Auth(_));

        let err = classify_git_error(
            "fetch",
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
        );
        assert_matches!(err, SyncError::Auth(_));
    }

    #[test]
    fn test_classify_remote_permission_as_auth() {
        let err = classify_git_error(
            "push",
            "remote: Permission to steve/minecraft-world-Farm.git denied to alex.\nfatal: unable to access 'https://github.com/steve/minecraft-world-Farm.git/': The requested URL returned error: 403",
        );
        assert_matches!(err, SyncError::Auth(_));
    }

    #[test]
    fn test_classify_local_permission_denied_as_git() {
        let err = classify_git_error(
            "checkout",
            "error: unable to create file level.dat: Permission denied",
        );
        assert_matches!(err, SyncError::Git { command, .. } if command == "checkout");

        let err = classify_git_error(
            "commit",
            "fatal: Unable to create '/saves/Farm/.git/index.lock': Permission denied",
        );
        assert_matches!(err, SyncError::Git { .. });
    }

    #[test]
    fn test_classify_network() {
        let err = classify_git_error(
            "fetch",
            "fatal: unable to access 'https://github.com/a/b.git/': Could not resolve host: github.com",
        );
        assert_matches!(err, SyncError::Network(_));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_git_error("commit", "error: pathspec 'x' did not match any file(s)");
        assert_matches!(err, SyncError::Git { command, .. } if command == "commit");
    }

    #[test]
    fn test_auth_header_is_basic_and_encoded() {
        let client = GitClient::new(&Config::default(), Some("ghp_secret".to_string()));
        let args = client.auth_args();
        assert_eq!(args[0], "-c");
        assert!(args[1].starts_with("http.extraheader=AUTHORIZATION: basic "));
        assert!(!args[1].contains("ghp_secret"));
        assert!(!format!("{:?}", client).contains("ghp_secret"));

        let anonymous = GitClient::new(&Config::default(), Some(String::new()));
        assert!(anonymous.auth_args().is_empty());
    }
}
