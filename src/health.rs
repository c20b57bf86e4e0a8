//! Preflight checks for `worldsync doctor`

use crate::config::Config;
use crate::github::GitHubCatalog;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitHub token status
    pub github_auth: CheckResult,
    /// Saves directory status
    pub saves_dir: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    #[cfg(test)]
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks with the token the CLI resolved
    pub async fn run(config: &Config, token: Option<String>) -> Self {
        Self {
            git: Self::check_git(),
            github_auth: Self::check_github_auth(config, token).await,
            saves_dir: Self::check_saves_dir(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.github_auth.passed && self.saves_dir.passed
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.github_auth, &self.saves_dir]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.github_auth, &self.saves_dir]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Ask the API who the token belongs to
    async fn check_github_auth(config: &Config, token: Option<String>) -> CheckResult {
        if token.as_deref().map(str::is_empty).unwrap_or(true) {
            return CheckResult::error_with_details(
                "No GitHub token configured",
                format!(
                    "Set {} or store accessToken in the bindings file",
                    config.github.token_env
                ),
            );
        }

        let catalog = match GitHubCatalog::new(config, token) {
            Ok(catalog) => catalog,
            Err(e) => return CheckResult::error_with_details("Invalid GitHub settings", e.to_string()),
        };

        match catalog.owner().await {
            Ok(login) => CheckResult::ok_with_details(
                "GitHub token accepted",
                format!("Backups go to: {}", login),
            ),
            Err(e) => CheckResult::error_with_details(
                "GitHub token rejected",
                e.user_message("the token check"),
            ),
        }
    }

    /// A missing saves directory is only a warning; the first scan creates it
    fn check_saves_dir(config: &Config) -> CheckResult {
        match shellexpand::full(&config.saves_directory) {
            Ok(expanded) => {
                let path = Path::new(expanded.as_ref());
                if path.is_dir() {
                    CheckResult::ok_with_details("Saves directory exists", expanded.to_string())
                } else if path.exists() {
                    CheckResult::error_with_details(
                        "Saves path is not a directory",
                        expanded.to_string(),
                    )
                } else {
                    CheckResult::warning_with_details(
                        "Saves directory does not exist yet",
                        format!("It will be created at {}", expanded),
                    )
                }
            }
            Err(e) => CheckResult::error_with_details("Invalid saves directory path", e.to_string()),
        }
    }

    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Git Installation", &self.git),
            ("GitHub Token", &self.github_auth),
            ("Saves Directory", &self.saves_dir),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn passing() -> HealthCheck {
        HealthCheck {
            git: CheckResult::ok("Git OK"),
            github_auth: CheckResult::ok("Token OK"),
            saves_dir: CheckResult::ok("Dir OK"),
        }
    }

    #[test]
    fn test_git_check() {
        let result = HealthCheck::check_git();
        // Git should be installed in dev environment
        assert!(result.passed);
        assert!(result.details.is_some());
    }

    #[test]
    fn test_existing_saves_dir_passes() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config {
            saves_directory: temp.path().display().to_string(),
            ..Config::default()
        };
        let result = HealthCheck::check_saves_dir(&config);
        assert!(result.passed);
        assert!(!result.is_warning);
    }

    #[test]
    fn test_missing_saves_dir_is_warning() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config {
            saves_directory: temp.path().join("saves").display().to_string(),
            ..Config::default()
        };
        let result = HealthCheck::check_saves_dir(&config);
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[test]
    fn test_saves_path_that_is_a_file_fails() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let config = Config {
            saves_directory: temp.path().display().to_string(),
            ..Config::default()
        };
        assert!(!HealthCheck::check_saves_dir(&config).passed);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_network() {
        let result = HealthCheck::check_github_auth(&Config::default(), None).await;
        assert!(!result.passed);
        assert!(result.details.unwrap().contains("GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn test_token_is_checked_against_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"login": "steve"})))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.github.api_base_url = server.uri();
        let result = HealthCheck::check_github_auth(&config, Some("ghp_test".into())).await;

        assert!(result.passed);
        assert_eq!(result.details.as_deref(), Some("Backups go to: steve"));
    }

    #[tokio::test]
    async fn test_rejected_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "Bad credentials",
                "documentation_url": "https://docs.github.com/rest"
            })))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.github.api_base_url = server.uri();
        let result = HealthCheck::check_github_auth(&config, Some("ghp_bad".into())).await;

        assert!(!result.passed);
        assert!(result.details.unwrap().contains("token"));
    }

    #[test]
    fn test_warning_does_not_fail_overall() {
        let health = HealthCheck {
            saves_dir: CheckResult::warning_with_details("Missing", "created later"),
            ..passing()
        };
        assert!(health.all_passed());
        assert!(health.errors().is_empty());
        assert_eq!(health.warnings().len(), 1);
    }

    #[test]
    fn test_errors_returns_only_errors() {
        let health = HealthCheck {
            git: CheckResult::error("Git error"),
            github_auth: CheckResult::error("Token error"),
            ..passing()
        };
        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 2);
    }

    #[test]
    fn test_all_checks_are_labelled() {
        let labels: Vec<_> = passing().all_checks().iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, ["Git Installation", "GitHub Token", "Saves Directory"]);
    }
}
