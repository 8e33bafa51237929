//! Docker Coupling - 플러그인 사이드카 컨테이너
//!
//! 라이프사이클 단계마다 `docker compose` 를 실행한다:
//!
//! | 단계 | 명령 | 매니페스트 플래그 |
//! |---|---|---|
//! | install | `compose build` | `buildOnInstall` |
//! | activate | `compose up -d` | `upOnActivate` |
//! | deactivate | `compose down` | `downOnDeactivate` |
//! | uninstall | `compose down -v` | `removeOnUninstall` |
//!
//! 실패는 호출자가 경고로만 기록한다.

use super::manifest::DockerConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};
use trellis_foundation::{DockerSettings, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerPhase {
    Install,
    Activate,
    Deactivate,
    Uninstall,
}

impl std::fmt::Display for DockerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Activate => write!(f, "activate"),
            Self::Deactivate => write!(f, "deactivate"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

impl DockerPhase {
    /// 매니페스트 플래그 (기본 true)
    fn enabled_in(&self, config: &DockerConfig) -> bool {
        let flag = match self {
            Self::Install => config.build_on_install,
            Self::Activate => config.up_on_activate,
            Self::Deactivate => config.down_on_deactivate,
            Self::Uninstall => config.remove_on_uninstall,
        };
        flag.unwrap_or(true)
    }

    fn compose_args(&self) -> &'static [&'static str] {
        match self {
            Self::Install => &["build"],
            Self::Activate => &["up", "-d"],
            Self::Deactivate => &["down"],
            Self::Uninstall => &["down", "-v"],
        }
    }
}

// ============================================================================
// CommandRunner
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// 프로세스 환경 위에 덮어쓸 값
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// 로그용 한 줄 표현
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// 외부 명령 실행기
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// tokio 프로세스 실행기
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ============================================================================
// DockerManager
// ============================================================================

pub struct DockerManager {
    settings: DockerSettings,
    runner: Arc<dyn CommandRunner>,
}

impl DockerManager {
    pub fn new(settings: DockerSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &DockerSettings {
        &self.settings
    }

    /// `docker --version` 과 `docker compose version` 이 모두 성공해야 사용 가능
    pub async fn is_available(&self, cwd: &Path) -> Result<()> {
        let binary = self.settings.binary();
        let probes = [
            CommandSpec::new(binary).arg("--version"),
            CommandSpec::new(binary).args(["compose", "version"]),
        ];

        for probe in probes {
            let probe = probe.current_dir(cwd);
            match self.runner.run(&probe).await {
                Ok(output) if output.success => {}
                Ok(output) => {
                    return Err(Error::DockerUnavailable(format!(
                        "'{}' exited with {:?}: {}",
                        probe.display(),
                        output.status_code,
                        output.stderr.trim()
                    )))
                }
                Err(e) => {
                    return Err(Error::DockerUnavailable(format!(
                        "'{}' could not run: {}",
                        probe.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    /// 단계에 해당하는 compose 명령. 꺼져 있으면 None
    pub fn compose_command(
        &self,
        config: &DockerConfig,
        phase: DockerPhase,
        plugin_dir: &Path,
    ) -> Option<CommandSpec> {
        if !self.settings.enabled() || !config.is_enabled() || !phase.enabled_in(config) {
            return None;
        }

        let compose_file = config
            .compose_file
            .as_deref()
            .unwrap_or_else(|| self.settings.default_compose_file());
        let compose_path = plugin_dir.join(compose_file);

        let binary = self.settings.binary();
        let mut spec = if self.settings.use_sudo() {
            CommandSpec::new("sudo").arg(binary)
        } else {
            CommandSpec::new(binary)
        };
        spec = spec
            .args(["compose", "-f"])
            .arg(compose_path.to_string_lossy())
            .args(phase.compose_args().iter().copied());
        if let Some(service) = &config.service {
            spec = spec.arg(service.as_str());
        }

        Some(spec.current_dir(plugin_dir).envs(&config.env))
    }

    /// 단계 실행. 실행하지 않았으면 `Ok(false)`
    pub async fn run_phase(
        &self,
        plugin_id: &str,
        config: Option<&DockerConfig>,
        phase: DockerPhase,
        plugin_dir: &Path,
    ) -> Result<bool> {
        let Some(config) = config else {
            return Ok(false);
        };
        let Some(spec) = self.compose_command(config, phase, plugin_dir) else {
            debug!(plugin_id = %plugin_id, %phase, "Docker phase skipped");
            return Ok(false);
        };

        self.is_available(plugin_dir).await?;

        info!(plugin_id = %plugin_id, %phase, "Running {}", spec.display());
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| Error::DockerCommandFailed(format!("{}: {}", spec.display(), e)))?;

        if !output.success {
            return Err(Error::DockerCommandFailed(format!(
                "{} exited with {:?}: {}",
                spec.display(),
                output.status_code,
                output.stderr.trim()
            )));
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<CommandSpec>>,
        docker_missing: bool,
        fail_compose: bool,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().push(spec.clone());
            let is_probe = spec.args.last().map(String::as_str) == Some("version")
                || spec.args.first().map(String::as_str) == Some("--version");
            let success = if is_probe { !self.docker_missing } else { !self.fail_compose };
            Ok(CommandOutput {
                success,
                status_code: Some(if success { 0 } else { 1 }),
                ..Default::default()
            })
        }
    }

    fn config() -> DockerConfig {
        DockerConfig {
            enabled: Some(true),
            service: Some("api".into()),
            env: HashMap::from([("API_KEY".to_string(), "secret".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_compose_command_per_phase() {
        let manager = DockerManager::new(DockerSettings::default(), Arc::new(Recorder::default()));
        let dir = Path::new("/srv/plugins/weather");

        let up = manager
            .compose_command(&config(), DockerPhase::Activate, dir)
            .unwrap();
        assert_eq!(up.program, "docker");
        assert_eq!(
            up.args,
            vec![
                "compose",
                "-f",
                "/srv/plugins/weather/container/docker-compose.yml",
                "up",
                "-d",
                "api"
            ]
        );
        assert_eq!(up.cwd.as_deref(), Some(dir));
        assert_eq!(up.env.get("API_KEY").map(String::as_str), Some("secret"));

        let down = manager
            .compose_command(&config(), DockerPhase::Uninstall, dir)
            .unwrap();
        assert!(down.display().ends_with("down -v api"));
    }

    #[test]
    fn test_flags_and_sudo() {
        let settings = DockerSettings {
            use_sudo: Some(true),
            ..Default::default()
        };
        let manager = DockerManager::new(settings, Arc::new(Recorder::default()));
        let dir = Path::new("/p");

        let mut cfg = config();
        cfg.compose_file = Some("compose.yml".into());
        cfg.build_on_install = Some(false);
        assert!(manager.compose_command(&cfg, DockerPhase::Install, dir).is_none());

        let build = manager.compose_command(&cfg, DockerPhase::Deactivate, dir).unwrap();
        assert_eq!(build.program, "sudo");
        assert_eq!(build.args[0], "docker");
        assert_eq!(build.args[3], "/p/compose.yml");

        cfg.enabled = Some(false);
        assert!(manager.compose_command(&cfg, DockerPhase::Activate, dir).is_none());

        let disabled = DockerManager::new(
            DockerSettings {
                enabled: Some(false),
                ..Default::default()
            },
            Arc::new(Recorder::default()),
        );
        assert!(disabled.compose_command(&config(), DockerPhase::Activate, dir).is_none());
    }

    #[tokio::test]
    async fn test_run_phase_probes_then_runs() {
        let recorder = Arc::new(Recorder::default());
        let manager = DockerManager::new(DockerSettings::default(), recorder.clone());

        let ran = manager
            .run_phase("weather", Some(&config()), DockerPhase::Activate, Path::new("/p"))
            .await
            .unwrap();
        assert!(ran);

        let calls: Vec<String> = recorder.calls.lock().iter().map(CommandSpec::display).collect();
        assert_eq!(calls[0], "docker --version");
        assert_eq!(calls[1], "docker compose version");
        assert!(calls[2].starts_with("docker compose -f"));

        assert!(!manager
            .run_phase("weather", None, DockerPhase::Activate, Path::new("/p"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_run_phase_failures() {
        let missing = DockerManager::new(
            DockerSettings::default(),
            Arc::new(Recorder {
                docker_missing: true,
                ..Default::default()
            }),
        );
        let err = missing
            .run_phase("weather", Some(&config()), DockerPhase::Install, Path::new("/p"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DockerUnavailable(_)));
        assert!(err.is_recoverable());

        let failing = DockerManager::new(
            DockerSettings::default(),
            Arc::new(Recorder {
                fail_compose: true,
                ..Default::default()
            }),
        );
        let err = failing
            .run_phase("weather", Some(&config()), DockerPhase::Deactivate, Path::new("/p"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DockerCommandFailed(_)));
    }
}
