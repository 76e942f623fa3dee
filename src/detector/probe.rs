//! 基于命令行的探测：运行 `<program> --version`，提取版本号并与最低版本比较

use std::cmp::Ordering;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{DetectionResult, Detector};
use crate::config::DetectorSection;
use crate::core::Result;

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

/// 从 `--version` 输出中取第一个 `N.N[.N]`，如 "2.1.2 (Claude Code)"、"git version 2.43.0"、"v20.11.1"
pub fn extract_version(output: &str) -> Option<String> {
    let re = VERSION_RE.get_or_init(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").unwrap());
    re.find(output).map(|m| m.as_str().to_string())
}

/// 按点分段逐段比较数值，缺失的段按 0 处理
pub fn compare_versions(current: &str, min: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let a = parse(current);
    let b = parse(min);
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// 命令行探测器
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: String,
    program: String,
    required: bool,
    min_version: Option<String>,
    timeout: Duration,
    not_found_message: String,
    fix_command: String,
    upgrade_command: String,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, program: impl Into<String>, required: bool) -> Self {
        let name = name.into();
        Self {
            not_found_message: format!("未检测到 {}", name),
            name,
            program: program.into(),
            required,
            min_version: None,
            timeout: Duration::from_secs(10),
            fix_command: String::new(),
            upgrade_command: String::new(),
        }
    }

    pub fn with_min_version(mut self, min: impl Into<String>) -> Self {
        let min = min.into();
        self.min_version = if min.trim().is_empty() { None } else { Some(min) };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fix(mut self, fix_command: impl Into<String>, upgrade_command: impl Into<String>) -> Self {
        self.fix_command = fix_command.into();
        self.upgrade_command = upgrade_command.into();
        self
    }

    pub fn with_not_found_message(mut self, message: impl Into<String>) -> Self {
        self.not_found_message = message.into();
        self
    }

    /// Agent CLI（必需）
    pub fn agent_cli(program: &str, cfg: &DetectorSection) -> Self {
        Self::new("Claude Code CLI", program, true)
            .with_min_version(cfg.claude_min_version.clone())
            .with_timeout(Duration::from_secs(cfg.probe_timeout_secs))
            .with_fix(
                "npm install -g @anthropic-ai/claude-code",
                if cfg!(windows) {
                    "npm update -g @anthropic-ai/claude-code"
                } else {
                    "sudo npm update -g @anthropic-ai/claude-code"
                },
            )
    }

    /// Node.js（必需）
    pub fn node(cfg: &DetectorSection) -> Self {
        let (fix, upgrade) = if cfg!(target_os = "macos") {
            ("brew install node", "brew upgrade node")
        } else if cfg!(windows) {
            ("winget install OpenJS.NodeJS.LTS", "winget upgrade OpenJS.NodeJS.LTS")
        } else if cfg!(target_os = "linux") {
            (
                "curl -fsSL https://deb.nodesource.com/setup_lts.x | sudo -E bash - && sudo apt-get install -y nodejs",
                "sudo apt-get install --only-upgrade nodejs",
            )
        } else {
            ("请访问 https://nodejs.org/ 下载安装", "请访问 https://nodejs.org/ 下载最新版本")
        };
        Self::new("Node.js", "node", true)
            .with_min_version(cfg.node_min_version.clone())
            .with_timeout(Duration::from_secs(cfg.probe_timeout_secs))
            .with_fix(fix, upgrade)
    }

    /// npm（必需，不限版本）
    pub fn npm(cfg: &DetectorSection) -> Self {
        let fix = if cfg!(target_os = "macos") {
            "brew install npm"
        } else if cfg!(windows) {
            "winget install OpenJS.NodeJS.NPM"
        } else if cfg!(target_os = "linux") {
            "sudo apt-get install npm"
        } else {
            "请访问 https://www.npmjs.com/ 下载安装"
        };
        Self::new("npm", "npm", true)
            .with_timeout(Duration::from_secs(cfg.probe_timeout_secs))
            .with_not_found_message("未检测到 npm 包管理器")
            .with_fix(fix, fix)
    }

    /// Git（可选）
    pub fn git(cfg: &DetectorSection) -> Self {
        let fix = if cfg!(target_os = "macos") {
            "brew install git"
        } else if cfg!(windows) {
            "winget install Git.Git"
        } else if cfg!(target_os = "linux") {
            "sudo apt-get install git"
        } else {
            "请访问 https://git-scm.com/ 下载安装"
        };
        Self::new("Git", "git", false)
            .with_timeout(Duration::from_secs(cfg.probe_timeout_secs))
            .with_not_found_message("未检测到 Git（建议安装以获得更好的版本控制体验）")
            .with_fix(fix, fix)
    }

    /// 对一次 `--version` 输出做判定
    pub fn evaluate(&self, output: &str) -> DetectionResult {
        let raw = output.trim();
        let version = extract_version(raw).unwrap_or_else(|| raw.split_whitespace().next().unwrap_or("").to_string());

        if let Some(min) = &self.min_version {
            if compare_versions(&version, min) == Ordering::Less {
                return DetectionResult::failed(
                    &self.name,
                    self.required,
                    format!("{} 版本过低: 当前 {}，要求 {} 或更高", self.name, version, min),
                    self.upgrade_command.clone(),
                );
            }
        }

        DetectionResult::success(
            &self.name,
            self.required,
            version.clone(),
            format!("{} 版本 {} 检测通过", self.name, version),
        )
    }
}

#[async_trait]
impl Detector for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn detect(&self) -> Result<DetectionResult> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                tracing::debug!(probe = %self.name, status = %output.status, "probe exited with failure");
                return Ok(self.not_found());
            }
            Ok(Err(e)) => {
                tracing::debug!(probe = %self.name, error = %e, "probe could not start");
                return Ok(self.not_found());
            }
            Err(_) => {
                tracing::warn!(probe = %self.name, timeout_secs = self.timeout.as_secs(), "probe timed out");
                return Ok(DetectionResult::failed(
                    &self.name,
                    self.required,
                    format!("{} 检测超时", self.name),
                    self.fix_command.clone(),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = self.evaluate(&stdout);
        tracing::debug!(probe = %self.name, version = %result.version, status = ?result.status, "probe finished");
        Ok(result)
    }
}

impl CommandProbe {
    fn not_found(&self) -> DetectionResult {
        DetectionResult::failed(&self.name, self.required, self.not_found_message.clone(), self.fix_command.clone())
    }
}
