//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MURMUR__*` 覆盖（双下划线表示嵌套，如 `MURMUR__AGENT__COMMAND=claude`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::transcript::TurnTexts;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub transcript: TranscriptSection,
    pub agent: AgentSection,
    pub detector: DetectorSection,
}

/// [app] 段：应用名与数据目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话、工作区注册表、检测缓存的存放目录，未设置时用 ~/.murmur
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".murmur")
        })
    }
}

/// [transcript] 段：流式刷新间隔与固定提示文案
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptSection {
    pub flush_interval_ms: u64,
    pub thinking_text: String,
    pub no_response_text: String,
    pub error_prefix: String,
}

impl Default for TranscriptSection {
    fn default() -> Self {
        let texts = TurnTexts::default();
        Self {
            flush_interval_ms: 16,
            thinking_text: texts.thinking,
            no_response_text: texts.no_response,
            error_prefix: texts.error_prefix,
        }
    }
}

impl TranscriptSection {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn texts(&self) -> TurnTexts {
        TurnTexts {
            thinking: self.thinking_text.clone(),
            no_response: self.no_response_text.clone(),
            error_prefix: self.error_prefix.clone(),
            ..TurnTexts::default()
        }
    }
}

/// [agent] 段：Agent CLI 命令与单轮超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub command: String,
    /// 追加在 `--print <prompt>` 之后的参数
    pub extra_args: Vec<String>,
    pub turn_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            extra_args: vec![
                "--output-format".into(),
                "stream-json".into(),
                "--verbose".into(),
                "--include-partial-messages".into(),
            ],
            turn_timeout_secs: 600,
        }
    }
}

/// [detector] 段：最低版本要求、网络探测与检测缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub claude_min_version: String,
    pub node_min_version: String,
    pub enable_cache: bool,
    /// 缓存有效期（小时）
    pub cache_expiry_hours: u64,
    /// 单个探测命令的超时（秒）
    pub probe_timeout_secs: u64,
    /// 网络连通性检测的目标端点
    pub network_url: String,
    pub network_timeout_secs: u64,
    pub network_retry_count: u32,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            claude_min_version: "1.0.0".to_string(),
            node_min_version: "18.0.0".to_string(),
            enable_cache: true,
            cache_expiry_hours: 24,
            probe_timeout_secs: 10,
            network_url: "https://api.anthropic.com".to_string(),
            network_timeout_secs: 10,
            network_retry_count: 3,
        }
    }
}

/// 从 config 目录加载配置，环境变量 MURMUR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MURMUR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MURMUR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.transcript.flush_interval(), Duration::from_millis(16));
        assert_eq!(cfg.agent.command, "claude");
        assert!(cfg.agent.extra_args.contains(&"stream-json".to_string()));
        assert_eq!(cfg.detector.cache_expiry_hours, 24);
        assert_eq!(cfg.detector.network_url, "https://api.anthropic.com");
        assert_eq!(cfg.detector.network_retry_count, 3);
        assert_eq!(cfg.transcript.texts().thinking, "思考中");
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[transcript]\nflush_interval_ms = 33\nthinking_text = \"Thinking...\"\n\n[agent]\ncommand = \"fake-agent\"\n\n[detector]\nnetwork_retry_count = 5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.transcript.flush_interval_ms, 33);
        assert_eq!(cfg.transcript.texts().thinking, "Thinking...");
        assert_eq!(cfg.agent.command, "fake-agent");
        assert_eq!(cfg.detector.network_retry_count, 5);
        assert_eq!(cfg.detector.network_timeout_secs, 10);
        // 未出现的键保持默认
        assert_eq!(cfg.agent.turn_timeout_secs, 600);
        assert_eq!(cfg.transcript.error_prefix, "发生错误: ");
    }
}
