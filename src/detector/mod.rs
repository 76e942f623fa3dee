//! 运行环境检测
//!
//! 启动 Agent 之前确认本机具备 Agent CLI、Node.js、npm 等工具且能连上 API，给出版本、提示信息与修复命令。

pub mod manager;
pub mod network;
pub mod probe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::DetectorManager;
pub use network::NetworkProbe;
pub use probe::{compare_versions, extract_version, CommandProbe};

/// 单项检测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Success,
    Failed,
}

/// 单项检测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub name: String,
    pub status: DetectionStatus,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fix_command: String,
    pub required: bool,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    pub fn success(name: &str, required: bool, version: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: DetectionStatus::Success,
            version: version.into(),
            message: message.into(),
            fix_command: String::new(),
            required,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(name: &str, required: bool, message: impl Into<String>, fix_command: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: DetectionStatus::Failed,
            version: String::new(),
            message: message.into(),
            fix_command: fix_command.into(),
            required,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DetectionStatus::Success
    }
}

/// 整体状态：必需项全部通过为 success，部分通过为 partial，一个都没通过为 failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

/// 环境信息摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub status: OverallStatus,
    pub total_required: usize,
    pub total_required_passed: usize,
    pub results: Vec<DetectionResult>,
    pub last_check: DateTime<Utc>,
}

impl EnvironmentInfo {
    pub fn from_results(results: Vec<DetectionResult>) -> Self {
        let required: Vec<_> = results.iter().filter(|r| r.required).collect();
        let total_required = required.len();
        let total_required_passed = required.iter().filter(|r| r.is_success()).count();

        let status = if total_required_passed == total_required {
            OverallStatus::Success
        } else if total_required_passed > 0 {
            OverallStatus::Partial
        } else {
            OverallStatus::Failed
        };

        Self {
            status,
            total_required,
            total_required_passed,
            results,
            last_check: Utc::now(),
        }
    }

    /// 未通过的必需项
    pub fn missing_required(&self) -> impl Iterator<Item = &DetectionResult> {
        self.results.iter().filter(|r| r.required && !r.is_success())
    }
}

/// 检测器接口
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn required(&self) -> bool;

    /// 执行检测；工具缺失或版本过低属于正常的失败结果，只有检测本身出错才返回 Err
    async fn detect(&self) -> crate::core::Result<DetectionResult>;
}
