//! 检测管理器：并发执行全部检测，汇总整体状态，并把结果缓存到磁盘

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use tokio::sync::RwLock;

use super::network::NetworkProbe;
use super::probe::CommandProbe;
use super::{DetectionResult, Detector, EnvironmentInfo};
use crate::config::{AgentSection, DetectorSection};
use crate::core::{DeskError, Result};

/// 缓存有效期上限（小时），超大配置值按此截断
const MAX_CACHE_EXPIRY_HOURS: u64 = 24 * 365 * 100;

/// 检测管理器
pub struct DetectorManager {
    detectors: Vec<Arc<dyn Detector>>,
    enable_cache: bool,
    cache_expiry: ChronoDuration,
    cache_path: PathBuf,
    cache: RwLock<Option<EnvironmentInfo>>,
}

impl DetectorManager {
    /// 默认检测项：Node.js、npm、Agent CLI、网络连通性、Git
    pub fn new(cfg: &DetectorSection, agent: &AgentSection, data_dir: impl AsRef<Path>) -> Self {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(CommandProbe::node(cfg)),
            Arc::new(CommandProbe::npm(cfg)),
            Arc::new(CommandProbe::agent_cli(&agent.command, cfg)),
            Arc::new(NetworkProbe::from_config(cfg)),
            Arc::new(CommandProbe::git(cfg)),
        ];
        Self::with_detectors(detectors, cfg, data_dir)
    }

    pub fn with_detectors(detectors: Vec<Arc<dyn Detector>>, cfg: &DetectorSection, data_dir: impl AsRef<Path>) -> Self {
        Self {
            detectors,
            enable_cache: cfg.enable_cache,
            cache_expiry: ChronoDuration::hours(cfg.cache_expiry_hours.min(MAX_CACHE_EXPIRY_HOURS) as i64),
            cache_path: data_dir.as_ref().join("cache").join("env_check.json"),
            cache: RwLock::new(None),
        }
    }

    /// 执行全部检测；缓存启用且未过期时直接返回缓存
    pub async fn detect_all(&self) -> Result<EnvironmentInfo> {
        if self.enable_cache {
            if let Some(cached) = self.load_cache().await {
                tracing::debug!(last_check = %cached.last_check, "environment check served from cache");
                *self.cache.write().await = Some(cached.clone());
                return Ok(cached);
            }
        }

        let results = join_all(self.detectors.iter().map(|d| async move {
            match d.detect().await {
                Ok(result) => result,
                Err(e) => DetectionResult::failed(d.name(), d.required(), format!("检测出错: {}", e), ""),
            }
        }))
        .await;

        let info = EnvironmentInfo::from_results(results);
        tracing::info!(
            status = ?info.status,
            required = info.total_required,
            passed = info.total_required_passed,
            "environment check finished"
        );

        if self.enable_cache {
            if let Err(e) = self.save_cache(&info).await {
                tracing::warn!(path = %self.cache_path.display(), error = %e, "failed to write environment cache");
            }
        }

        *self.cache.write().await = Some(info.clone());
        Ok(info)
    }

    /// 只执行指定名称的检测（不读写缓存）
    pub async fn detect_by_name(&self, name: &str) -> Result<DetectionResult> {
        let detector = self
            .detectors
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| DeskError::NotFound(format!("detector {}", name)))?;
        detector.detect().await
    }

    /// 内存中已有结果则直接返回，否则执行检测
    pub async fn status(&self) -> Result<EnvironmentInfo> {
        if let Some(info) = self.cache.read().await.clone() {
            return Ok(info);
        }
        self.detect_all().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        *self.cache.write().await = None;
        match tokio::fs::remove_file(&self.cache_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    async fn load_cache(&self) -> Option<EnvironmentInfo> {
        let data = tokio::fs::read_to_string(&self.cache_path).await.ok()?;
        let info: EnvironmentInfo = match serde_json::from_str(&data) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(path = %self.cache_path.display(), error = %e, "ignoring corrupt environment cache");
                return None;
            }
        };
        if Utc::now() > info.last_check + self.cache_expiry {
            return None;
        }
        Some(info)
    }

    async fn save_cache(&self, info: &EnvironmentInfo) -> Result<()> {
        if let Some(dir) = self.cache_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_string_pretty(info)?;
        tokio::fs::write(&self.cache_path, data).await?;
        Ok(())
    }
}
