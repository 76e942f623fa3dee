//! 网络连通性探测：向 API 端点发 HEAD 请求，失败时按配置重试

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{DetectionResult, Detector};
use crate::config::DetectorSection;
use crate::core::Result;

const FIX_SUGGESTION: &str = "请检查：
1. 网络连接是否正常
2. 是否需要配置代理
3. 防火墙设置
4. DNS 解析是否正常

如需使用代理，请在环境变量中设置：
export HTTP_PROXY=http://proxy.example.com:port
export HTTPS_PROXY=http://proxy.example.com:port";

/// API 端点可达性检测（必需）
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    name: String,
    url: String,
    required: bool,
    retry_count: u32,
    retry_delay: Duration,
    client: Client,
}

impl NetworkProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, retry_count: u32) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            name: "网络连通性".to_string(),
            url: url.into(),
            required: true,
            retry_count: retry_count.max(1),
            retry_delay: Duration::from_secs(1),
            client,
        }
    }

    pub fn from_config(cfg: &DetectorSection) -> Self {
        Self::new(
            cfg.network_url.clone(),
            Duration::from_secs(cfg.network_timeout_secs),
            cfg.network_retry_count,
        )
    }

    /// 连接失败后、下一次重试前的等待
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Detector for NetworkProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn detect(&self) -> Result<DetectionResult> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry_count {
            match self.client.head(&self.url).send().await {
                // 5xx 以外的任何响应都说明端点可达
                Ok(resp) if !resp.status().is_server_error() => {
                    let code = resp.status().as_u16();
                    tracing::debug!(url = %self.url, status = code, attempt, "api endpoint reachable");
                    return Ok(DetectionResult::success(
                        &self.name,
                        self.required,
                        "",
                        format!("网络连接正常，API 端点可访问（状态码: {}）", code),
                    ));
                }
                Ok(resp) => {
                    last_error = format!("API 返回错误状态码: {}", resp.status().as_u16());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retry_count {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
            tracing::debug!(url = %self.url, attempt, error = %last_error, "api endpoint probe failed");
        }

        tracing::warn!(url = %self.url, error = %last_error, "api endpoint unreachable");
        Ok(DetectionResult::failed(
            &self.name,
            self.required,
            format!("无法连接到 Claude API: {}", last_error),
            FIX_SUGGESTION,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 本地 HTTP 端点：每个连接回同一个状态行，并统计连接数
    async fn serve(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    /// 本地端点不经过环境变量里的代理
    fn local_probe(url: String, retry_count: u32) -> NetworkProbe {
        let mut probe = NetworkProbe::new(url, Duration::from_secs(5), retry_count).with_retry_delay(Duration::ZERO);
        probe.client = Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap();
        probe
    }

    #[tokio::test]
    async fn test_reachable_endpoint_succeeds() {
        let (url, hits) = serve("404 Not Found").await;
        let probe = local_probe(url, 3);
        let result = probe.detect().await.unwrap();
        assert_eq!(result.status, DetectionStatus::Success);
        assert!(result.message.contains("404"));
        assert!(result.required);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_fails() {
        let (url, hits) = serve("503 Service Unavailable").await;
        let probe = local_probe(url, 2);
        let result = probe.detect().await.unwrap();
        assert_eq!(result.status, DetectionStatus::Failed);
        assert!(result.message.contains("503"));
        assert!(result.fix_command.contains("HTTPS_PROXY"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refused_connection_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = local_probe(format!("http://{}", addr), 2);
        let result = probe.detect().await.unwrap();
        assert_eq!(result.status, DetectionStatus::Failed);
        assert!(result.message.starts_with("无法连接到 Claude API"));
    }

    #[tokio::test]
    async fn test_from_config_uses_detector_section() {
        let cfg = DetectorSection {
            network_url: "http://localhost:1".into(),
            network_retry_count: 0,
            ..DetectorSection::default()
        };
        let probe = NetworkProbe::from_config(&cfg);
        assert_eq!(probe.url(), "http://localhost:1");
        assert_eq!(probe.retry_count, 1);
        assert_eq!(probe.name(), "网络连通性");
    }
}
