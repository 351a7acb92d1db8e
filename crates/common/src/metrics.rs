//! Prometheus 监控指标模块
//!
//! 提供全局指标收集和导出功能

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== 认证指标 ==========

    /// Token 刷新次数（按结果分组）
    pub static ref TOKEN_REFRESHES: IntCounterVec = IntCounterVec::new(
        Opts::new("token_refreshes_total", "Total number of identity token refreshes")
            .namespace("sessioncast"),
        &["status"]
    ).unwrap();

    // ========== 会话目录指标 ==========

    /// 会话发布次数（initial / republish）
    pub static ref SESSION_PUBLISHES: IntCounterVec = IntCounterVec::new(
        Opts::new("session_publishes_total", "Total number of session records published")
            .namespace("sessioncast"),
        &["kind"]
    ).unwrap();

    /// 心跳失败次数
    pub static ref HEARTBEAT_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("heartbeat_failures_total", "Total number of failed session heartbeats")
            .namespace("sessioncast")
    ).unwrap();

    // ========== Peer 指标 ==========

    /// 建立成功的 peer 连接数
    pub static ref PEERS_ESTABLISHED: IntCounter = IntCounter::with_opts(
        Opts::new("peers_established_total", "Total number of peer connections established")
            .namespace("sessioncast")
    ).unwrap();

    /// 协商失败次数（按原因分组）
    pub static ref NEGOTIATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("negotiation_failures_total", "Total number of failed peer negotiations")
            .namespace("sessioncast"),
        &["reason"]
    ).unwrap();

    // ========== 中继指标 ==========

    /// 当前活跃的中继路由
    pub static ref ACTIVE_ROUTES: IntGauge = IntGauge::with_opts(
        Opts::new("active_routes", "Number of active relay routes")
            .namespace("sessioncast")
    ).unwrap();

    /// 中继流量统计（字节）
    pub static ref RELAY_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("relay_bytes_total", "Total bytes relayed")
            .namespace("sessioncast"),
        &["direction"]
    ).unwrap();

    /// 因队列溢出丢弃的数据报
    pub static ref RELAY_DROPPED: IntCounter = IntCounter::with_opts(
        Opts::new("relay_dropped_total", "Total datagrams dropped on queue overflow")
            .namespace("sessioncast")
    ).unwrap();
}

/// 注册所有指标到全局 Registry
///
/// This function is idempotent - calling it multiple times is safe.
/// Only the first call will actually register the metrics.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(TOKEN_REFRESHES.clone()))?;

            REGISTRY.register(Box::new(SESSION_PUBLISHES.clone()))?;
            REGISTRY.register(Box::new(HEARTBEAT_FAILURES.clone()))?;

            REGISTRY.register(Box::new(PEERS_ESTABLISHED.clone()))?;
            REGISTRY.register(Box::new(NEGOTIATION_FAILURES.clone()))?;

            REGISTRY.register(Box::new(ACTIVE_ROUTES.clone()))?;
            REGISTRY.register(Box::new(RELAY_BYTES.clone()))?;
            REGISTRY.register(Box::new(RELAY_DROPPED.clone()))?;

            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// 导出 Prometheus 文本格式的指标
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// 用于关闭时日志输出的简要统计
pub fn summary() -> String {
    format!(
        "peers_established={} negotiation_failures={} relay_bytes_in={} relay_bytes_out={} relay_dropped={} heartbeat_failures={}",
        PEERS_ESTABLISHED.get(),
        NEGOTIATION_FAILURES
            .with_label_values(&["timeout"])
            .get()
            + NEGOTIATION_FAILURES.with_label_values(&["error"]).get(),
        RELAY_BYTES.with_label_values(&["peer_to_local"]).get(),
        RELAY_BYTES.with_label_values(&["local_to_peer"]).get(),
        RELAY_DROPPED.get(),
        HEARTBEAT_FAILURES.get(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_register_metrics() {
        // 注册应该成功（或者已经注册过了）
        let result = register_metrics();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    #[serial]
    fn test_gather_text() {
        let _ = register_metrics();

        ACTIVE_ROUTES.set(3);
        RELAY_BYTES.with_label_values(&["local_to_peer"]).inc_by(100);

        let output = gather_text();
        assert!(
            output.contains("sessioncast_active_routes"),
            "Output should contain active_routes metric. Output: {output}"
        );
        assert!(output.contains("sessioncast_relay_bytes_total"));

        ACTIVE_ROUTES.set(0);
    }

    #[test]
    #[serial]
    fn test_summary_mentions_counters() {
        let text = summary();
        assert!(text.contains("peers_established="));
        assert!(text.contains("relay_dropped="));
    }
}
