//! 애플리케이션 설정 구조체.
//!
//! 게이트웨이(인증/레이트리밋/라우트/텔레메트리)와 분석 서비스(윈도우/배치/큐)
//! 런타임 설정을 정의한다. serde 기본값 + CLI 인자 오버라이드.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 게이트웨이 설정
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// 분석 서비스 설정
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

// ============================================================
// 게이트웨이 설정
// ============================================================

/// 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 리스닝 포트
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// 인증/레이트리밋을 건너뛰는 경로 프리픽스 목록
    ///
    /// 인증 필터와 레이트리밋 필터가 동일한 목록을 공유한다.
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
    /// 인증 설정
    #[serde(default)]
    pub auth: AuthConfig,
    /// 레이트리밋 설정
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 텔레메트리 이미터 설정
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// 라우트 테이블
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// 업스트림 요청 타임아웃 (밀리초)
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            skip_paths: default_skip_paths(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            telemetry: TelemetryConfig::default(),
            routes: Vec::new(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

/// 인증 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 인증 필터 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API 키 최소 길이
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_key_length: default_min_key_length(),
        }
    }
}

/// 레이트리밋 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 레이트리밋 필터 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 클라이언트당 분당 요청 한도
    ///
    /// 원본 문서에는 1,000,000으로 표기된 곳이 있으나 실제 배포 설정값인
    /// 60을 기본값으로 채택한다.
    #[serde(default = "default_requests_per_minute")]
    pub default_requests_per_minute: u64,
    /// 카운터 윈도우 TTL (초)
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_requests_per_minute: default_requests_per_minute(),
            window_secs: default_rate_window_secs(),
        }
    }
}

/// 텔레메트리 이미터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// 텔레메트리 방출 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 분석 서비스 베이스 URL (예: "http://localhost:9000/api/v1/telemetry")
    #[serde(default = "default_analytics_url")]
    pub analytics_url: String,
    /// 배치 크기
    #[serde(default = "default_emitter_batch_size")]
    pub batch_size: usize,
    /// 플러시 간격 (밀리초)
    #[serde(default = "default_emitter_flush_interval_ms")]
    pub batch_flush_interval_ms: u64,
    /// 큐 용량 (0이면 기본값으로 대체)
    #[serde(default = "default_emitter_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analytics_url: default_analytics_url(),
            batch_size: default_emitter_batch_size(),
            batch_flush_interval_ms: default_emitter_flush_interval_ms(),
            queue_capacity: default_emitter_queue_capacity(),
        }
    }
}

impl TelemetryConfig {
    /// 유효 큐 용량 — 0 또는 미설정이면 기본값으로 폴백
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            default_emitter_queue_capacity()
        } else {
            self.queue_capacity
        }
    }
}

/// 라우트 설정 — 프리픽스 매칭 + 세그먼트 스트립 + 업스트림 URI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// 라우트 식별자 (예: "user-service")
    pub id: String,
    /// 매칭할 경로 프리픽스 (예: "/api/users")
    pub path_prefix: String,
    /// 포워딩 전에 제거할 선행 경로 세그먼트 수
    #[serde(default)]
    pub strip_prefix: usize,
    /// 업스트림 베이스 URI (예: "http://user-service:8081")
    pub upstream: String,
}

// ============================================================
// 분석 서비스 설정
// ============================================================

/// 분석 서비스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// 리스닝 포트
    #[serde(default = "default_analytics_port")]
    pub port: u16,
    /// 메트릭 엔진 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 원시 싱크 배치 설정
    #[serde(default)]
    pub batch: BatchConfig,
    /// 원시 싱크 큐 용량 (0이면 기본값으로 대체)
    #[serde(default = "default_sink_queue_capacity")]
    pub queue_capacity: usize,
    /// 원시 싱크 워커 수
    #[serde(default = "default_sink_workers")]
    pub workers: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            port: default_analytics_port(),
            metrics: MetricsConfig::default(),
            batch: BatchConfig::default(),
            queue_capacity: default_sink_queue_capacity(),
            workers: default_sink_workers(),
        }
    }
}

impl AnalyticsConfig {
    /// 유효 큐 용량 — 0이면 기본값으로 폴백
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            default_sink_queue_capacity()
        } else {
            self.queue_capacity
        }
    }

    /// 유효 워커 수 — 0이면 기본값으로 폴백
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            default_sink_workers()
        } else {
            self.workers
        }
    }
}

/// 메트릭 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 슬라이딩 윈도우 길이 (초)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// 주기적 전체 스윕 간격 (밀리초)
    #[serde(default = "default_aggregation_interval_ms")]
    pub aggregation_interval_ms: u64,
    /// 컴퓨트 워커 수
    #[serde(default = "default_compute_workers")]
    pub compute_workers: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            aggregation_interval_ms: default_aggregation_interval_ms(),
            compute_workers: default_compute_workers(),
        }
    }
}

impl MetricsConfig {
    /// 윈도우 길이를 Duration으로 반환
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// 스윕 간격을 Duration으로 반환
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_millis(self.aggregation_interval_ms)
    }
}

/// 원시 싱크 배치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// 배치 크기
    #[serde(default = "default_sink_batch_size")]
    pub size: usize,
    /// 플러시 간격 (밀리초)
    #[serde(default = "default_sink_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_sink_batch_size(),
            flush_interval_ms: default_sink_flush_interval_ms(),
        }
    }
}

// ============================================================
// 검증
// ============================================================

impl AppConfig {
    /// 기동 시 치명적인 설정 오류 검사.
    ///
    /// 용량류(0 허용, 기본값 폴백)와 달리 업스트림 URI 누락은 치명적이다.
    pub fn validate(&self) -> Result<(), CoreError> {
        for route in &self.gateway.routes {
            if route.upstream.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "라우트 {} 의 업스트림 URI가 비어 있음",
                    route.id
                )));
            }
            if !route.path_prefix.starts_with('/') {
                return Err(CoreError::Config(format!(
                    "라우트 {} 의 경로 프리픽스는 /로 시작해야 함: {}",
                    route.id, route.path_prefix
                )));
            }
        }
        if self.analytics.metrics.window_seconds == 0 {
            return Err(CoreError::Config(
                "analytics.metrics.window_seconds는 0일 수 없음".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}

fn default_gateway_port() -> u16 {
    8080
}
fn default_analytics_port() -> u16 {
    9000
}
fn default_skip_paths() -> Vec<String> {
    vec!["/health".to_string(), "/admin".to_string()]
}
fn default_min_key_length() -> usize {
    8
}
fn default_requests_per_minute() -> u64 {
    60
}
fn default_rate_window_secs() -> u64 {
    60
}
fn default_analytics_url() -> String {
    "http://localhost:9000/api/v1/telemetry".to_string()
}
fn default_emitter_batch_size() -> usize {
    1_000
}
fn default_emitter_flush_interval_ms() -> u64 {
    500
}
fn default_emitter_queue_capacity() -> usize {
    1_000_000
}
fn default_upstream_timeout_ms() -> u64 {
    30_000
}
fn default_window_seconds() -> u64 {
    60
}
fn default_aggregation_interval_ms() -> u64 {
    2_000
}
fn default_compute_workers() -> usize {
    8
}
fn default_sink_queue_capacity() -> usize {
    1_000_000
}
fn default_sink_workers() -> usize {
    8
}
fn default_sink_batch_size() -> usize {
    5_000
}
fn default_sink_flush_interval_ms() -> u64 {
    500
}
