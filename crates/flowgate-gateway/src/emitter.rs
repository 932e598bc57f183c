//! 텔레메트리 이미터.
//!
//! 요청 경로의 유일한 경합 지점은 락프리 큐 push다. 배치 워커 하나가
//! 큐를 비우며 (크기 OR 시간) 트리거로 분석 서비스에 POST한다.
//! 분석 서비스가 죽어도 게이트웨이는 절대 막히지 않는다 — 배치를 버리고 센다.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowgate_core::config::TelemetryConfig;
use flowgate_core::error::CoreError;
use flowgate_core::models::telemetry::TelemetryRecord;

/// 워커 큐 폴링 간격
const POLL_SLEEP: Duration = Duration::from_millis(20);

/// 플러시 재시도 횟수 (총 시도)
const FLUSH_MAX_ATTEMPTS: u32 = 3;

/// 재시도 초기 지연
const FLUSH_RETRY_BASE: Duration = Duration::from_millis(200);

/// HTTP 요청 타임아웃
const FLUSH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 종료 시 워커 join 한도
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 드랍 경고 주기 (N건마다 1회)
const DROP_WARN_EVERY: u64 = 1_000;

struct EmitterInner {
    queue: SegQueue<TelemetryRecord>,
    queue_size: AtomicUsize,
    capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
    /// 배치 인제스트 엔드포인트 (analytics_url + "/ingest/batch")
    endpoint: String,
    client: reqwest::Client,
    running: AtomicBool,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// 이미터 통계
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EmitterStats {
    /// 전송 완료 레코드 수
    pub emitted: u64,
    /// 드랍된 레코드 수 (큐 포화 + 재시도 소진)
    pub dropped: u64,
    /// 현재 큐 크기
    pub queue_size: usize,
}

/// 텔레메트리 이미터 — 논블로킹 팬인, fire-and-forget 아웃
#[derive(Clone)]
pub struct TelemetryEmitter {
    inner: Arc<EmitterInner>,
}

impl TelemetryEmitter {
    /// 새 이미터 생성 (워커는 `start`로 기동)
    pub fn new(config: &TelemetryConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(FLUSH_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {e}")))?;

        Ok(Self {
            inner: Arc::new(EmitterInner {
                queue: SegQueue::new(),
                queue_size: AtomicUsize::new(0),
                capacity: config.effective_queue_capacity(),
                batch_size: config.batch_size.max(1),
                flush_interval: Duration::from_millis(config.batch_flush_interval_ms),
                endpoint: format!(
                    "{}/ingest/batch",
                    config.analytics_url.trim_end_matches('/')
                ),
                client,
                running: AtomicBool::new(true),
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        })
    }

    /// 배치 워커 기동
    pub fn start(&self) -> JoinHandle<()> {
        info!(
            "텔레메트리 이미터 기동: 엔드포인트={}, 배치={}건, 플러시={}ms, 큐 용량={}",
            self.inner.endpoint,
            self.inner.batch_size,
            self.inner.flush_interval.as_millis(),
            self.inner.capacity,
        );
        let inner = self.inner.clone();
        tokio::spawn(async move {
            worker_loop(inner).await;
        })
    }

    /// 논블로킹 방출. 큐 포화 시 드랍 + 카운트.
    pub fn emit(&self, record: TelemetryRecord) {
        let inner = &self.inner;
        if !inner.running.load(Ordering::Acquire) {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if inner.queue_size.load(Ordering::Relaxed) >= inner.capacity {
            let dropped = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % DROP_WARN_EVERY == 0 {
                warn!("텔레메트리 큐 포화, 누적 드랍 {dropped}건");
            }
            return;
        }

        inner.queue.push(record);
        inner.queue_size.fetch_add(1, Ordering::Relaxed);
    }

    /// 종료: 신규 수용 중단 → 잔여 큐 드레인 + 마지막 플러시 → join (5초 한도)
    pub async fn shutdown(&self, handle: JoinHandle<()>) {
        self.inner.running.store(false, Ordering::Release);
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
            warn!("텔레메트리 워커 join 타임아웃");
        }
        let stats = self.stats();
        info!(
            "텔레메트리 이미터 종료: 전송 {}건, 드랍 {}건",
            stats.emitted, stats.dropped
        );
    }

    /// 이미터 통계
    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            emitted: self.inner.emitted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            queue_size: self.inner.queue_size.load(Ordering::Relaxed),
        }
    }

    /// 현재 큐 크기
    pub fn queue_size(&self) -> usize {
        self.inner.queue_size.load(Ordering::Relaxed)
    }
}

/// 배치 워커 루프. 종료 신호 후에도 큐를 다 비우고 마지막 플러시를 수행한다.
async fn worker_loop(inner: Arc<EmitterInner>) {
    let mut batch: Vec<TelemetryRecord> = Vec::with_capacity(inner.batch_size);
    let mut last_flush = Instant::now();

    loop {
        let running = inner.running.load(Ordering::Acquire);
        if !running && inner.queue_size.load(Ordering::Relaxed) == 0 {
            break;
        }

        match inner.queue.pop() {
            Some(record) => {
                inner.queue_size.fetch_sub(1, Ordering::Relaxed);
                batch.push(record);
            }
            None => {
                tokio::time::sleep(POLL_SLEEP).await;
            }
        }

        let should_flush = batch.len() >= inner.batch_size
            || (!batch.is_empty() && last_flush.elapsed() >= inner.flush_interval);

        if should_flush {
            flush_batch(&inner, &mut batch).await;
            last_flush = Instant::now();
        }
    }

    if !batch.is_empty() {
        flush_batch(&inner, &mut batch).await;
    }
    debug!("텔레메트리 워커 종료");
}

/// 배치 플러시: exponential backoff 재시도 (200ms 시작, 총 3회).
/// 4xx는 재시도하지 않는다. 최종 실패 시 배치를 버리고 센다.
async fn flush_batch(inner: &Arc<EmitterInner>, batch: &mut Vec<TelemetryRecord>) {
    if batch.is_empty() {
        return;
    }

    let mut delay = FLUSH_RETRY_BASE;
    for attempt in 1..=FLUSH_MAX_ATTEMPTS {
        match inner.client.post(&inner.endpoint).json(&batch).send().await {
            Ok(resp) if resp.status().is_success() => {
                let emitted =
                    inner.emitted.fetch_add(batch.len() as u64, Ordering::Relaxed)
                        + batch.len() as u64;
                if emitted % 10_000 < batch.len() as u64 {
                    info!("텔레메트리 누적 {emitted}건 전송");
                }
                batch.clear();
                return;
            }
            Ok(resp) if resp.status().is_client_error() => {
                // 4xx는 일시적이지 않음 — 재시도 없이 드랍
                error!(
                    "텔레메트리 배치 {}건 거부됨 ({}), 드랍",
                    batch.len(),
                    resp.status()
                );
                break;
            }
            Ok(resp) => {
                warn!(
                    "텔레메트리 배치 전송 실패 (시도 {attempt}/{FLUSH_MAX_ATTEMPTS}): 상태 {}",
                    resp.status()
                );
            }
            Err(e) => {
                warn!(
                    "텔레메트리 배치 전송 실패 (시도 {attempt}/{FLUSH_MAX_ATTEMPTS}): {e}"
                );
                if e.is_connect() {
                    debug!("분석 서비스 연결 불가: {}", inner.endpoint);
                }
            }
        }

        if attempt < FLUSH_MAX_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    let dropped = inner.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed)
        + batch.len() as u64;
    error!(
        "텔레메트리 배치 {}건 최종 실패, 드랍 (누적 {dropped}건)",
        batch.len()
    );
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_record(id: &str) -> TelemetryRecord {
        TelemetryRecord {
            request_id: id.to_string(),
            path: "/api/users".to_string(),
            method: "GET".to_string(),
            status_code: 200,
            latency_ms: 10,
            client_id: "abcdefgh".to_string(),
            api_key: String::new(),
            upstream_service: String::new(),
            route_id: String::new(),
            timestamp: Utc::now(),
            error_type: None,
            user_agent: None,
            ip_address: None,
        }
    }

    fn make_config(url: &str, capacity: usize, batch_size: usize, flush_ms: u64) -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            analytics_url: url.to_string(),
            batch_size,
            batch_flush_interval_ms: flush_ms,
            queue_capacity: capacity,
        }
    }

    #[tokio::test]
    async fn emit_and_flush() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest/batch")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 100, 50)).unwrap();
        let handle = emitter.start();

        for i in 0..10 {
            emitter.emit(make_record(&format!("req-{i}")));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        emitter.shutdown(handle).await;

        assert_eq!(emitter.stats().emitted, 10);
        assert_eq!(emitter.queue_size(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn drop_on_full_is_counted() {
        let emitter = TelemetryEmitter::new(&make_config(
            "http://localhost:1", // 연결 안 되는 주소 — 워커 미기동이라 무관
            5,
            100,
            10_000,
        ))
        .unwrap();

        for i in 0..5 {
            emitter.emit(make_record(&format!("req-{i}")));
        }
        assert_eq!(emitter.queue_size(), 5);

        // 용량 초과분 N건은 정확히 N건 드랍
        for i in 0..3 {
            emitter.emit(make_record(&format!("over-{i}")));
        }
        assert_eq!(emitter.stats().dropped, 3);
        assert_eq!(emitter.queue_size(), 5);
    }

    #[tokio::test]
    async fn batch_boundary_size_trigger() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest/batch")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        // batch_size=4, 플러시 간격은 충분히 길게 — 크기 트리거만 동작
        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 4, 60_000)).unwrap();
        let handle = emitter.start();

        for i in 0..4 {
            emitter.emit(make_record(&format!("req-{i}")));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(emitter.stats().emitted, 4);
        mock.assert_async().await;

        emitter.shutdown(handle).await;
    }

    #[tokio::test]
    async fn batch_boundary_time_trigger() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ingest/batch")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        // batch_size=10, 플러시 간격 100ms — K-1건은 시간 트리거로 플러시
        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 10, 100)).unwrap();
        let handle = emitter.start();

        for i in 0..9 {
            emitter.emit(make_record(&format!("req-{i}")));
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(emitter.stats().emitted, 9);

        emitter.shutdown(handle).await;
    }

    #[tokio::test]
    async fn transient_error_retried_then_dropped() {
        let mut server = mockito::Server::new_async().await;
        // 503은 일시적 — 총 3회 시도 후 드랍
        let mock = server
            .mock("POST", "/ingest/batch")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 1, 50)).unwrap();
        let handle = emitter.start();

        emitter.emit(make_record("req-1"));

        // backoff 200ms + 400ms를 포함해 충분히 대기
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        emitter.shutdown(handle).await;

        assert_eq!(emitter.stats().emitted, 0);
        assert_eq!(emitter.stats().dropped, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest/batch")
            .with_status(400)
            .expect(1) // 재시도 없이 1회만
            .create_async()
            .await;

        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 1, 50)).unwrap();
        let handle = emitter.start();

        emitter.emit(make_record("req-1"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        emitter.shutdown(handle).await;

        assert_eq!(emitter.stats().emitted, 0);
        assert_eq!(emitter.stats().dropped, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_analytics_drops_after_retries() {
        // 연결 불가 주소 — 재시도 소진 후 드랍, 게이트웨이는 계속 동작
        let emitter =
            TelemetryEmitter::new(&make_config("http://127.0.0.1:1", 1000, 1, 20)).unwrap();
        let handle = emitter.start();

        emitter.emit(make_record("req-1"));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        emitter.shutdown(handle).await;

        assert_eq!(emitter.stats().emitted, 0);
        assert_eq!(emitter.stats().dropped, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ingest/batch")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        // 크기/시간 트리거가 모두 멀어서 종료 드레인만 플러시함
        let emitter =
            TelemetryEmitter::new(&make_config(&server.url(), 1000, 10_000, 60_000)).unwrap();
        let handle = emitter.start();

        for i in 0..17 {
            emitter.emit(make_record(&format!("req-{i}")));
        }

        emitter.shutdown(handle).await;
        assert_eq!(emitter.stats().emitted, 17);
    }

    #[tokio::test]
    async fn emit_after_shutdown_dropped() {
        let emitter =
            TelemetryEmitter::new(&make_config("http://127.0.0.1:1", 1000, 10, 50)).unwrap();
        let handle = emitter.start();
        emitter.shutdown(handle).await;

        emitter.emit(make_record("late"));
        assert_eq!(emitter.stats().dropped, 1);
    }
}
