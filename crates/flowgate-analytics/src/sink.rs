//! 원시 이벤트 싱크.
//!
//! 유계 큐 + 고정 워커 풀. 레코드를 배치로 모아 관계형 저장소에 기록한다.
//! 큐가 가득 차면 즉시 버리고 카운트한다 — 요청 경로는 계속 흐른다.
//! 저장소가 죽어도 배치를 재큐잉하지 않는다 (메트릭 엔진은 영속화와 독립).

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowgate_core::config::AnalyticsConfig;
use flowgate_core::error::CoreError;
use flowgate_core::models::telemetry::TelemetryRecord;
use flowgate_core::ports::event_store::EventStore;

/// 워커 큐 폴링 간격
const POLL_SLEEP: Duration = Duration::from_millis(50);

/// 종료 시 워커 join 한도
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 드랍 경고 주기 (N건마다 1회)
const DROP_WARN_EVERY: u64 = 1_000;

struct SinkInner {
    queue: SegQueue<TelemetryRecord>,
    queue_size: AtomicUsize,
    capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
    store: Arc<dyn EventStore>,
    running: AtomicBool,
    processed: AtomicU64,
    dropped: AtomicU64,
    duplicates_skipped: AtomicU64,
}

/// 싱크 통계
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SinkStats {
    /// 저장 완료 레코드 수
    pub processed: u64,
    /// 드랍된 레코드 수 (큐 포화 + 저장 실패)
    pub dropped: u64,
    /// 중복으로 건너뛴 레코드 수
    pub duplicates_skipped: u64,
    /// 현재 큐 크기
    pub queue_size: usize,
}

/// 원시 이벤트 싱크 — 유계 큐 + 배치 워커 풀
#[derive(Clone)]
pub struct RawEventSink {
    inner: Arc<SinkInner>,
}

impl RawEventSink {
    /// 새 싱크 생성 (워커는 `start`로 기동)
    pub fn new(store: Arc<dyn EventStore>, config: &AnalyticsConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                queue: SegQueue::new(),
                queue_size: AtomicUsize::new(0),
                capacity: config.effective_queue_capacity(),
                batch_size: config.batch.size.max(1),
                flush_interval: Duration::from_millis(config.batch.flush_interval_ms),
                store,
                running: AtomicBool::new(true),
                processed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                duplicates_skipped: AtomicU64::new(0),
            }),
        }
    }

    /// 워커 풀 기동
    pub fn start(&self, workers: usize) -> Vec<JoinHandle<()>> {
        info!(
            "원시 싱크 기동: 워커={}개, 배치={}건, 플러시={}ms, 큐 용량={}",
            workers,
            self.inner.batch_size,
            self.inner.flush_interval.as_millis(),
            self.inner.capacity,
        );
        (0..workers)
            .map(|i| {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    worker_loop(inner, i).await;
                })
            })
            .collect()
    }

    /// 논블로킹 인큐 — 포화 시 드랍 + 카운트, true = 수용
    pub fn enqueue(&self, record: TelemetryRecord) -> bool {
        let inner = &self.inner;
        if !inner.running.load(Ordering::Acquire) {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if inner.queue_size.load(Ordering::Relaxed) >= inner.capacity {
            let dropped = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % DROP_WARN_EVERY == 0 {
                warn!("원시 싱크 큐 포화, 누적 드랍 {dropped}건");
            }
            return false;
        }

        inner.queue.push(record);
        inner.queue_size.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 종료: 신규 수용 중단, 워커들이 잔여 큐를 비우도록 한 뒤 join (10초 한도)
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.inner.running.store(false, Ordering::Release);

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, join_all).await.is_err() {
            warn!("원시 싱크 워커 join 타임아웃");
        }

        let stats = self.stats();
        info!(
            "원시 싱크 종료: 저장 {}건, 드랍 {}건, 중복 {}건",
            stats.processed, stats.dropped, stats.duplicates_skipped
        );
    }

    /// 싱크 통계
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            processed: self.inner.processed.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            duplicates_skipped: self.inner.duplicates_skipped.load(Ordering::Relaxed),
            queue_size: self.inner.queue_size.load(Ordering::Relaxed),
        }
    }

    /// 현재 큐 크기
    pub fn queue_size(&self) -> usize {
        self.inner.queue_size.load(Ordering::Relaxed)
    }
}

/// 워커 루프: 큐 폴링 → 로컬 배치 → (크기 OR 시간) 트리거로 플러시.
/// 종료 신호 후에도 큐가 빌 때까지 돌고 마지막 배치를 플러시한다.
async fn worker_loop(inner: Arc<SinkInner>, worker_id: usize) {
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

    // 잔여 배치 플러시
    if !batch.is_empty() {
        flush_batch(&inner, &mut batch).await;
    }
    debug!("원시 싱크 워커 {worker_id} 종료");
}

/// 배치 플러시.
///
/// 제약 위반으로 배치 전체가 거부되면 개별 삽입으로 폴백해 중복만 건너뛴다.
/// 저장소 장애면 배치를 버린다 — 재큐잉하면 장애 동안 무한 루프가 된다.
async fn flush_batch(inner: &Arc<SinkInner>, batch: &mut Vec<TelemetryRecord>) {
    if batch.is_empty() {
        return;
    }

    match inner.store.save_batch(batch).await {
        Ok(saved) => {
            let total = inner.processed.fetch_add(saved as u64, Ordering::Relaxed) + saved as u64;
            if total % 50_000 < saved as u64 {
                info!(
                    "원시 이벤트 누적 {total}건 저장, 큐 크기 {}",
                    inner.queue_size.load(Ordering::Relaxed)
                );
            }
        }
        Err(CoreError::Duplicate(_)) => {
            debug!(
                "배치 삽입 제약 위반, {}건 개별 삽입으로 폴백",
                batch.len()
            );
            save_individually(inner, batch).await;
        }
        Err(e) => {
            error!("배치 {}건 저장 실패, 배치 드랍: {e}", batch.len());
            inner.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
    }

    batch.clear();
}

/// 개별 삽입 폴백 — 중복은 조용히 건너뛰고 카운트
async fn save_individually(inner: &Arc<SinkInner>, batch: &[TelemetryRecord]) {
    for record in batch {
        match inner.store.save_one(record).await {
            Ok(true) => {
                inner.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                inner.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("개별 삽입 실패 ({}): {e}", record.request_id);
                inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
