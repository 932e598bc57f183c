//! 이벤트 버퍼 + 메트릭 엔진.
//!
//! 키당 최근 이벤트 버퍼를 유지하고 슬라이딩 윈도우 집계를 계산한다.
//! 재계산은 디바운스되며(키당 최소 100ms 간격), 키당 동시 컴퓨트는
//! `in_flight` CAS로 1개로 제한된다. 주기적 스윕이 트래픽이 잦아든 뒤에도
//! 집계를 신선하게 유지한다.
//!
//! 키 상태 머신: Uninitialized → Active (첫 이벤트) → (재계산/에이징 반복)
//! → Dormant (버퍼 비움, 다이제스트 제거) → Active (재진입 투명).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowgate_core::config::MetricsConfig;
use flowgate_core::key::AggregationKey;
use flowgate_core::models::aggregate::WindowAggregate;
use flowgate_core::models::telemetry::TelemetryRecord;

use crate::cache_repo::MetricCacheRepository;
use crate::digest::DigestRegistry;

/// 키당 재계산 최소 간격 (디바운스)
const MIN_COMPUTE_INTERVAL_MS: i64 = 100;

/// 버스트 패스트패스 임계값 — 버퍼 길이가 정확히 이 값에 도달하면 즉시 재계산
const BURST_THRESHOLD: usize = 5;

/// 에이징 유예 (초) — 윈도우보다 이만큼 오래된 이벤트만 버린다
const AGE_GRACE_SECS: i64 = 10;

/// 스윕 완료 대기 한도
const SWEEP_TIMEOUT: Duration = Duration::from_secs(5);

/// 버퍼에 보관하는 이벤트 요약 — 집계에 필요한 필드만 유지
#[derive(Debug, Clone)]
struct BufferedEvent {
    timestamp: DateTime<Utc>,
    status_code: u16,
    latency_ms: u64,
    upstream_service: String,
}

/// 키당 상태: 이벤트 버퍼 + 디바운스 셀 + 컴퓨트 인플라이트 플래그
struct KeyState {
    buffer: Mutex<VecDeque<BufferedEvent>>,
    /// 마지막 재계산 시각 (epoch ms), 0 = 아직 없음
    last_compute_ms: AtomicI64,
    /// 키당 동시 컴퓨트 1개 제한
    in_flight: AtomicBool,
}

impl KeyState {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            last_compute_ms: AtomicI64::new(0),
            in_flight: AtomicBool::new(false),
        }
    }
}

/// 엔진 통계
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EngineStats {
    /// 처리한 이벤트 수
    pub events_processed: u64,
    /// 계산한 집계 수
    pub aggregates_computed: u64,
    /// 컴퓨트 클레임 수 (디바운스 통과)
    pub compute_claims: u64,
    /// 활성 키 수
    pub active_keys: usize,
}

struct EngineInner {
    window_seconds: i64,
    states: RwLock<HashMap<String, Arc<KeyState>>>,
    digests: DigestRegistry,
    cache: MetricCacheRepository,
    compute_permits: Arc<Semaphore>,
    events_processed: AtomicU64,
    aggregates_computed: AtomicU64,
    compute_claims: AtomicU64,
}

/// 메트릭 엔진 — 인제스트 핸들러/스위퍼가 공유하는 핸들
#[derive(Clone)]
pub struct MetricEngine {
    inner: Arc<EngineInner>,
}

impl MetricEngine {
    /// 새 엔진 생성
    pub fn new(config: &MetricsConfig, cache: MetricCacheRepository) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                window_seconds: config.window_seconds as i64,
                states: RwLock::new(HashMap::new()),
                digests: DigestRegistry::new(),
                cache,
                compute_permits: Arc::new(Semaphore::new(config.compute_workers.max(1))),
                events_processed: AtomicU64::new(0),
                aggregates_computed: AtomicU64::new(0),
                compute_claims: AtomicU64::new(0),
            }),
        }
    }

    /// 레코드 1건 반영 — 락프리에 가까운 짧은 경로.
    ///
    /// 버퍼 추가 + 다이제스트 갱신 후 디바운스 규칙에 따라 재계산을 클레임한다.
    /// 클레임 성공 시에만 컴퓨트 태스크가 제출된다.
    pub fn record(&self, record: &TelemetryRecord) {
        let key = record.aggregation_key();
        let key_str = key.to_string();
        let state = self.inner.key_state(&key_str);

        let buffer_len = {
            let mut buffer = state.buffer.lock();
            buffer.push_back(BufferedEvent {
                timestamp: record.timestamp,
                status_code: record.status_code,
                latency_ms: record.latency_ms,
                upstream_service: record.upstream_service.clone(),
            });
            buffer.len()
        };

        self.inner.digests.add(&key_str, record.latency_ms as f64);
        self.inner.events_processed.fetch_add(1, Ordering::Relaxed);

        // 디바운스: 첫 관측 / 간격 경과 / 버스트 임계 도달
        let now_ms = Utc::now().timestamp_millis();
        let last = state.last_compute_ms.load(Ordering::Acquire);
        let should_compute = last == 0
            || now_ms - last >= MIN_COMPUTE_INTERVAL_MS
            || buffer_len == BURST_THRESHOLD;

        if should_compute {
            self.try_spawn_compute(key, state, now_ms);
        }
    }

    /// 즉시 재계산 요청 — 배치 인제스트 직후 키별로 호출.
    /// 디바운스 간격을 무시하되 인플라이트 제한은 유지한다.
    pub fn trigger_immediate(&self, key: &AggregationKey) {
        let key_str = key.to_string();
        let state = self.inner.key_state(&key_str);
        self.try_spawn_compute(key.clone(), state, Utc::now().timestamp_millis());
    }

    /// 컴퓨트 클레임 시도 후 태스크 제출
    fn try_spawn_compute(&self, key: AggregationKey, state: Arc<KeyState>, now_ms: i64) {
        if state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // 이미 컴퓨트 진행 중
        }
        state.last_compute_ms.store(now_ms, Ordering::Release);
        self.inner.compute_claims.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _permit = match inner.compute_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    state.in_flight.store(false, Ordering::Release);
                    return;
                }
            };
            inner.compute_and_cache(&key, Utc::now()).await;
            state.in_flight.store(false, Ordering::Release);
        });
    }

    /// 주기적 전체 스윕 1회: 모든 키에 대해 컴퓨트 태스크를 병렬 실행.
    /// 5초 한도로 완료를 기다린다.
    pub async fn sweep_once(&self) {
        let keys: Vec<String> = {
            let states = self.inner.states.read();
            states.keys().cloned().collect()
        };
        if keys.is_empty() {
            return;
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(keys.len());
        for key_str in keys {
            let state = self.inner.key_state(&key_str);
            if state
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue; // 온-인제스트 경로와 클레임 공유
            }
            state
                .last_compute_ms
                .store(Utc::now().timestamp_millis(), Ordering::Release);
            self.inner.compute_claims.fetch_add(1, Ordering::Relaxed);

            let inner = self.inner.clone();
            let key = parse_key(&key_str);
            handles.push(tokio::spawn(async move {
                let _permit = match inner.compute_permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        state.in_flight.store(false, Ordering::Release);
                        return;
                    }
                };
                inner.compute_and_cache(&key, Utc::now()).await;
                state.in_flight.store(false, Ordering::Release);
            }));
        }

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SWEEP_TIMEOUT, join_all).await.is_err() {
            warn!("메트릭 스윕 완료 대기 타임아웃");
        }
    }

    /// 스위퍼 루프: `interval`마다 전체 스윕, 종료 신호에 반응
    pub async fn run_sweeper(
        &self,
        interval: Duration,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        info!("집계 스위퍼 시작: 간격 {}ms", interval.as_millis());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("집계 스위퍼 종료");
    }

    /// 엔진 통계
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            events_processed: self.inner.events_processed.load(Ordering::Relaxed),
            aggregates_computed: self.inner.aggregates_computed.load(Ordering::Relaxed),
            compute_claims: self.inner.compute_claims.load(Ordering::Relaxed),
            active_keys: self.inner.states.read().len(),
        }
    }

    /// 키의 현재 버퍼 길이 (테스트/디버그용)
    pub fn buffer_len(&self, key: &AggregationKey) -> usize {
        let key_str = key.to_string();
        let states = self.inner.states.read();
        states
            .get(&key_str)
            .map(|s| s.buffer.lock().len())
            .unwrap_or(0)
    }

    /// 키의 다이제스트 존재 여부 (테스트/디버그용)
    pub fn has_digest(&self, key: &AggregationKey) -> bool {
        self.inner.digests.contains(&key.to_string())
    }

    #[cfg(test)]
    async fn compute_at(&self, key: &AggregationKey, now: DateTime<Utc>) {
        self.inner.compute_and_cache(key, now).await;
    }
}

/// `"{path}:{METHOD}"` 문자열을 키로 복원.
/// 메서드에는 `:`가 없으므로 마지막 구분자 기준으로 나눈다.
fn parse_key(key_str: &str) -> AggregationKey {
    match key_str.rsplit_once(':') {
        Some((path, method)) => AggregationKey::new(path, method),
        None => AggregationKey::new(key_str, "GET"),
    }
}

impl EngineInner {
    /// 키 상태 조회/생성
    fn key_state(&self, key_str: &str) -> Arc<KeyState> {
        {
            let states = self.states.read();
            if let Some(state) = states.get(key_str) {
                return state.clone();
            }
        }
        let mut states = self.states.write();
        states
            .entry(key_str.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone()
    }

    /// 컴퓨트 태스크 본체: 에이징 → 윈도우 스캔 → 집계 → 동기 캐시 저장.
    /// 키 하나의 실패가 다른 키/스위퍼에 번지지 않도록 에러는 삼킨다.
    async fn compute_and_cache(&self, key: &AggregationKey, now: DateTime<Utc>) {
        let key_str = key.to_string();

        self.age_out(&key_str, now);

        let window_start = now - ChronoDuration::seconds(self.window_seconds);
        let Some(stats) = self.scan_window(&key_str, window_start) else {
            return; // 윈도우 내 이벤트 없음
        };

        let aggregate = self.build_aggregate(key, &stats, window_start, now);
        if let Err(e) = self.cache.save_sync(key, &aggregate).await {
            error!("집계 캐시 저장 실패 ({key_str}): {e}");
            return;
        }
        self.aggregates_computed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "집계 계산: {key_str} — {}건, {:.2} RPS",
            aggregate.request_count, aggregate.rps
        );
    }

    /// `window + 10초`보다 오래된 이벤트 제거.
    /// 버퍼가 비면 키를 Dormant로 — 다이제스트도 함께 버린다.
    fn age_out(&self, key_str: &str, now: DateTime<Utc>) {
        let state = {
            let states = self.states.read();
            match states.get(key_str) {
                Some(state) => state.clone(),
                None => return,
            }
        };

        let cutoff = now - ChronoDuration::seconds(self.window_seconds + AGE_GRACE_SECS);
        let emptied = {
            let mut buffer = state.buffer.lock();
            buffer.retain(|e| e.timestamp >= cutoff);
            buffer.is_empty()
        };

        if emptied && self.digests.remove(key_str) {
            debug!("키 휴면 전환, 다이제스트 제거: {key_str}");
        }
    }

    /// 윈도우 내 이벤트를 단일 패스로 스캔.
    /// 전체 복사 없이 집계에 필요한 값만 누적한다.
    fn scan_window(&self, key_str: &str, window_start: DateTime<Utc>) -> Option<WindowStats> {
        let state = {
            let states = self.states.read();
            states.get(key_str)?.clone()
        };
        let buffer = state.buffer.lock();

        let mut stats = WindowStats::default();
        for event in buffer.iter() {
            if event.timestamp <= window_start {
                continue;
            }
            if stats.count == 0 {
                stats.upstream_service = event.upstream_service.clone();
                stats.earliest = event.timestamp;
                stats.latest = event.timestamp;
            } else {
                stats.earliest = stats.earliest.min(event.timestamp);
                stats.latest = stats.latest.max(event.timestamp);
            }
            stats.count += 1;
            if event.status_code >= 400 {
                stats.errors += 1;
            }
            stats.min_latency = stats.min_latency.min(event.latency_ms);
            stats.max_latency = stats.max_latency.max(event.latency_ms);
            stats.latencies.push(event.latency_ms);
        }

        (stats.count > 0).then_some(stats)
    }

    /// 윈도우 통계로 집계 생성
    fn build_aggregate(
        &self,
        key: &AggregationKey,
        stats: &WindowStats,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> WindowAggregate {
        let count = stats.count;
        let errors = stats.errors;
        let error_rate = if count > 0 {
            errors as f64 * 100.0 / count as f64
        } else {
            0.0
        };

        let (p50, p90, p99) = self.percentiles(&key.to_string(), &stats.latencies);

        WindowAggregate {
            endpoint: key.path.clone(),
            method: key.method.clone(),
            window_start,
            window_end,
            request_count: count,
            rps: compute_rps(count, stats.earliest, stats.latest, self.window_seconds),
            p50_latency_ms: p50,
            p90_latency_ms: p90,
            p99_latency_ms: p99,
            min_latency_ms: stats.min_latency,
            max_latency_ms: stats.max_latency,
            error_rate,
            error_count: errors,
            success_count: count - errors,
            upstream_service: stats.upstream_service.clone(),
        }
    }

    /// 다이제스트 분위수, 없으면 윈도우 샘플 정렬 폴백
    fn percentiles(&self, key_str: &str, latencies: &[u64]) -> (u64, u64, u64) {
        if let Some((p50, p90, p99)) = self.digests.percentiles(key_str) {
            return (p50 as u64, p90 as u64, p99 as u64);
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();
        let pick = |q: f64| -> u64 {
            if sorted.is_empty() {
                return 0;
            }
            let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
            sorted[idx]
        };
        (pick(0.50), pick(0.90), pick(0.99))
    }
}

/// 윈도우 스캔 누적값
struct WindowStats {
    count: u64,
    errors: u64,
    min_latency: u64,
    max_latency: u64,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
    upstream_service: String,
    latencies: Vec<u64>,
}

impl Default for WindowStats {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            min_latency: u64::MAX,
            max_latency: 0,
            earliest: Utc::now(),
            latest: Utc::now(),
            upstream_service: String::new(),
            latencies: Vec::new(),
        }
    }
}

/// RPS 계산 규칙.
///
/// - 이벤트 시간 폭이 1초 이상: `count / span_secs`
/// - 1초 미만(0 초과): 순간 RPS와 윈도우 평균 중 큰 값 — 버스트 포착
/// - 단일 시점: `count / window_seconds`
fn compute_rps(
    count: u64,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
    window_seconds: i64,
) -> f64 {
    let window_secs = window_seconds.max(1) as f64;
    let span_ms = (latest - earliest).num_milliseconds();

    if span_ms >= 1_000 {
        count as f64 / (span_ms as f64 / 1000.0)
    } else if span_ms > 0 {
        let instant_rps = count as f64 / (span_ms as f64 / 1000.0);
        let window_rps = count as f64 / window_secs;
        instant_rps.max(window_rps)
    } else {
        count as f64 / window_secs
    }
}
