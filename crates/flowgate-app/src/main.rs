//! # flowgate-app
//!
//! FLOWGATE 바이너리 진입점.
//! DI 컨테이너 역할 — 어댑터 생성, 게이트웨이/분석 서비스 기동, 순서 있는 종료.

mod lifecycle;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flowgate_analytics::{AnalyticsServer, AppState};
use flowgate_cache::MemoryKvStore;
use flowgate_core::config::AppConfig;
use flowgate_gateway::{GatewayServer, GatewayState};
use flowgate_storage::SqliteEventStore;

use crate::lifecycle::LifecycleManager;

/// 실행 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 게이트웨이 + 분석 서비스 모두 실행
    All,
    /// 게이트웨이만
    Gateway,
    /// 분석 서비스만
    Analytics,
}

/// FLOWGATE — API 게이트웨이 + 실시간 분석 파이프라인
#[derive(Parser, Debug)]
#[command(name = "flowgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 실행 모드
    #[arg(long, short = 'm', value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// 설정 파일 경로 (JSON)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 게이트웨이 포트 오버라이드
    #[arg(long)]
    gateway_port: Option<u16>,

    /// 분석 서비스 포트 오버라이드
    #[arg(long)]
    analytics_port: Option<u16>,

    /// 분석 서비스 URL 오버라이드 (게이트웨이 이미터용)
    #[arg(long)]
    analytics_url: Option<String>,

    /// 데이터 저장 경로 (기본: 플랫폼 데이터 디렉토리)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

/// 설정 로드: 파일(JSON) → CLI 오버라이드 → 검증
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("설정 파일 읽기 실패: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("설정 파일 파싱 실패: {}", path.display()))?
        }
        None => AppConfig::default(),
    };

    if let Some(port) = args.gateway_port {
        config.gateway.port = port;
    }
    if let Some(port) = args.analytics_port {
        config.analytics.port = port;
    }
    if let Some(ref url) = args.analytics_url {
        config.gateway.telemetry.analytics_url = url.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow!("설정 검증 실패: {e}"))?;
    Ok(config)
}

/// 데이터베이스 경로 결정 (CLI 인자 또는 플랫폼 기본 경로)
fn resolve_db_path(data_dir: Option<&PathBuf>) -> PathBuf {
    data_dir
        .map(|d| d.join("flowgate.db"))
        .or_else(|| {
            ProjectDirs::from("io", "pseudotop", "flowgate")
                .map(|p| p.data_dir().join("flowgate.db"))
        })
        .unwrap_or_else(|| PathBuf::from("./flowgate.db"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // tracing 초기화
    let log_filter = format!(
        "flowgate={level},flowgate_app={level},flowgate_core={level},flowgate_gateway={level},flowgate_analytics={level},flowgate_storage={level},flowgate_cache={level}",
        level = args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    info!("FLOWGATE 시작 (모드: {:?})", args.mode);

    let config = load_config(&args)?;
    let lifecycle = Arc::new(LifecycleManager::new());

    // ── 어댑터 생성 (DI 와이어링) ──

    // 1. 공유 KV (레이트리밋 카운터 + 메트릭 캐시)
    let kv = Arc::new(MemoryKvStore::new());

    // 2. 원시 이벤트 저장소 (분석 모드에서만)
    let run_analytics = matches!(args.mode, Mode::All | Mode::Analytics);
    let run_gateway = matches!(args.mode, Mode::All | Mode::Gateway);

    let mut server_tasks = Vec::new();
    let mut analytics_state: Option<AppState> = None;
    let mut sink_handles = Vec::new();
    let mut gateway_state: Option<GatewayState> = None;
    let mut emitter_handle = None;

    // ── 분석 서비스 ──
    if run_analytics {
        let db_path = resolve_db_path(args.data_dir.as_ref());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteEventStore::open(&db_path)?);
        info!("원시 이벤트 저장소: {}", db_path.display());

        let state = AppState::new(&config.analytics, kv.clone(), store);

        // 싱크 워커 풀
        sink_handles = state.sink.start(config.analytics.effective_workers());

        // 집계 스위퍼
        let sweeper_engine = state.engine.clone();
        let sweeper_rx = lifecycle.subscribe();
        let sweep_interval = config.analytics.metrics.aggregation_interval();
        tokio::spawn(async move {
            sweeper_engine.run_sweeper(sweep_interval, sweeper_rx).await;
        });

        // HTTP 서버
        let server = AnalyticsServer::new(config.analytics.clone(), state.clone());
        let server_rx = lifecycle.subscribe();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(server_rx).await {
                error!("분석 서비스 오류: {e}");
            }
        }));

        analytics_state = Some(state);
    }

    // ── 게이트웨이 ──
    if run_gateway {
        let state = GatewayState::new(config.gateway.clone(), kv.clone())?;

        // 이미터 배치 워커
        emitter_handle = Some(state.emitter.start());

        let server = GatewayServer::new(state.clone());
        let server_rx = lifecycle.subscribe();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(server_rx).await {
                error!("게이트웨이 오류: {e}");
            }
        }));

        gateway_state = Some(state);
    }

    info!("FLOWGATE 실행 중 (Ctrl+C로 종료)");
    lifecycle.wait_for_signal().await;

    // ── 순서 있는 종료 ──
    // 1. 서버들이 신규 요청 수용 중단 (graceful shutdown은 watch로 이미 전파됨)
    for task in server_tasks {
        let _ = task.await;
    }

    // 2. 이미터 드레인 + 마지막 플러시 (5초 join)
    if let (Some(state), Some(handle)) = (gateway_state.as_ref(), emitter_handle) {
        state.emitter.shutdown(handle).await;
    }

    // 3. 원시 싱크 드레인 (10초 join)
    if let Some(state) = analytics_state.as_ref() {
        state.sink.shutdown(sink_handles).await;
    }

    info!("FLOWGATE 종료");
    Ok(())
}
