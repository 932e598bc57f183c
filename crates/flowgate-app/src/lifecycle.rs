//! 라이프사이클 관리.
//!
//! OS 시그널을 받아 watch 채널로 종료를 전파한다. 모든 장기 태스크
//! (서버, 스위퍼, 워커)는 subscribe()로 받은 수신기를 감시한다.

use tokio::sync::watch;
use tracing::{info, warn};

/// 종료 신호 브로드캐스터
pub struct LifecycleManager {
    tx: watch::Sender<bool>,
}

impl LifecycleManager {
    /// 새 관리자 생성
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// 종료 신호 수신기 발급
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// 종료 신호 전파
    pub fn shutdown(&self) {
        if self.tx.send(true).is_err() {
            warn!("종료 신호 수신자 없음");
        }
    }

    /// Ctrl+C 대기
    pub async fn wait_for_signal(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("종료 시그널 수신"),
            Err(e) => warn!("시그널 대기 실패: {e}"),
        }
        self.shutdown();
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
