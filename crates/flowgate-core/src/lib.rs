//! # flowgate-core
//!
//! FLOWGATE 도메인 코어.
//! 텔레메트리 레코드/집계 모델, 집계 키 정규화, 공통 에러, 설정, 포트 정의.
//!
//! 어댑터 crate(`flowgate-cache`, `flowgate-storage`)는 이 crate의 포트를
//! 구현하고, 서비스 crate(`flowgate-gateway`, `flowgate-analytics`)는
//! 포트를 통해서만 외부 의존성(KV, 관계형 저장소)에 접근한다.

pub mod config;
pub mod error;
pub mod key;
pub mod models;
pub mod ports;

pub use error::CoreError;
pub use key::AggregationKey;
pub use models::aggregate::WindowAggregate;
pub use models::telemetry::TelemetryRecord;
