//! 도메인 모델.

pub mod aggregate;
pub mod telemetry;
