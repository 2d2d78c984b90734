//! 포트 인터페이스 (trait).
//!
//! 파이프라인(`dualagent-pipeline`)과 저장소(`dualagent-storage`)가
//! 이 trait들을 구현하거나 소비하며, `dualagent-app`에서 `Arc<dyn T>`로 와이어링한다.
//!
//! 모든 async trait은 `async_trait` 매크로를 사용하여 object safety를 보장한다.

pub mod buffer;
pub mod ingest;
pub mod storage;
