//! 다운스트림 WebSocket 메시지 타입.
//!
//! 클라이언트 → 서버 제어 명령과 릴레이가 보내는 스냅샷 프레임을 정의합니다.
//!
//! ```json
//! {"action": "ping"}            → {"action": "pong"}
//! {"method": "refresh"}         → 다음 수집 라운드를 앞당김
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 퐁 응답 프레임.
pub const PONG_FRAME: &str = r#"{"action":"pong"}"#;

/// 클라이언트 제어 명령.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// 즉시 퐁 응답
    Ping,
    /// 수집 앞당기기 (`refresh` 또는 `snapshot`)
    Refresh,
}

#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    method: Option<String>,
}

impl ControlCommand {
    /// 텍스트 프레임에서 제어 명령을 해석합니다.
    ///
    /// `action`을 먼저 보고 없으면 `method`를 봅니다. 그 외 프레임은 `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let frame: ControlFrame = serde_json::from_str(text).ok()?;
        let verb = frame.action.or(frame.method)?;

        match verb.as_str() {
            "ping" => Some(ControlCommand::Ping),
            "refresh" | "snapshot" => Some(ControlCommand::Refresh),
            _ => None,
        }
    }
}

/// 소스 하나의 실패 표시.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    /// 소스(채널) 키
    pub source: String,
    /// 실패 원인
    pub reason: String,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

impl SourceError {
    /// 새 실패 표시 생성.
    pub fn new(source: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            source: source.into(),
            reason: reason.to_string(),
        }
    }
}

/// 릴레이 스냅샷 프레임 (채널별로 따로 전송).
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFrame<'a> {
    /// 스냅샷 채널 이름
    pub channel: &'a str,
    /// 대상 주소
    pub address: &'a str,
    /// 원본 응답
    pub data: &'a Value,
    /// 생성 시각 (epoch 밀리초)
    pub t: i64,
}

impl<'a> SnapshotFrame<'a> {
    /// 현재 시각으로 프레임 생성.
    pub fn new(channel: &'a str, address: &'a str, data: &'a Value) -> Self {
        Self {
            channel,
            address,
            data,
            t: Utc::now().timestamp_millis(),
        }
    }
}

/// 스냅샷 호출이 모두 실패했을 때 보내는 합성 에러 프레임.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotErrorFrame<'a> {
    /// 항상 `snapshotError`
    pub channel: &'static str,
    /// 대상 주소
    pub address: &'a str,
    /// 실패 원인 요약
    pub error: String,
    /// 호출별 실패 원인
    pub failures: &'a [SourceError],
    /// 생성 시각 (epoch 밀리초)
    pub t: i64,
}

impl<'a> SnapshotErrorFrame<'a> {
    /// 실패 목록으로 프레임 생성.
    pub fn new(address: &'a str, failures: &'a [SourceError]) -> Self {
        let error = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            channel: "snapshotError",
            address,
            error,
            failures,
            t: Utc::now().timestamp_millis(),
        }
    }
}
