//! 설정 관리.
//!
//! 게이트웨이 설정은 기본값 → TOML 파일 → `GATEWAY__*` 환경 변수 순서로
//! 덮어써집니다. 서명용 자격증명은 파일에 두지 않고 환경 변수에서만 읽습니다.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::logging::LogFormat;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 서버 설정
    pub server: ServerConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
    /// 거래소 연결 설정
    pub venue: VenueConfig,
    /// 다운스트림 연결 설정
    pub downstream: DownstreamConfig,
    /// 뉴스 브로드캐스트 허브 설정
    pub hub: HubConfig,
    /// 주소 모니터링 릴레이 설정
    pub relay: RelayConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 거래소 연결 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VenueConfig {
    /// 서명 요청용 WebSocket API URL
    pub ws_api_url: String,
    /// 주소 단위 사용자 피드 WebSocket URL
    pub user_feed_url: String,
    /// 사용자 스냅샷 조회용 REST info URL
    pub info_url: String,
    /// 요청별 응답 대기 시간 (밀리초)
    pub request_timeout_ms: u64,
    /// keepalive 프레임 전송 간격 (초)
    pub keepalive_secs: u64,
    /// 읽기 데드라인 (초)
    pub read_deadline_secs: u64,
    /// 클라이언트 재구성 대기 시간 (초)
    pub reconnect_delay_secs: u64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            ws_api_url: "wss://ws-fapi.binance.com/ws-fapi/v1".to_string(),
            user_feed_url: "wss://api.hyperliquid.xyz/ws".to_string(),
            info_url: "https://api.hyperliquid.xyz/info".to_string(),
            request_timeout_ms: 10_000,
            keepalive_secs: 180,
            read_deadline_secs: 600,
            reconnect_delay_secs: 5,
        }
    }
}

impl VenueConfig {
    /// 요청 타임아웃을 Duration으로 반환
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// keepalive 간격을 Duration으로 반환
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// 읽기 데드라인을 Duration으로 반환
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// 재구성 대기 시간을 Duration으로 반환
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// 다운스트림 연결 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// 송신 큐 용량 (가득 차면 새 메시지를 버림)
    pub queue_capacity: usize,
    /// 메시지당 쓰기 데드라인 (초)
    pub write_deadline_secs: u64,
    /// 읽기 데드라인 (초)
    pub read_deadline_secs: u64,
    /// 프로토콜 ping 전송 간격 (초)
    pub ping_interval_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_deadline_secs: 10,
            read_deadline_secs: 60,
            ping_interval_secs: 54,
        }
    }
}

impl DownstreamConfig {
    /// 쓰기 데드라인을 Duration으로 반환
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    /// 읽기 데드라인을 Duration으로 반환
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// ping 간격을 Duration으로 반환
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// 뉴스 소스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsSourceConfig {
    /// 페이로드에서 사용할 소스 키
    pub key: String,
    /// JSON 엔드포인트 URL
    pub url: String,
    /// 항목 배열이 들어있는 최상위 필드 (없으면 자동 탐색)
    #[serde(default)]
    pub items_field: Option<String>,
}

/// 브로드캐스트 허브 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// 브로드캐스트 채널 이름
    pub channel: String,
    /// 정기 수집 간격 (초)
    pub interval_secs: u64,
    /// 구독자 0명 이후 루프 종료까지 유예 시간 (초)
    pub idle_grace_secs: u64,
    /// 소스별 수집 타임아웃 (초)
    pub source_timeout_secs: u64,
    /// 소스별 최대 항목 수
    pub max_items_per_source: usize,
    /// 수집 대상 소스 목록
    pub sources: Vec<NewsSourceConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel: "news".to_string(),
            interval_secs: 60,
            idle_grace_secs: 30,
            source_timeout_secs: 10,
            max_items_per_source: 50,
            sources: Vec::new(),
        }
    }
}

impl HubConfig {
    /// 수집 간격을 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// 유예 시간을 Duration으로 반환
    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    /// 소스별 타임아웃을 Duration으로 반환
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// 주소 모니터링 릴레이 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 재연결 고정 대기 시간 (초)
    pub backoff_secs: u64,
    /// 업스트림 ping 간격 (초)
    pub keepalive_secs: u64,
    /// REST 스냅샷 갱신 간격 (초)
    pub snapshot_interval_secs: u64,
    /// REST 호출별 타임아웃 (초)
    pub call_timeout_secs: u64,
    /// 업스트림 프레임 쓰기 제한 시간 (초)
    pub write_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backoff_secs: 5,
            keepalive_secs: 30,
            snapshot_interval_secs: 30,
            call_timeout_secs: 10,
            write_timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    /// 재연결 대기 시간을 Duration으로 반환
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// 업스트림 ping 간격을 Duration으로 반환
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// 스냅샷 간격을 Duration으로 반환
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    /// REST 호출 타임아웃을 Duration으로 반환
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// 업스트림 쓰기 제한 시간을 Duration으로 반환
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl GatewayConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다. 로드 후 검증합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> GatewayResult<Self> {
        Self::load("config/default.toml")
    }

    /// 설정 값 사이의 제약을 검사합니다.
    pub fn validate(&self) -> GatewayResult<()> {
        self.logging.format.parse::<LogFormat>()?;

        if self.downstream.ping_interval() >= self.downstream.read_deadline() {
            return Err(GatewayError::InvalidInput(format!(
                "downstream.ping_interval_secs({})는 read_deadline_secs({})보다 짧아야 합니다",
                self.downstream.ping_interval_secs, self.downstream.read_deadline_secs
            )));
        }

        let zero_durations = [
            ("hub.interval_secs", self.hub.interval_secs),
            ("hub.source_timeout_secs", self.hub.source_timeout_secs),
            ("relay.snapshot_interval_secs", self.relay.snapshot_interval_secs),
            ("relay.keepalive_secs", self.relay.keepalive_secs),
            ("relay.write_timeout_secs", self.relay.write_timeout_secs),
            ("venue.keepalive_secs", self.venue.keepalive_secs),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, v)| *v == 0) {
            return Err(GatewayError::InvalidInput(format!("{}는 0보다 커야 합니다", name)));
        }

        // 페이로드는 소스 키로 구분되므로 중복 불가
        let mut keys = HashSet::new();
        if let Some(dup) = self.hub.sources.iter().find(|s| !keys.insert(s.key.as_str())) {
            return Err(GatewayError::InvalidInput(format!(
                "중복된 뉴스 소스 키: {}",
                dup.key
            )));
        }

        Ok(())
    }
}
