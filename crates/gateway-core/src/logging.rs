//! tracing 기반 로깅 초기화.
//!
//! 레벨과 형식은 `[logging]` 설정 섹션에서 오며, `RUST_LOG`가 있으면 레벨 필터를
//! 대신합니다. 소켓 라이브러리의 프레임 단위 로그는 기본적으로 `warn` 이상만 남깁니다.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{GatewayError, GatewayResult};

/// 프레임마다 로그를 남기는 의존 크레이트.
const NOISY_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "reqwest"];

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 여러 줄 형식 (개발용)
    #[default]
    Pretty,
    /// 한 줄 JSON, 현재 연결 span 필드 포함 (로그 수집용)
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(GatewayError::InvalidInput(format!(
                "logging.format은 pretty 또는 json이어야 합니다: {}",
                other
            ))),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 기본 레벨 또는 필터 지시어 (예: "info", "gateway_api=debug")
    pub level: String,
    /// 출력 형식
    pub format: LogFormat,
}

impl LogConfig {
    /// 설정 섹션에서 생성합니다.
    pub fn from_config(config: &LoggingConfig) -> GatewayResult<Self> {
        Ok(Self {
            level: config.level.clone(),
            format: config.format.parse()?,
        })
    }

    /// 소음이 많은 크레이트를 `warn`으로 낮춘 필터 지시어.
    pub fn filter_directives(&self) -> String {
        NOISY_TARGETS
            .iter()
            .fold(self.level.clone(), |acc, target| format!("{},{}=warn", acc, target))
    }
}

/// 전역 tracing subscriber를 설치합니다.
///
/// 두 번째 호출이나 잘못된 필터 지시어는 `GatewayError::Config`를 반환합니다.
pub fn init_logging(config: LogConfig) -> GatewayResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter_directives())
            .map_err(|e| GatewayError::Config(format!("로그 필터 해석 실패: {}", e)))?,
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| GatewayError::Config(format!("로깅 초기화 실패: {}", e)))?;

    tracing::info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

/// 연결 단위 span을 생성하는 매크로.
///
/// 다운스트림 연결 ID와 (있다면) 모니터링 대상 주소를 필드로 붙입니다.
#[macro_export]
macro_rules! connection_span {
    ($name:expr, $conn_id:expr) => {
        tracing::info_span!($name, conn_id = %$conn_id)
    };
    ($name:expr, $conn_id:expr, $address:expr) => {
        tracing::info_span!($name, conn_id = %$conn_id, address = %$address)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(level: &str, format: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: format.to_string(),
        }
    }

    #[test]
    fn test_from_config() {
        let config = LogConfig::from_config(&section("debug", "JSON")).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = LogConfig::from_config(&section("info", "compact")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
        assert!(err.to_string().contains("compact"));
    }

    #[test]
    fn test_filter_quiets_socket_crates() {
        let config = LogConfig::from_config(&section("gateway_api=debug", "pretty")).unwrap();
        let directives = config.filter_directives();

        assert!(directives.starts_with("gateway_api=debug,"));
        assert!(directives.contains("tungstenite=warn"));
        assert!(directives.contains("hyper=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
