//! 게이트웨이 WebSocket 서버 진입점.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::StatusCode;
use axum::{middleware, routing::get, Router};
use gateway_api::metrics::setup_metrics_recorder;
use gateway_api::news::HttpNewsSource;
use gateway_api::services::{ClientSupervisor, VenueClientFactory};
use gateway_api::websocket::{BroadcastHub, FeedSource, HubSettings};
use gateway_api::{create_api_router, metrics_layer, AppState};
use gateway_core::{init_logging, GatewayConfig, LogConfig};
use gateway_exchange::{
    ApiCredentials, HyperliquidFeed, InfoClient, SignedClientConfig, UserFeedConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// CORS 레이어 생성.
///
/// `CORS_ORIGINS`(쉼표 구분)가 설정되어 있으면 해당 origin만 허용하고,
/// 없으면 개발 모드로 간주하여 모든 origin을 허용합니다.
fn cors_layer() -> CorsLayer {
    let allow_origin = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!("CORS configured with {} allowed origins", origins.len());
                AllowOrigin::list(origins)
            }
        }
        _ => {
            warn!("CORS_ORIGINS not set, allowing any origin (development mode)");
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .max_age(Duration::from_secs(3600))
}

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> String {
    handle.render()
}

/// 설정된 뉴스 소스로 허브를 만듭니다.
fn create_hub(config: &GatewayConfig) -> anyhow::Result<BroadcastHub> {
    let settings = HubSettings::from(&config.hub);

    let mut sources: Vec<Arc<dyn FeedSource>> = Vec::with_capacity(config.hub.sources.len());
    for source in &config.hub.sources {
        let news = HttpNewsSource::new(source, settings.source_timeout)
            .with_context(|| format!("뉴스 소스 생성 실패: {}", source.key))?;
        sources.push(Arc::new(news));
    }

    if sources.is_empty() {
        warn!("뉴스 소스가 설정되지 않았습니다. /ws/news는 에러 페이로드만 보냅니다.");
    }
    info!(
        channel = %settings.channel,
        sources = sources.len(),
        interval_secs = settings.interval.as_secs(),
        "뉴스 허브 생성"
    );

    Ok(BroadcastHub::new(settings, sources))
}

/// 자격증명이 있으면 서명 클라이언트 감독자를 시작합니다.
fn start_supervisor(
    config: &GatewayConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<Option<Arc<ClientSupervisor>>> {
    let credentials = match ApiCredentials::from_env() {
        Some(credentials) => credentials.context("서명 자격증명 로드 실패")?,
        None => {
            info!("GATEWAY_API_KEY 미설정, 서명 클라이언트 비활성화");
            return Ok(None);
        }
    };

    info!(scheme = ?credentials.scheme(), "서명 클라이언트 감독 시작");
    let factory = VenueClientFactory::new(SignedClientConfig::from(&config.venue), credentials);
    let supervisor = ClientSupervisor::new(Arc::new(factory), config.venue.reconnect_delay());
    supervisor.spawn(shutdown);

    Ok(Some(supervisor))
}

/// 전체 라우터 생성.
fn create_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    Router::new()
        .merge(metrics_router)
        .merge(create_api_router().with_state(state))
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http())
        // WebSocket 업그레이드 응답은 즉시 반환되므로 연결 수명에는 영향 없음
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(cors_layer())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    let config = GatewayConfig::load_default().context("설정 로드 실패")?;
    init_logging(LogConfig::from_config(&config.logging)?).context("로깅 초기화 실패")?;

    info!("Starting gateway server...");

    let metrics_handle = setup_metrics_recorder().context("메트릭 레코더 설치 실패")?;
    info!("Prometheus metrics recorder initialized");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            error!(
                host = %config.server.host,
                port = config.server.port,
                error = %e,
                "소켓 주소 설정이 유효하지 않습니다. GATEWAY__SERVER__HOST, GATEWAY__SERVER__PORT를 확인하세요."
            );
            e
        })?;

    // 전역 종료 토큰 (백그라운드 태스크에 종료 전파)
    let shutdown_token = CancellationToken::new();

    let hub = create_hub(&config)?;
    let feed_config = UserFeedConfig::from(&config.venue);
    let dialer = Arc::new(HyperliquidFeed::new(feed_config.clone()));
    let fetcher = Arc::new(InfoClient::new(&feed_config).context("info 클라이언트 생성 실패")?);
    let supervisor = start_supervisor(&config, shutdown_token.clone())?;

    let mut state = AppState::new(config, hub.clone(), dialer, fetcher);
    if let Some(supervisor) = supervisor {
        state = state.with_supervisor(supervisor);
    }
    let state = Arc::new(state);
    info!(version = %state.version, has_signed_client = state.supervisor.is_some(), "Application state initialized");

    let app = create_router(state, metrics_handle);

    info!(%addr, "Gateway server listening");
    info!("Metrics available at http://{}/metrics", addr);
    info!("WebSocket available at ws://{}/ws/news and ws://{}/ws/monitor/{{address}}", addr, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    info!("Server shutdown initiated, cleaning up...");
    shutdown_token.cancel();
    hub.shutdown();

    // 백그라운드 태스크가 Close 프레임을 보낼 시간
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = shutdown_token.cancelled() => {
            warn!("Shutdown token cancelled, stopping server...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
