//! 서명 클라이언트 감독 서비스.
//!
//! 서명 WebSocket 클라이언트는 자체 재연결을 하지 않습니다. 이 서비스가
//! 클라이언트를 만들고(연결 + 로그온) 닫히면 고정 대기 후 새로 만듭니다.
//! 요청 경로는 `current()`로 현재 클라이언트를 얻어 씁니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use gateway_exchange::{ApiCredentials, ExchangeResult, SignedClientConfig, SignedWsClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::record_client_rebuild;

/// 클라이언트 생성기.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// 사용 가능한 클라이언트를 만듭니다.
    async fn build(&self) -> ExchangeResult<SignedWsClient>;
}

/// 거래소에 연결하고 세션 로그온까지 마치는 생성기.
#[derive(Debug, Clone)]
pub struct VenueClientFactory {
    config: SignedClientConfig,
    credentials: ApiCredentials,
}

impl VenueClientFactory {
    /// 새 생성기.
    pub fn new(config: SignedClientConfig, credentials: ApiCredentials) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

#[async_trait]
impl ClientFactory for VenueClientFactory {
    async fn build(&self) -> ExchangeResult<SignedWsClient> {
        let client = SignedWsClient::connect(self.config.clone(), self.credentials.clone()).await?;

        if let Err(e) = client.logon().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }
}

/// 클라이언트 감독자.
pub struct ClientSupervisor {
    factory: Arc<dyn ClientFactory>,
    rebuild_delay: Duration,
    current: RwLock<Option<Arc<SignedWsClient>>>,
    attempts: AtomicU64,
}

impl ClientSupervisor {
    /// 새 감독자 생성.
    pub fn new(factory: Arc<dyn ClientFactory>, rebuild_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            factory,
            rebuild_delay,
            current: RwLock::new(None),
            attempts: AtomicU64::new(0),
        })
    }

    /// 현재 사용 가능한 클라이언트.
    pub fn current(&self) -> Option<Arc<SignedWsClient>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 지금까지의 생성 시도 횟수.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 감독 루프를 백그라운드에서 시작합니다.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(shutdown))
    }

    fn replace(&self, client: Option<Arc<SignedWsClient>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let built = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                built = self.factory.build() => built,
            };

            match built {
                Ok(client) => {
                    record_client_rebuild(true);
                    let client = Arc::new(client);
                    self.replace(Some(client.clone()));
                    info!(attempt = self.attempts(), "서명 클라이언트 준비 완료");

                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            self.replace(None);
                            client.close().await;
                            break;
                        }
                        _ = client.closed() => warn!("서명 클라이언트 종료, 재구성 예정"),
                    }
                    self.replace(None);
                }
                Err(e) if e.is_auth_error() => {
                    record_client_rebuild(false);
                    error!(error = %e, "서명 클라이언트 인증 실패");
                }
                Err(e) => {
                    record_client_rebuild(false);
                    warn!(error = %e, "서명 클라이언트 생성 실패");
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.rebuild_delay) => {}
            }
        }

        self.replace(None);
        info!("서명 클라이언트 감독 종료");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_exchange::ExchangeError;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    /// 메모리 소켓으로 클라이언트를 만드는 생성기 (로그온 생략).
    struct InMemoryFactory {
        fail: bool,
        venues: mpsc::UnboundedSender<WebSocketStream<DuplexStream>>,
    }

    #[async_trait]
    impl ClientFactory for InMemoryFactory {
        async fn build(&self) -> ExchangeResult<SignedWsClient> {
            if self.fail {
                return Err(ExchangeError::NetworkError("connection refused".to_string()));
            }

            let (client_io, venue_io) = tokio::io::duplex(1 << 16);
            let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
            let venue_ws = WebSocketStream::from_raw_socket(venue_io, Role::Server, None).await;
            let _ = self.venues.send(venue_ws);

            let config = SignedClientConfig {
                url: "ws://in-memory".to_string(),
                ..SignedClientConfig::default()
            };
            Ok(SignedWsClient::from_stream(
                client_ws,
                config,
                ApiCredentials::hmac("key", "secret"),
            ))
        }
    }

    fn factory(fail: bool) -> (Arc<InMemoryFactory>, mpsc::UnboundedReceiver<WebSocketStream<DuplexStream>>) {
        let (venues, rx) = mpsc::unbounded_channel();
        (Arc::new(InMemoryFactory { fail, venues }), rx)
    }

    async fn wait_current(supervisor: &ClientSupervisor) -> Arc<SignedWsClient> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(client) = supervisor.current().filter(|c| !c.is_closed()) {
                    return client;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_rebuilds_after_transport_drop() {
        let (factory, mut venues) = factory(false);
        let supervisor = ClientSupervisor::new(factory, Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = supervisor.spawn(shutdown.clone());

        let first = venues.recv().await.unwrap();
        let client = wait_current(&supervisor).await;

        drop(first);
        client.closed().await;

        let _second = tokio::time::timeout(Duration::from_secs(2), venues.recv())
            .await
            .unwrap()
            .unwrap();
        let rebuilt = wait_current(&supervisor).await;
        assert!(!Arc::ptr_eq(&client, &rebuilt));
        assert_eq!(supervisor.attempts(), 2);

        shutdown.cancel();
        handle.await.unwrap();
        assert!(supervisor.current().is_none());
        assert!(rebuilt.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_builds_retry_with_fixed_delay() {
        let (factory, _venues) = factory(true);
        let supervisor = ClientSupervisor::new(factory, Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let handle = supervisor.spawn(shutdown.clone());

        // 0s, 5s, 10s에 시도
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(supervisor.attempts(), 3);
        assert!(supervisor.current().is_none());

        shutdown.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(supervisor.attempts(), 3);
    }
}
