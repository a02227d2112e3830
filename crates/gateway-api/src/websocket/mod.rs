//! 다운스트림 WebSocket 서버.
//!
//! # 엔드포인트
//!
//! - `/ws/news`: 모든 구독자가 하나의 허브 스냅샷을 공유
//! - `/ws/monitor/{address}`: 연결마다 업스트림 릴레이 세션 하나
//!
//! # 메시지 형식
//!
//! ## 클라이언트 → 서버
//!
//! ```json
//! {"action": "ping"}
//! {"action": "refresh"}
//! ```
//!
//! ## 서버 → 클라이언트
//!
//! ```json
//! {"action": "pong"}
//! {"channel": "news", "data": {...}, "t": 1700000000000}
//! {"channel": "openOrders", "address": "0x...", "data": [...], "t": 1700000000000}
//! ```

pub mod connection;
pub mod handler;
pub mod hub;
pub mod messages;
pub mod relay;
pub mod trigger;

pub use connection::{spawn_connection, ConnectionConfig, Downstream, WsFrame};
pub use handler::{monitor_handler, news_handler, websocket_router};
pub use hub::{BroadcastHub, FeedSource, HubSettings};
pub use messages::{ControlCommand, SnapshotErrorFrame, SnapshotFrame, SourceError, PONG_FRAME};
pub use relay::{RelaySession, RelaySettings};
pub use trigger::{CoalescedTrigger, TriggerReceiver};
