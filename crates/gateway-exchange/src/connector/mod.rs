//! 거래소 커넥터.

pub mod hyperliquid;

pub use hyperliquid::{is_valid_address, HyperliquidFeed, InfoClient, UserFeedConfig};
