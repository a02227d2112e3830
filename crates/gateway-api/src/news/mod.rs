//! 뉴스 수집.
//!
//! - `source`: JSON 엔드포인트 소스 (`FeedSource` 구현)
//! - `normalize`: 중복 제거, 정렬, 개수 제한

pub mod normalize;
pub mod source;

pub use normalize::{normalize_items, parse_timestamp};
pub use source::HttpNewsSource;
