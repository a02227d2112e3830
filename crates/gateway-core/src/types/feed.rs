//! 브로드캐스트 피드 페이로드.
//!
//! 허브가 구독자에게 내보내는 스냅샷 형식입니다. 한 번 만들어진 페이로드는
//! 수정하지 않고 통째로 교체합니다.
//!
//! ```json
//! {"channel": "news", "data": {"wire": [...]}, "failures": ["rss"], "t": 1700000000000}
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 정규화된 피드 항목.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// 소스가 부여한 식별자
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 제목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// 원문 링크 (permalink)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// 소스 키
    pub source: String,
    /// 게시 시각 원문 (RFC3339, RFC2822, epoch 초/밀리초)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// 요약
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// 정규화되지 않은 소스 고유 필드 (그대로 전달)
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl FeedItem {
    /// 소스 키만 가진 빈 항목을 생성합니다.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: None,
            title: None,
            link: None,
            source: source.into(),
            published_at: None,
            summary: None,
            extra: Map::new(),
        }
    }

    /// 중복 제거 키.
    ///
    /// link → title → id 순서로 비어 있지 않은 첫 값을 사용합니다.
    pub fn dedup_key(&self) -> Option<&str> {
        [&self.link, &self.title, &self.id]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

/// 허브 브로드캐스트 페이로드.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPayload {
    /// 채널 태그
    pub channel: String,
    /// 소스별 항목 목록
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Vec<FeedItem>>>,
    /// 이번 라운드에 실패한 소스 키
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<String>>,
    /// 모든 소스가 실패했을 때의 최상위 에러
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 생성 시각 (epoch 밀리초)
    pub t: i64,
}

impl FeedPayload {
    /// 소스별 수집 결과로 페이로드를 조립합니다.
    ///
    /// 실패 목록이 비어 있으면 `failures`를 생략하고, 성공한 소스가 하나도
    /// 없으면 `error`를 채웁니다. 소스가 없는 라운드도 성공한 소스가 없으므로
    /// 에러로 취급합니다.
    pub fn from_round(
        channel: impl Into<String>,
        data: BTreeMap<String, Vec<FeedItem>>,
        failures: Vec<String>,
    ) -> Self {
        let error = if data.is_empty() {
            Some("no sources configured".to_string())
        } else if failures.len() >= data.len() {
            Some(format!("all {} sources failed", failures.len()))
        } else {
            None
        };

        Self {
            channel: channel.into(),
            data: Some(data),
            failures: (!failures.is_empty()).then_some(failures),
            error,
            t: Utc::now().timestamp_millis(),
        }
    }

    /// 특정 소스의 항목 목록.
    pub fn items(&self, source: &str) -> Option<&[FeedItem]> {
        self.data.as_ref()?.get(source).map(Vec::as_slice)
    }

    /// JSON 문자열로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, link: Option<&str>, title: Option<&str>, id: Option<&str>) -> FeedItem {
        FeedItem {
            id: id.map(String::from),
            title: title.map(String::from),
            link: link.map(String::from),
            ..FeedItem::new(source)
        }
    }

    #[test]
    fn test_dedup_key_priority() {
        assert_eq!(item("a", Some("https://x/1"), Some("t"), Some("1")).dedup_key(), Some("https://x/1"));
        assert_eq!(item("a", Some("  "), Some("title"), Some("1")).dedup_key(), Some("title"));
        assert_eq!(item("a", None, None, Some("42")).dedup_key(), Some("42"));
        assert_eq!(item("a", None, None, None).dedup_key(), None);
    }

    #[test]
    fn test_partial_failure_payload() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), Vec::new());
        data.insert("B".to_string(), vec![item("B", Some("https://b/1"), None, None)]);

        let payload = FeedPayload::from_round("news", data, vec!["A".to_string()]);
        assert_eq!(payload.items("A"), Some(&[][..]));
        assert_eq!(payload.items("B").map(|i| i.len()), Some(1));
        assert_eq!(payload.failures, Some(vec!["A".to_string()]));
        assert!(payload.error.is_none());
    }

    #[test]
    fn test_total_failure_payload() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), Vec::new());
        data.insert("B".to_string(), Vec::new());

        let payload =
            FeedPayload::from_round("news", data, vec!["A".to_string(), "B".to_string()]);
        assert!(payload.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(payload.failures.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), vec![item("A", Some("https://a/1"), None, None)]);

        let payload = FeedPayload::from_round("news", data, Vec::new());
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["channel"], "news");
        assert!(json.get("failures").is_none());
        assert!(json.get("error").is_none());
        assert!(json["data"]["A"][0].get("extra").is_none());
        assert!(json["t"].is_i64());
    }

    #[test]
    fn test_empty_round_is_total_failure() {
        let payload = FeedPayload::from_round("news", BTreeMap::new(), Vec::new());
        assert_eq!(payload.error.as_deref(), Some("no sources configured"));
        assert!(payload.failures.is_none());
        assert_eq!(payload.data.as_ref().map(BTreeMap::len), Some(0));
    }

    #[test]
    fn test_extra_fields_flattened() {
        let raw = r#"{"source":"wire","link":"https://w/1","published_at":"1700000000","points":12,"tags":["btc"]}"#;
        let item: FeedItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.published_at.as_deref(), Some("1700000000"));
        assert_eq!(item.extra.get("points"), Some(&serde_json::json!(12)));

        let back: serde_json::Value = serde_json::to_value(&item).unwrap();
        assert_eq!(back["tags"][0], "btc");
        assert_eq!(back["link"], "https://w/1");
    }
}
