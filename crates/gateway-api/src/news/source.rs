//! JSON 엔드포인트 기반 뉴스 소스.

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{FeedItem, NewsSourceConfig};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::FetchError;
use crate::websocket::hub::FeedSource;

/// 항목 배열을 찾을 때 살펴보는 최상위 필드 (순서대로).
const ITEM_FIELDS: [&str; 5] = ["items", "articles", "data", "results", "news"];

/// HTTP JSON 뉴스 소스.
#[derive(Debug, Clone)]
pub struct HttpNewsSource {
    key: String,
    url: String,
    items_field: Option<String>,
    client: Client,
}

impl HttpNewsSource {
    /// 설정으로 소스 생성.
    pub fn new(config: &NewsSourceConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            key: config.key.clone(),
            url: config.url.clone(),
            items_field: config.items_field.clone(),
            client,
        })
    }

    /// 응답 본문에서 항목 배열을 찾습니다.
    fn item_array<'a>(&self, body: &'a Value) -> Option<&'a Vec<Value>> {
        if let Some(field) = &self.items_field {
            return body.get(field).and_then(Value::as_array);
        }

        body.as_array().or_else(|| {
            ITEM_FIELDS
                .iter()
                .find_map(|field| body.get(field).and_then(Value::as_array))
        })
    }
}

#[async_trait]
impl FeedSource for HttpNewsSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        let entries = self
            .item_array(&body)
            .ok_or_else(|| FetchError::Decode("no item array in response".to_string()))?;

        let items: Vec<FeedItem> = entries
            .iter()
            .filter_map(Value::as_object)
            .map(|entry| parse_item(&self.key, entry))
            .collect();

        debug!(source = %self.key, count = items.len(), "뉴스 수집 완료");
        Ok(items)
    }
}

/// 여러 후보 필드 중 첫 번째 문자열/숫자 값을 가져옵니다.
fn first_text(entry: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match entry.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

const ID_FIELDS: &[&str] = &["id", "guid", "uuid"];
const TITLE_FIELDS: &[&str] = &["title", "headline"];
const LINK_FIELDS: &[&str] = &["link", "url", "permalink"];
const PUBLISHED_FIELDS: &[&str] = &[
    "published",
    "published_at",
    "pubDate",
    "datetime",
    "time",
    "created_at",
];
const SUMMARY_FIELDS: &[&str] = &["summary", "description", "body"];

/// JSON 객체 하나를 피드 항목으로 변환합니다.
///
/// 알려진 필드에 해당하지 않는 값은 `extra`로 그대로 옮깁니다.
fn parse_item(source: &str, entry: &Map<String, Value>) -> FeedItem {
    let known = [ID_FIELDS, TITLE_FIELDS, LINK_FIELDS, PUBLISHED_FIELDS, SUMMARY_FIELDS];
    let extra = entry
        .iter()
        .filter(|(key, _)| key.as_str() != "source")
        .filter(|(key, _)| !known.iter().any(|fields| fields.contains(&key.as_str())))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    FeedItem {
        id: first_text(entry, ID_FIELDS),
        title: first_text(entry, TITLE_FIELDS),
        link: first_text(entry, LINK_FIELDS),
        published_at: first_text(entry, PUBLISHED_FIELDS),
        summary: first_text(entry, SUMMARY_FIELDS),
        extra,
        ..FeedItem::new(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(url: String, items_field: Option<&str>) -> HttpNewsSource {
        HttpNewsSource::new(
            &NewsSourceConfig {
                key: "wire".to_string(),
                url,
                items_field: items_field.map(String::from),
            },
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_item_field_aliases() {
        let entry = json!({
            "guid": 17,
            "headline": "Rates unchanged",
            "url": "https://wire/17",
            "datetime": 1709294400,
            "description": "  ",
            "points": 31
        });
        let item = parse_item("wire", entry.as_object().unwrap());

        assert_eq!(item.id.as_deref(), Some("17"));
        assert_eq!(item.title.as_deref(), Some("Rates unchanged"));
        assert_eq!(item.link.as_deref(), Some("https://wire/17"));
        assert_eq!(item.published_at.as_deref(), Some("1709294400"));
        assert_eq!(item.summary, None);
        assert_eq!(item.extra.len(), 1);
        assert_eq!(item.extra["points"], json!(31));
        assert_eq!(item.source, "wire");
    }

    #[tokio::test]
    async fn test_fetch_auto_detects_item_array() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/news")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"articles":[{"title":"a","link":"https://x/a"}, 5, {"title":"b"}]}"#)
            .create_async()
            .await;

        let items = source(format!("{}/news", server.url()), None)
            .fetch()
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_fetch_with_configured_field() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/feed")
            .with_status(200)
            .with_body(r#"{"items":[{"title":"ignored"}],"stories":[{"title":"used"}]}"#)
            .create_async()
            .await;

        let items = source(format!("{}/feed", server.url()), Some("stories"))
            .fetch()
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("used"));
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let mut server = mockito::Server::new_async().await;
        let _down = server
            .mock("GET", "/down")
            .with_status(503)
            .create_async()
            .await;
        let _odd = server
            .mock("GET", "/odd")
            .with_status(200)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let err = source(format!("{}/down", server.url()), None).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));

        let err = source(format!("{}/odd", server.url()), None).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
