//! 피드 항목 정규화.
//!
//! 중복 제거 → 시각 내림차순 정렬 → 개수 제한 순서로 처리합니다.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use gateway_core::FeedItem;

/// 이 값 이상인 epoch 숫자는 밀리초로 간주합니다.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// 게시 시각 문자열을 해석합니다.
///
/// RFC3339, RFC2822, epoch 초/밀리초를 지원합니다. 해석할 수 없으면 `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let epoch: i64 = raw.parse().ok()?;
    if epoch >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

/// 항목 목록을 정규화합니다.
///
/// - link → title → id 순서의 첫 키로 중복 제거 (먼저 나온 항목 유지, 키가 없는 항목은 유지)
/// - 게시 시각 내림차순 정렬 (해석 불가 시각은 가장 오래된 것으로 취급, 동률은 입력 순서 유지)
/// - 최대 `max_items`개로 자름
pub fn normalize_items(items: Vec<FeedItem>, max_items: usize) -> Vec<FeedItem> {
    let mut seen = HashSet::new();
    let mut unique: Vec<(Option<DateTime<Utc>>, FeedItem)> = items
        .into_iter()
        .filter(|item| match item.dedup_key() {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .map(|item| {
            let ts = item.published_at.as_deref().and_then(parse_timestamp);
            (ts, item)
        })
        .collect();

    // None < Some 이므로 역순 비교로 내림차순 + 해석 불가 항목은 뒤로
    unique.sort_by(|a, b| b.0.cmp(&a.0));
    unique.truncate(max_items);
    unique.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, link: Option<&str>, published: Option<&str>) -> FeedItem {
        FeedItem {
            link: link.map(String::from),
            title: link.map(|l| format!("title of {}", l)),
            published_at: published.map(String::from),
            ..FeedItem::new(source)
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T21:00:00+09:00"), Some(expected));
        assert_eq!(parse_timestamp("Fri, 01 Mar 2024 12:00:00 GMT"), Some(expected));
        assert_eq!(parse_timestamp("1709294400"), Some(expected));
        assert_eq!(parse_timestamp("1709294400000"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_shared_link_collapses_across_sources() {
        let items = vec![
            item("A", Some("https://news/1"), Some("2024-03-01T12:00:00Z")),
            item("B", Some("https://news/1"), Some("2024-03-01T13:00:00Z")),
            item("B", Some("https://news/2"), None),
        ];

        let normalized = normalize_items(items, 10);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].source, "A");
    }

    #[test]
    fn test_dedup_falls_back_to_title_then_id() {
        let mut a = FeedItem::new("A");
        a.title = Some("Same headline".to_string());
        let mut b = FeedItem::new("A");
        b.title = Some("Same headline".to_string());
        b.id = Some("2".to_string());
        let mut c = FeedItem::new("A");
        c.id = Some("3".to_string());
        let mut d = FeedItem::new("A");
        d.id = Some("3".to_string());
        let keyless = FeedItem::new("A");

        let normalized = normalize_items(vec![a, b, c, d, keyless.clone(), keyless], 10);
        assert_eq!(normalized.len(), 4);
    }

    #[test]
    fn test_sort_descending_with_unparseable_last() {
        let t2 = "2024-03-02T00:00:00Z";
        let t1 = "2024-03-01T00:00:00Z";
        let items = vec![
            item("A", Some("https://x/t2"), Some(t2)),
            item("A", Some("https://x/missing"), None),
            item("A", Some("https://x/t1"), Some(t1)),
        ];

        let links: Vec<_> = normalize_items(items, 10)
            .into_iter()
            .map(|i| i.link.unwrap())
            .collect();
        assert_eq!(links, vec!["https://x/t2", "https://x/t1", "https://x/missing"]);
    }

    #[test]
    fn test_truncate_keeps_newest() {
        let items: Vec<_> = (0..20)
            .map(|i| {
                item(
                    "A",
                    Some(&format!("https://x/{}", i)),
                    Some(&(1_709_294_400 + i * 60).to_string()),
                )
            })
            .collect();

        let normalized = normalize_items(items, 5);
        assert_eq!(normalized.len(), 5);
        assert_eq!(normalized[0].link.as_deref(), Some("https://x/19"));
        assert_eq!(normalized[4].link.as_deref(), Some("https://x/15"));
    }
}
