//! Paginated, filterable reads over a subject's events.
//!
//! The store only understands key ranges, so client and status filters are
//! applied after fetching. The engine pulls store pages until it holds at least
//! `page * limit` raw items or the chain ends, filters that prefix, and slices
//! the requested page out of it. A page deep into a sparse filter can therefore
//! come back short even though more matches exist further along; `exhausted`
//! tells the caller whether `total` covers the whole partition.

use super::{EventStore, KeyRange};
use crate::error::{Error, Result};
use crate::types::{AccessEvent, EventPage, EventQuery};

/// Read path over an [`EventStore`].
pub struct QueryEngine<'a> {
    store: &'a dyn EventStore,
    store_page_size: usize,
}

impl<'a> QueryEngine<'a> {
    /// `store_page_size` is how many items one continuation page returns.
    pub fn new(store: &'a dyn EventStore, store_page_size: usize) -> Self {
        Self {
            store,
            store_page_size: store_page_size.max(1),
        }
    }

    /// List one page of a subject's events.
    pub fn list(&self, subject_id: &str, query: &EventQuery) -> Result<EventPage> {
        validate(query)?;

        let range = KeyRange {
            from: query.time_from,
            to: query.time_to,
        };
        let wanted = query.page.saturating_mul(query.limit);

        let mut raw: Vec<AccessEvent> = Vec::new();
        let mut token: Option<String> = None;
        let mut store_pages = 0usize;

        let exhausted = loop {
            let page = self.store.query_events(
                subject_id,
                &range,
                token.as_deref(),
                self.store_page_size,
                query.descending,
            )?;
            store_pages += 1;
            raw.extend(page.items);
            token = page.next;

            if token.is_none() {
                break true;
            }
            if raw.len() >= wanted {
                break false;
            }
        };

        let matched: Vec<AccessEvent> = raw
            .into_iter()
            .filter(|e| query.client.as_deref().map_or(true, |c| e.client == c))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .collect();

        let total = matched.len();
        let offset = (query.page - 1).saturating_mul(query.limit);
        let items: Vec<AccessEvent> = matched
            .into_iter()
            .skip(offset)
            .take(query.limit)
            .collect();

        tracing::debug!(
            subject_id,
            page = query.page,
            limit = query.limit,
            store_pages,
            total,
            exhausted,
            "Listed events"
        );

        Ok(EventPage {
            page: query.page,
            limit: query.limit,
            total,
            items,
            exhausted,
        })
    }
}

fn validate(query: &EventQuery) -> Result<()> {
    if query.page == 0 {
        return Err(Error::InvalidQuery("page must be at least 1".to_string()));
    }
    if query.limit == 0 {
        return Err(Error::InvalidQuery("limit must be at least 1".to_string()));
    }
    if let (Some(from), Some(to)) = (query.time_from, query.time_to) {
        if from > to {
            return Err(Error::InvalidQuery(
                "time_from must not be after time_to".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_WRITE_CHUNK;
    use crate::db::Database;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 10, 10, 20, 0, 0).unwrap()
    }

    /// Ten events, one second apart; even ones from 10.0.0.1 with status 200,
    /// odd ones from 10.0.0.2 with status 404.
    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let events: Vec<AccessEvent> = (0..10)
            .map(|i| AccessEvent {
                subject_id: "s1".to_string(),
                ordering_key: base() + Duration::seconds(i),
                client: if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" }.to_string(),
                method: "GET".to_string(),
                path: format!("/p{}", i),
                status: if i % 2 == 0 { 200 } else { 404 },
                bytes: 10,
            })
            .collect();
        for chunk in events.chunks(MAX_WRITE_CHUNK) {
            db.put_events(chunk).unwrap();
        }
        db
    }

    fn paths(page: &EventPage) -> Vec<&str> {
        page.items.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_pages_concatenate_in_key_order() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 3);

        let mut seen = Vec::new();
        for page in 1..=3 {
            let result = engine
                .list(
                    "s1",
                    &EventQuery {
                        page,
                        limit: 4,
                        ..Default::default()
                    },
                )
                .unwrap();
            seen.extend(result.items.into_iter().map(|e| e.path));
        }

        let expected: Vec<String> = (0..10).map(|i| format!("/p{}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_stops_fetching_once_page_is_covered() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 3);

        let first = engine.list("s1", &EventQuery { page: 1, limit: 2, ..Default::default() }).unwrap();
        assert_eq!(paths(&first), vec!["/p0", "/p1"]);
        // Only one store page (3 items) was needed
        assert_eq!(first.total, 3);
        assert!(!first.exhausted);

        let all = engine.list("s1", &EventQuery { page: 1, limit: 50, ..Default::default() }).unwrap();
        assert_eq!(all.total, 10);
        assert!(all.exhausted);
    }

    #[test]
    fn test_filters_apply_after_fetch() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 100);

        let by_status = engine
            .list(
                "s1",
                &EventQuery {
                    status: Some(404),
                    limit: 3,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(paths(&by_status), vec!["/p1", "/p3", "/p5"]);
        assert_eq!(by_status.total, 5);

        let by_client = engine
            .list(
                "s1",
                &EventQuery {
                    client: Some("10.0.0.1".to_string()),
                    status: Some(404),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(by_client.items.is_empty());
        assert_eq!(by_client.total, 0);
    }

    #[test]
    fn test_filtered_pages_concatenate_to_full_filtered_set() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 100);

        let cases: [(Option<&str>, Option<u16>, Vec<&str>); 2] = [
            (None, Some(404), vec!["/p1", "/p3", "/p5", "/p7", "/p9"]),
            (Some("10.0.0.1"), None, vec!["/p0", "/p2", "/p4", "/p6", "/p8"]),
        ];

        for (client, status, expected) in cases {
            let mut seen: Vec<String> = Vec::new();
            for page in 1..=4 {
                let result = engine
                    .list(
                        "s1",
                        &EventQuery {
                            page,
                            limit: 2,
                            client: client.map(str::to_string),
                            status,
                            ..Default::default()
                        },
                    )
                    .unwrap();
                assert_eq!(result.total, expected.len());
                assert!(result.exhausted);
                seen.extend(result.items.into_iter().map(|e| e.path));
            }

            assert_eq!(seen, expected);
            let unique: std::collections::BTreeSet<&String> = seen.iter().collect();
            assert_eq!(unique.len(), seen.len());
        }
    }

    #[test]
    fn test_time_window_and_descending() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 2);

        let page = engine
            .list(
                "s1",
                &EventQuery {
                    time_from: Some(base() + Duration::seconds(2)),
                    time_to: Some(base() + Duration::seconds(5)),
                    descending: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(paths(&page), vec!["/p5", "/p4", "/p3", "/p2"]);
        assert!(page.exhausted);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 4);
        let page = engine
            .list("s1", &EventQuery { page: 5, limit: 5, ..Default::default() })
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 10);
        assert!(page.exhausted);
    }

    #[test]
    fn test_unknown_subject_is_empty() {
        let db = seeded_db();
        let page = QueryEngine::new(&db, 10)
            .list("nobody", &EventQuery::default())
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_invalid_queries_rejected() {
        let db = seeded_db();
        let engine = QueryEngine::new(&db, 10);

        for query in [
            EventQuery { page: 0, ..Default::default() },
            EventQuery { limit: 0, ..Default::default() },
            EventQuery {
                time_from: Some(base() + Duration::seconds(5)),
                time_to: Some(base()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                engine.list("s1", &query),
                Err(Error::InvalidQuery(_))
            ));
        }
    }
}
