//! End-to-end scenarios against the SQLite adapter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use ministore_core::schema::{FieldSpec, FieldType, Schema};
use ministore_core::{Cancel, CursorMode, IndexOptions};
use ministore_query::Rank;
use ministore_storage::{Index, SearchRequest, Show, SqliteDriver};

/// A controllable wall clock.
#[derive(Clone)]
struct Clock(Arc<AtomicI64>);

impl Clock {
    fn at(start_ms: i64) -> Self {
        Self(Arc::new(AtomicI64::new(start_ms)))
    }

    fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }

    fn provider(&self) -> ministore_core::options::NowProvider {
        let inner = self.0.clone();
        Arc::new(move || inner.load(Ordering::SeqCst))
    }
}

fn task_schema() -> Schema {
    let mut fields = BTreeMap::new();
    fields.insert("tags".into(), FieldSpec::new(FieldType::Keyword).multi());
    fields.insert("priority".into(), FieldSpec::new(FieldType::Number));
    fields.insert("done".into(), FieldSpec::new(FieldType::Bool));
    fields.insert("due".into(), FieldSpec::new(FieldType::Date));
    Schema::new(fields).unwrap()
}

fn open_index(schema: Schema, opts: IndexOptions) -> Index {
    let driver = Box::new(SqliteDriver::open_in_memory().unwrap());
    Index::create(driver, schema, opts).unwrap()
}

fn paths(page: &ministore_storage::SearchPage) -> Vec<String> {
    page.items
        .iter()
        .map(|v| v["path"].as_str().unwrap().to_string())
        .collect()
}

fn sorted_paths(page: &ministore_storage::SearchPage) -> Vec<String> {
    let mut p = paths(page);
    p.sort();
    p
}

fn search(idx: &Index, query: &str) -> ministore_storage::SearchPage {
    idx.search(&SearchRequest::new(query), &Cancel::never())
        .unwrap()
}

#[test]
fn s1_typed_filters() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(
        r#"{"path":"/1","tags":["work"],"priority":3,"done":false,"due":"2025-01-01"}"#,
        &cancel,
    )
    .unwrap();
    idx.put(
        r#"{"path":"/2","tags":["work","urgent"],"priority":10,"done":true,"due":"2025-02-01"}"#,
        &cancel,
    )
    .unwrap();
    idx.put(
        r#"{"path":"/3","tags":["home"],"priority":7,"done":false,"due":"2024-12-31"}"#,
        &cancel,
    )
    .unwrap();

    assert_eq!(sorted_paths(&search(&idx, "tags:work")), vec!["/1", "/2"]);
    assert_eq!(sorted_paths(&search(&idx, "priority>5")), vec!["/2", "/3"]);
    assert_eq!(sorted_paths(&search(&idx, "done:false")), vec!["/1", "/3"]);
    assert_eq!(
        sorted_paths(&search(&idx, r#"due>"2025-01-15""#)),
        vec!["/2"]
    );
}

#[test]
fn s1_composition_and_sugar() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(
        r#"{"path":"/1","tags":["work"],"priority":3,"done":false}"#,
        &cancel,
    )
    .unwrap();
    idx.put(
        r#"{"path":"/2","tags":["work","urgent"],"priority":10,"done":true}"#,
        &cancel,
    )
    .unwrap();

    assert_eq!(
        sorted_paths(&search(&idx, "tags:work AND !done")),
        vec!["/1"]
    );
    assert_eq!(
        sorted_paths(&search(&idx, "tags:urgent OR priority:3")),
        vec!["/1", "/2"]
    );
    assert_eq!(sorted_paths(&search(&idx, "has:done")), vec!["/1", "/2"]);
    assert_eq!(sorted_paths(&search(&idx, "priority:3..7")), vec!["/1"]);
    assert_eq!(sorted_paths(&search(&idx, "path:/1")), vec!["/1"]);
    assert_eq!(sorted_paths(&search(&idx, "tags:ur*")), vec!["/2"]);
    assert_eq!(sorted_paths(&search(&idx, "tags:*rgen*")), vec!["/2"]);
    assert_eq!(sorted_paths(&search(&idx, "tags:wo?k")), vec!["/1", "/2"]);
}

#[test]
fn s2_refcount_maintenance() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(r#"{"path":"/a","tags":["a","b"]}"#, &cancel).unwrap();
    idx.put(r#"{"path":"/b","tags":["b"]}"#, &cancel).unwrap();
    idx.put(r#"{"path":"/a","tags":["c"]}"#, &cancel).unwrap();

    // doc_freq(a)=0 means "a" no longer surfaces in discovery.
    let values = idx.discover_values("tags", None, 10, &cancel).unwrap();
    let freqs: Vec<(String, i64)> = values
        .iter()
        .map(|v| (v.value.clone(), v.count))
        .collect();
    assert_eq!(
        freqs,
        vec![("b".to_string(), 1), ("c".to_string(), 1)]
    );
}

#[test]
fn s3_recency_pagination() {
    let clock = Clock::at(1_000);
    let opts = IndexOptions::default().with_now_provider(clock.provider());
    let idx = open_index(task_schema(), opts);
    let cancel = Cancel::never();

    for path in ["/1", "/2", "/3"] {
        idx.put(&format!(r#"{{"path":"{path}","tags":["work"]}}"#), &cancel)
            .unwrap();
        clock.advance(1_000);
    }

    let req = SearchRequest::new("tags:work").rank(Rank::Recency).limit(1);
    let page1 = idx.search(&req, &cancel).unwrap();
    assert_eq!(paths(&page1), vec!["/3"], "most recent first");
    assert!(page1.has_more);
    let c1 = page1.next_cursor.clone().unwrap();

    let page2 = idx.search(&req.clone().cursor(c1), &cancel).unwrap();
    assert_eq!(paths(&page2), vec!["/2"]);
    assert!(page2.has_more);
    let c2 = page2.next_cursor.clone().unwrap();

    let page3 = idx.search(&req.clone().cursor(c2), &cancel).unwrap();
    assert_eq!(paths(&page3), vec!["/1"]);
    let c3 = page3.next_cursor.clone();

    // The last page may still offer a cursor; following it is empty.
    if let Some(c3) = c3 {
        let page4 = idx.search(&req.clone().cursor(c3), &cancel).unwrap();
        assert!(paths(&page4).is_empty());
        assert!(!page4.has_more);
    } else {
        assert!(!page3.has_more);
    }
}

#[test]
fn s4_fts_default_ranking() {
    let mut fields = BTreeMap::new();
    fields.insert("title".into(), FieldSpec::text(2.0));
    fields.insert("body".into(), FieldSpec::text(1.0));
    let idx = open_index(Schema::new(fields).unwrap(), IndexOptions::default());
    let cancel = Cancel::never();

    idx.put(r#"{"path":"/a","title":"hello world","body":"x"}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/b","title":"x","body":"hello"}"#, &cancel)
        .unwrap();

    let page = search(&idx, "hello");
    assert_eq!(paths(&page), vec!["/a", "/b"], "title weight ranks /a first");

    // Field-scoped text matches only that column.
    let page = search(&idx, "body:hello");
    assert_eq!(paths(&page), vec!["/b"]);
}

#[test]
fn s5_normalizer_rejections() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();

    let err = idx
        .search(&SearchRequest::new("NOT tags:hidden"), &cancel)
        .unwrap_err();
    assert!(err.to_string().starts_with("query_rejected:"), "{err}");

    let err = idx
        .search(&SearchRequest::new("tags:t*"), &cancel)
        .unwrap_err();
    assert!(err.to_string().starts_with("query_rejected:"), "{err}");

    idx.search(&SearchRequest::new("tags:te*"), &cancel).unwrap();
}

#[test]
fn s6_stats_with_scope() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    for (i, p) in [1, 2, 3, 4].iter().enumerate() {
        idx.put(
            &format!(r#"{{"path":"/{i}","priority":{p}}}"#),
            &cancel,
        )
        .unwrap();
    }

    let stats = idx.stats("priority", Some("priority>2"), &cancel).unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.min, Some(3.0));
    assert_eq!(stats.max, Some(4.0));
    assert_eq!(stats.avg, Some(3.5));
    assert_eq!(stats.median, Some(3.5));

    let stats = idx.stats("priority", None, &cancel).unwrap();
    assert_eq!(stats.count, 4);
    assert_eq!(stats.median, Some(2.5));

    let err = idx.stats("tags", None, &cancel).unwrap_err();
    assert!(err.to_string().starts_with("type_mismatch:"), "{err}");
}

#[test]
fn s7_cursor_schema_binding() {
    let clock = Clock::at(1_000);
    let opts = IndexOptions::default().with_now_provider(clock.provider());
    let mut fields = task_schema().fields;
    fields.insert("title".into(), FieldSpec::text(1.0));
    let schema = Schema::new(fields).unwrap();
    let driver = Box::new(SqliteDriver::open_in_memory().unwrap());
    let mut idx = Index::create(driver, schema.clone(), opts).unwrap();
    let cancel = Cancel::never();

    for path in ["/1", "/2", "/3"] {
        idx.put(&format!(r#"{{"path":"{path}","tags":["work"]}}"#), &cancel)
            .unwrap();
        clock.advance(1_000);
    }

    let req = SearchRequest::new("tags:work").rank(Rank::Recency).limit(1);
    let cursor = idx
        .search(&req, &cancel)
        .unwrap()
        .next_cursor
        .unwrap();

    // Additive change: one more text field.
    let mut grown = schema.fields.clone();
    grown.insert("notes".into(), FieldSpec::text(1.0));
    idx.apply_schema_additive(Schema::new(grown).unwrap(), &cancel)
        .unwrap();

    let err = idx
        .search(&req.clone().cursor(cursor), &cancel)
        .unwrap_err();
    assert!(err.is_cursor(), "{err}");
}

#[test]
fn cursor_query_and_rank_binding() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    for i in 0..3 {
        idx.put(&format!(r#"{{"path":"/{i}","tags":["work"]}}"#), &cancel)
            .unwrap();
    }
    let req = SearchRequest::new("tags:work").rank(Rank::Recency).limit(1);
    let cursor = idx.search(&req, &cancel).unwrap().next_cursor.unwrap();

    // Different query text.
    let err = idx
        .search(
            &SearchRequest::new("has:tags")
                .rank(Rank::Recency)
                .limit(1)
                .cursor(cursor.clone()),
            &cancel,
        )
        .unwrap_err();
    assert!(err.is_cursor(), "{err}");

    // Different rank.
    let err = idx
        .search(
            &SearchRequest::new("tags:work")
                .rank(Rank::None)
                .limit(1)
                .cursor(cursor),
            &cancel,
        )
        .unwrap_err();
    assert!(err.is_cursor(), "{err}");
}

#[test]
fn pagination_is_exhaustive_and_unique() {
    let clock = Clock::at(5_000);
    let opts = IndexOptions::default().with_now_provider(clock.provider());
    let idx = open_index(task_schema(), opts);
    let cancel = Cancel::never();

    let total = 7;
    for i in 0..total {
        idx.put(
            &format!(r#"{{"path":"/doc{i}","tags":["work"],"priority":{i}}}"#),
            &cancel,
        )
        .unwrap();
        clock.advance(10);
    }

    for rank in [
        Rank::Recency,
        Rank::None,
        Rank::Field("priority".into()),
    ] {
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut req = SearchRequest::new("tags:work").rank(rank.clone()).limit(3);
            if let Some(c) = cursor.take() {
                req = req.cursor(c);
            }
            let page = idx.search(&req, &cancel).unwrap();
            seen.extend(paths(&page));
            match page.next_cursor {
                Some(c) if page.has_more => cursor = Some(c),
                _ => break,
            }
        }
        assert_eq!(seen.len(), total, "rank {rank:?} missed items: {seen:?}");
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), total, "rank {rank:?} duplicated items");
    }
}

#[test]
fn field_rank_orders_by_max_value() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(r#"{"path":"/low","tags":["t"],"priority":1}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/high","tags":["t"],"priority":9}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/none","tags":["t"]}"#, &cancel).unwrap();

    let page = idx
        .search(
            &SearchRequest::new("tags:t").rank(Rank::Field("priority".into())),
            &cancel,
        )
        .unwrap();
    assert_eq!(paths(&page), vec!["/high", "/low", "/none"], "nulls last");
}

#[test]
fn multi_valued_matches_return_each_item_once() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    // Two keyword values and one document both match the prefix.
    idx.put(r#"{"path":"/a","tags":["alpha","alphabet"]}"#, &cancel)
        .unwrap();

    let page = search(&idx, "tags:alp*");
    assert_eq!(paths(&page), vec!["/a"], "no duplicate rows");
    assert_eq!(idx.count("tags:alp*", &cancel).unwrap(), 1);
}

#[test]
fn fts_pagination_with_cursors() {
    let mut fields = BTreeMap::new();
    fields.insert("body".into(), FieldSpec::text(1.0));
    fields.insert("tags".into(), FieldSpec::new(FieldType::Keyword).multi());
    let idx = open_index(Schema::new(fields).unwrap(), IndexOptions::default());
    let cancel = Cancel::never();

    // Varying term frequency so relevance scores differ.
    idx.put(r#"{"path":"/1","body":"needle"}"#, &cancel).unwrap();
    idx.put(r#"{"path":"/2","body":"needle needle needle"}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/3","body":"needle needle padding words here"}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/4","body":"nothing relevant"}"#, &cancel)
        .unwrap();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut req = SearchRequest::new("needle").limit(1);
        if let Some(c) = cursor.take() {
            req = req.cursor(c);
        }
        let page = idx.search(&req, &cancel).unwrap();
        seen.extend(paths(&page));
        match page.next_cursor {
            Some(c) if page.has_more => cursor = Some(c),
            _ => break,
        }
    }
    assert_eq!(seen.len(), 3, "every match exactly once: {seen:?}");
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique, vec!["/1", "/2", "/3"]);
}

#[test]
fn round_trip_preserves_documents() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    let doc = r#"{"path":"/a","tags":["x"],"priority":3,"unindexed":{"nested":[1,2]}}"#;
    idx.put(doc, &cancel).unwrap();

    let stored = idx.get("/a", &cancel).unwrap();
    let original: serde_json::Value = serde_json::from_str(doc).unwrap();
    assert_eq!(stored, original);
}

#[test]
fn timestamps_survive_rewrites() {
    let clock = Clock::at(10_000);
    let opts = IndexOptions::default().with_now_provider(clock.provider());
    let idx = open_index(task_schema(), opts);
    let cancel = Cancel::never();

    idx.put(r#"{"path":"/a","priority":1}"#, &cancel).unwrap();
    let first = idx.peek("/a", &cancel).unwrap();
    assert_eq!(first.created_at_ms, 10_000);

    clock.advance(500);
    idx.put(r#"{"path":"/a","priority":2}"#, &cancel).unwrap();
    let second = idx.peek("/a", &cancel).unwrap();
    assert_eq!(second.created_at_ms, 10_000, "created preserved");
    assert_eq!(second.updated_at_ms, 10_500, "updated advanced");
    assert!(second.updated_at_ms >= first.updated_at_ms);
}

#[test]
fn show_shapes_output() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(r#"{"path":"/a","tags":["x"],"priority":3}"#, &cancel)
        .unwrap();

    let page = idx
        .search(&SearchRequest::new("tags:x").show(Show::None), &cancel)
        .unwrap();
    assert_eq!(page.items[0], serde_json::json!({"path": "/a"}));

    let page = idx
        .search(
            &SearchRequest::new("tags:x").show(Show::Fields(vec!["priority".into()])),
            &cancel,
        )
        .unwrap();
    assert_eq!(
        page.items[0],
        serde_json::json!({"path": "/a", "priority": 3})
    );

    assert!(!page.explain_query.is_empty());
    assert!(!page.explain_steps.is_empty());
}

#[test]
fn short_cursors_round_trip_and_expire() {
    let clock = Clock::at(1_000);
    let mut opts = IndexOptions::default().with_now_provider(clock.provider());
    opts.cursor_mode = CursorMode::Short;
    opts.cursor_ttl = std::time::Duration::from_secs(60);
    let idx = open_index(task_schema(), opts);
    let cancel = Cancel::never();

    for i in 0..3 {
        idx.put(&format!(r#"{{"path":"/{i}","tags":["work"]}}"#), &cancel)
            .unwrap();
        clock.advance(10);
    }

    let req = SearchRequest::new("tags:work").rank(Rank::Recency).limit(1);
    let page = idx.search(&req, &cancel).unwrap();
    let token = page.next_cursor.unwrap();
    assert!(token.starts_with("c:"), "short carrier: {token}");

    let page2 = idx.search(&req.clone().cursor(token.clone()), &cancel).unwrap();
    assert_eq!(page2.items.len(), 1);

    // Past the TTL the handle is gone.
    clock.advance(120_000);
    let err = idx.search(&req.clone().cursor(token), &cancel).unwrap_err();
    assert!(err.is_cursor(), "{err}");
}

#[test]
fn relative_date_filters() {
    let clock = Clock::at(100 * 86_400_000);
    let opts = IndexOptions::default().with_now_provider(clock.provider());
    let idx = open_index(task_schema(), opts);
    let cancel = Cancel::never();

    idx.put(r#"{"path":"/old","tags":["t"]}"#, &cancel).unwrap();
    clock.advance(10 * 86_400_000);
    idx.put(r#"{"path":"/new","tags":["t"]}"#, &cancel).unwrap();

    // Updated within the last 2 days: only /new.
    assert_eq!(sorted_paths(&search(&idx, "updated<2d")), vec!["/new"]);
    // Older than 2 days: only /old.
    assert_eq!(sorted_paths(&search(&idx, "updated>2d")), vec!["/old"]);
}

#[test]
fn discover_fields_reports_counts_and_samples() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(
        r#"{"path":"/1","tags":["a","b"],"priority":2,"done":true,"due":"2025-01-01"}"#,
        &cancel,
    )
    .unwrap();
    idx.put(r#"{"path":"/2","tags":["a"],"priority":8,"done":false}"#, &cancel)
        .unwrap();

    let fields = idx.discover_fields(&cancel).unwrap();
    let by_name: std::collections::HashMap<&str, &ministore_storage::FieldInfo> =
        fields.iter().map(|f| (f.name.as_str(), f)).collect();

    let tags = by_name["tags"];
    assert_eq!(tags.count, 2);
    match &tags.sample {
        ministore_storage::FieldSample::Keyword(values) => {
            assert_eq!(values[0].value, "a");
            assert_eq!(values[0].count, 2);
        }
        other => panic!("expected keyword sample, got {other:?}"),
    }

    match by_name["priority"].sample {
        ministore_storage::FieldSample::Number { min, max } => {
            assert_eq!(min, Some(2.0));
            assert_eq!(max, Some(8.0));
        }
        ref other => panic!("expected number sample, got {other:?}"),
    }

    match by_name["done"].sample {
        ministore_storage::FieldSample::Bool {
            true_count,
            false_count,
        } => {
            assert_eq!(true_count, 1);
            assert_eq!(false_count, 1);
        }
        ref other => panic!("expected bool sample, got {other:?}"),
    }
}

#[test]
fn discover_values_with_scope() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();
    idx.put(r#"{"path":"/1","tags":["a","b"],"priority":1}"#, &cancel)
        .unwrap();
    idx.put(r#"{"path":"/2","tags":["a"],"priority":9}"#, &cancel)
        .unwrap();

    let values = idx
        .discover_values("tags", Some("priority>5"), 10, &cancel)
        .unwrap();
    let pairs: Vec<(String, i64)> = values
        .iter()
        .map(|v| (v.value.clone(), v.count))
        .collect();
    assert_eq!(pairs, vec![("a".to_string(), 1)]);
}

#[test]
fn error_kinds_surface_with_prefixes() {
    let idx = open_index(task_schema(), IndexOptions::default());
    let cancel = Cancel::never();

    let err = idx.search(&SearchRequest::new("nope:1"), &cancel).unwrap_err();
    assert_eq!(err.to_string(), "unknown_field: field=nope");

    let err = idx.search(&SearchRequest::new("tags:("), &cancel).unwrap_err();
    assert!(err.to_string().starts_with("query_parse:"), "{err}");

    let err = idx
        .search(&SearchRequest::new("tags:work").cursor("!!not a cursor!!"), &cancel)
        .unwrap_err();
    assert!(err.to_string().starts_with("cursor:"), "{err}");
}
