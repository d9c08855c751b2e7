//! Catalog file loading through the public API.

use std::io::Write;

use danci_adaptive::adaptive::store::load_catalog_file;
use danci_adaptive::adaptive::{AdaptiveConfig, AdaptiveEngine, AdaptiveError, ItemFilter, SessionBudget};

fn write_catalog(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_loads_items_with_defaults() {
    let file = write_catalog(
        r#"[
            {"id": "q1", "params": {"a": 1.2, "b": -0.5}, "concepts": ["fractions"], "courseId": "math"},
            {"id": "q2", "params": {"a": 0.8, "b": 1.0, "c": 0.2, "version": 3}, "answerKey": "42"}
        ]"#,
    );
    let items = load_catalog_file(file.path()).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].params.c, 0.0);
    assert_eq!(items[0].params.version, 0);
    assert_eq!(items[0].course_id.as_deref(), Some("math"));
    assert_eq!(items[1].params.version, 3);
    assert_eq!(items[1].answer_key.as_deref(), Some("42"));
    assert!(items[1].concepts.is_empty());
}

#[test]
fn test_rejects_duplicates_and_bad_json() {
    let dup = write_catalog(
        r#"[{"id": "q1", "params": {"a": 1.0, "b": 0.0}}, {"id": "q1", "params": {"a": 1.0, "b": 1.0}}]"#,
    );
    assert!(matches!(load_catalog_file(dup.path()), Err(AdaptiveError::Config(_))));

    let bad = write_catalog("{ not json");
    assert!(matches!(load_catalog_file(bad.path()), Err(AdaptiveError::Decode(_))));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_catalog_file(dir.path().join("missing.json")),
        Err(AdaptiveError::Io(_))
    ));
}

#[tokio::test]
async fn test_degenerate_items_are_never_offered() {
    let file = write_catalog(
        r#"[
            {"id": "broken", "params": {"a": -1.0, "b": 0.0}},
            {"id": "fine", "params": {"a": 1.0, "b": 0.0}}
        ]"#,
    );
    let items = load_catalog_file(file.path()).unwrap();
    let engine = AdaptiveEngine::in_memory(AdaptiveConfig::default(), items);
    let sid = engine
        .start_session("l", ItemFilter::all(), SessionBudget::unbounded())
        .await
        .unwrap();
    let item = engine.next_item(&sid).await.unwrap().unwrap();
    assert_eq!(item.id, "fine");
}
