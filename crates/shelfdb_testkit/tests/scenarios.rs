//! End-to-end behaviour of the file backend.

use shelfdb_codec::{SerializerKind, Value};
use shelfdb_core::{
    Backend, Config, CoreError, Document, FileBackend, IndexOptions, SortOrder, StoreKind,
};
use shelfdb_testkit::prelude::*;

fn query(json: &str) -> Value {
    serde_json::from_str(json).unwrap()
}

fn titles(db: &FileBackend, collection: &str, q: &str) -> Vec<String> {
    let mut titles: Vec<String> = db
        .filter(collection, &query(q))
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .filter_map(|d| d.get("title").and_then(Value::as_text).map(String::from))
        .collect();
    titles.sort();
    titles
}

fn names(db: &FileBackend, q: &str) -> Vec<Value> {
    let found = db.filter("Actor", &query(q)).unwrap().to_vec().unwrap();
    scenarios::field_values(&found, "name")
}

#[test]
fn range_query_survives_reopen() {
    let backend = TestBackend::new();
    scenarios::seed_actors(&backend);

    let q = r#"{"year": {"$gte": 1930}}"#;
    assert_eq!(names(&backend, q), vec![Value::from("Al Pacino")]);
    backend.commit().unwrap();

    let backend = backend.reopen();
    backend
        .register("Actor", shelfdb_core::CollectionParams::new("actor"))
        .unwrap();
    assert_eq!(names(&backend, q), vec![Value::from("Al Pacino")]);
}

#[test]
fn delete_inside_transaction_is_undone_by_rollback() {
    let backend = TestBackend::new();
    scenarios::seed_movies(&backend);
    backend.commit().unwrap();

    backend.begin().unwrap();
    let heat = backend.get("movie", &query(r#"{"title": "Heat"}"#)).unwrap();
    backend.delete(&heat).unwrap();
    assert!(!titles(&backend, "movie", r#"{"tags": "crime"}"#).contains(&"Heat".to_string()));

    backend.rollback().unwrap();
    assert_eq!(
        titles(&backend, "movie", r#"{"tags": "crime"}"#),
        vec!["Heat", "The Godfather"]
    );
}

#[test]
fn unique_violation_then_resolution() {
    let backend = TestBackend::new();
    backend
        .create_index("item", "f", IndexOptions::new().unique(true))
        .unwrap();
    let mut first = Document::new("item", [("f", Value::from(7))]);
    let mut second = Document::new("item", [("f", Value::from(7))]);
    backend.save(&mut first).unwrap();
    backend.save(&mut second).unwrap();

    match backend.commit() {
        Err(CoreError::UniqueViolation { field, value, .. }) => {
            assert_eq!(field, "f");
            assert_eq!(value, Value::from(7));
        }
        other => panic!("expected a uniqueness violation, got {other:?}"),
    }

    backend.delete(&second).unwrap();
    backend.commit().unwrap();

    let backend = backend.reopen();
    assert_eq!(backend.filter("item", &query(r#"{"f": 7}"#)).unwrap().len(), 1);
}

#[test]
fn committed_data_is_durable_and_rolled_back_data_is_not() {
    let backend = TestBackend::new();
    let mut kept = Document::new("note", [("text", Value::from("kept"))]);
    backend.save(&mut kept).unwrap();
    backend.commit().unwrap();

    let mut discarded = Document::new("note", [("text", Value::from("discarded"))]);
    backend.save(&mut discarded).unwrap();
    backend.rollback().unwrap();

    let mut pending = Document::new("note", [("text", Value::from("never committed"))]);
    backend.save(&mut pending).unwrap();

    let backend = backend.reopen();
    let notes = backend.filter("note", &query("{}")).unwrap().to_vec().unwrap();
    assert_eq!(notes, vec![kept]);
}

#[test]
fn late_index_matches_unindexed_query() {
    let backend = TestBackend::new();
    scenarios::seed_movies(&backend);
    let q = r#"{"year": 1972}"#;
    let before = backend.filter("movie", &query(q)).unwrap();

    backend
        .create_index("movie", "year", IndexOptions::new())
        .unwrap();
    let after = backend.filter("movie", &query(q)).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.len(), 2);
    backend.commit().unwrap();

    let backend = backend.reopen();
    assert_eq!(
        titles(&backend, "movie", q),
        vec!["Solaris", "The Godfather"]
    );
}

#[test]
fn deleted_documents_leave_no_postings() {
    let backend = TestBackend::new();
    scenarios::seed_movies(&backend);
    for field in ["title", "year", "tags"] {
        backend
            .create_index("movie", field, IndexOptions::new())
            .unwrap();
    }

    let mut godfather = backend
        .filter("movie", &query(r#"{"title": "The Godfather"}"#))
        .unwrap();
    godfather.delete().unwrap();

    let report = backend.verify("movie").unwrap();
    assert!(report.is_ok(), "{report:?}");
    assert!(titles(&backend, "movie", r#"{"year": 1972}"#) == vec!["Solaris"]);
    assert!(titles(&backend, "movie", r#"{"tags": "classic"}"#).is_empty());

    backend.commit().unwrap();
    let backend = backend.reopen();
    assert!(backend.verify("movie").unwrap().is_ok());
    assert_eq!(backend.describe("movie").unwrap().documents, 3);
}

#[test]
fn missing_object_reports_corruption_until_rebuilt() {
    let backend = TestBackend::new();
    scenarios::seed_movies(&backend);
    backend.commit().unwrap();

    let heat = backend.filter("movie", &query(r#"{"title": "Heat"}"#)).unwrap();
    let key = heat.keys()[0].clone();
    backend.remove_object("movie", key.as_str());

    let err = backend
        .filter("movie", &query("{}"))
        .unwrap()
        .to_vec()
        .unwrap_err();
    assert!(matches!(err, CoreError::IndexCorruption { .. }));
    assert!(!backend.verify("movie").unwrap().is_ok());

    backend.rebuild_indexes("movie").unwrap();
    assert_eq!(backend.filter("movie", &query("{}")).unwrap().to_vec().unwrap().len(), 3);
}

#[test]
fn compacting_store_with_cbor() {
    let config = Config::new()
        .store(StoreKind::Compacting)
        .pack_fan_out(2)
        .serializer(SerializerKind::Cbor);
    let backend = TestBackend::with_config(config);
    scenarios::seed_movies(&backend);
    backend.commit().unwrap();

    let backend = backend.reopen();
    let sorted = backend
        .filter("movie", &query("{}"))
        .unwrap()
        .sort_by(&[("year", SortOrder::Ascending), ("title", SortOrder::Descending)])
        .unwrap()
        .to_vec()
        .unwrap();
    assert_eq!(
        scenarios::field_values(&sorted, "title"),
        vec![
            Value::from("The Godfather"),
            Value::from("Solaris"),
            Value::from("The Conversation"),
            Value::from("Heat"),
        ]
    );
}

#[test]
fn references_load_across_reopen() {
    let backend = TestBackend::new();
    let mut mann = Document::new("person", [("name", Value::from("Michael Mann"))]);
    backend.save(&mut mann).unwrap();
    let mut heat = Document::new("movie", [("title", Value::from("Heat"))]);
    heat.set("director", backend.reference(&mann).unwrap())
        .unwrap();
    backend.save(&mut heat).unwrap();
    backend.commit().unwrap();

    let backend = backend.reopen();
    let heat = backend.get("movie", &query(r#"{"title": "Heat"}"#)).unwrap();
    let mut director = backend.resolve(heat.get("director").unwrap()).unwrap();
    backend.load(&mut director).unwrap();
    assert_eq!(director, mann);
}

#[test]
fn queries_on_embedded_reference() {
    let backend = TestBackend::new();
    let mut mann = Document::new("person", [("name", Value::from("Michael Mann"))]);
    backend.save(&mut mann).unwrap();
    for title in ["Heat", "Thief"] {
        let mut movie = Document::new("movie", [("title", Value::from(title))]);
        movie
            .set("director", backend.reference(&mann).unwrap())
            .unwrap();
        backend.save(&mut movie).unwrap();
    }

    let by_reference = backend
        .filter(
            "movie",
            &Value::map([("director", backend.reference(&mann).unwrap())]),
        )
        .unwrap();
    assert_eq!(by_reference.len(), 2);

    let pk = mann.get("pk").cloned().unwrap();
    let by_pk = backend
        .filter("movie", &Value::map([("director.pk", pk)]))
        .unwrap();
    assert_eq!(by_pk, by_reference);
}

#[test]
fn transaction_closure_is_atomic() {
    let backend = TestBackend::new();
    let result: Result<(), CoreError> = backend.transaction(|db| {
        scenarios::seed_movies(db);
        db.create_index("movie", "title", IndexOptions::new().unique(true))?;
        db.save(&mut Document::new("movie", [("title", Value::from("Heat"))]))
    });
    assert!(matches!(result, Err(CoreError::UniqueViolation { .. })));
    assert!(backend.filter("movie", &query("{}")).unwrap().is_empty());

    let backend = backend.reopen();
    assert!(backend.filter("movie", &query("{}")).unwrap().is_empty());
}

#[test]
fn autocommit_makes_each_save_durable() {
    let backend = TestBackend::with_config(Config::new().autocommit(true));
    scenarios::seed_movies(&backend);
    let backend = backend.reopen();
    assert_eq!(backend.filter("movie", &query("{}")).unwrap().len(), 4);
}
