use std::collections::HashMap;
use std::path::PathBuf;

use crate::normalize::normalize_url;
use crate::records::{BackendCsv, Record, RecordCreate, RecordKind, RecordStore, OG_IMAGE};
use crate::worker::handler::{check_eligibility, handle_job, Job, Outcome, SkipReason};

use super::FakeFetcher;

fn create_store() -> (BackendCsv, PathBuf, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let path = tmp.path().join("records.csv");
    let store = BackendCsv::load(path.to_str().unwrap()).expect("failed to create record store");
    (store, path, tmp)
}

fn seed_article(store: &BackendCsv, url: &str) -> Record {
    store
        .create(RecordCreate {
            kind: RecordKind::Article,
            url: url.to_string(),
            ..Default::default()
        })
        .expect("failed to seed record")
}

fn job(url: &str, kind: RecordKind, update: bool) -> Job {
    Job {
        url: url.to_string(),
        kind,
        update,
    }
}

/// A store whose writes always fail, standing in for a storage outage.
struct FailingStore(BackendCsv);

impl RecordStore for FailingStore {
    fn find_by_key(&self, kind: RecordKind, key: &str) -> anyhow::Result<Option<Record>> {
        self.0.find_by_key(kind, key)
    }

    fn update_images(&self, _id: u64, _images: HashMap<String, String>) -> anyhow::Result<()> {
        anyhow::bail!("record store unavailable")
    }

    fn create(&self, create: RecordCreate) -> anyhow::Result<Record> {
        self.0.create(create)
    }

    fn all(&self) -> anyhow::Result<Vec<Record>> {
        self.0.all()
    }
}

#[test]
fn test_stores_normalized_image() {
    let (store, _path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let fetcher = FakeFetcher::image("http://cdn.com/x.jpg");

    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Stored {
            image: "http://cdn.com/x.jpg".to_string()
        }
    );
    assert_eq!(fetcher.call_count(), 1);

    let record = store
        .find_by_key(RecordKind::Article, "http://a.com/p1")
        .unwrap()
        .unwrap();
    assert_eq!(
        record.images.get(OG_IMAGE).map(String::as_str),
        Some(normalize_url("http://cdn.com/x.jpg").unwrap().as_str())
    );
}

#[test]
fn test_image_url_is_normalized_before_storage() {
    let (store, _path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let fetcher = FakeFetcher::image("HTTP://Example.com/img.PNG/");

    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Stored {
            image: "http://example.com/img.PNG".to_string()
        }
    );
}

#[test]
fn test_existing_image_skips_fetch_and_leaves_store_untouched() {
    let (store, path, _tmp) = create_store();
    let record = seed_article(&store, "http://a.com/p1");

    let mut images = HashMap::new();
    images.insert(OG_IMAGE.to_string(), "http://cdn.com/old.jpg".to_string());
    images.insert("banner".to_string(), "http://cdn.com/banner.jpg".to_string());
    store.update_images(record.id, images.clone()).unwrap();

    let stored_bytes = std::fs::read(&path).unwrap();

    let fetcher = FakeFetcher::image("http://cdn.com/new.jpg");
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: SkipReason::AlreadyHasImage {
                existing: "http://cdn.com/old.jpg".to_string()
            }
        }
    );
    assert_eq!(fetcher.call_count(), 0);

    // stored images must be byte-for-byte unchanged
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_update_flag_refreshes_existing_image() {
    let (store, _path, _tmp) = create_store();
    let record = seed_article(&store, "http://a.com/p1");

    let mut images = HashMap::new();
    images.insert(OG_IMAGE.to_string(), "http://cdn.com/old.jpg".to_string());
    images.insert("banner".to_string(), "http://cdn.com/banner.jpg".to_string());
    store.update_images(record.id, images).unwrap();

    let fetcher = FakeFetcher::image("http://cdn.com/new.jpg");
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, true),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Stored {
            image: "http://cdn.com/new.jpg".to_string()
        }
    );

    let stored = store
        .find_by_key(RecordKind::Article, "http://a.com/p1")
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.images.get(OG_IMAGE).map(String::as_str),
        Some("http://cdn.com/new.jpg")
    );
    // other image kinds survive the og refresh
    assert_eq!(
        stored.images.get("banner").map(String::as_str),
        Some("http://cdn.com/banner.jpg")
    );
}

#[test]
fn test_mp3_url_never_fetched() {
    let (store, path, _tmp) = create_store();
    store
        .create(RecordCreate {
            kind: RecordKind::Episode,
            url: "http://feeds.a.com/e1.xml".to_string(),
            link: Some("http://a.com/e1.mp3".to_string()),
            ..Default::default()
        })
        .unwrap();

    let stored_bytes = std::fs::read(&path).unwrap();

    // update=true makes no difference for direct audio files
    let fetcher = FakeFetcher::image("http://cdn.com/x.jpg");
    let outcome = handle_job(
        &job("http://a.com/e1.mp3", RecordKind::Episode, true),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: SkipReason::AudioUrl
        }
    );
    assert_eq!(fetcher.call_count(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_missing_record_is_benign_noop() {
    let (store, path, _tmp) = create_store();
    let stored_bytes = std::fs::read(&path).unwrap();

    let fetcher = FakeFetcher::image("http://cdn.com/x.jpg");
    let outcome = handle_job(
        &job("http://a.com/nope", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(outcome, Outcome::NotFound);
    // neither fetch nor persist ran
    assert_eq!(fetcher.call_count(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_fetch_failure_resolves_and_leaves_record_unchanged() {
    let (store, path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let stored_bytes = std::fs::read(&path).unwrap();

    let fetcher = FakeFetcher::failing();
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert!(matches!(outcome, Outcome::FetchFailed { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_no_image_in_metadata_is_distinct_from_failure() {
    let (store, path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let stored_bytes = std::fs::read(&path).unwrap();

    let fetcher = FakeFetcher::no_image();
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert_eq!(outcome, Outcome::NoImage);
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_garbled_image_url_is_fetch_failure() {
    let (store, path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let stored_bytes = std::fs::read(&path).unwrap();

    let fetcher = FakeFetcher::image("not an image url");
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert!(matches!(outcome, Outcome::FetchFailed { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), stored_bytes);
}

#[test]
fn test_unknown_job_kind_treated_as_article() {
    let (store, _path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");

    // unknown kinds collapse to article at the wire boundary
    let job: Job =
        serde_json::from_str(r#"{"url": "http://a.com/p1", "type": "newsletter"}"#).unwrap();
    assert_eq!(job.kind, RecordKind::Article);
    assert!(!job.update);

    let fetcher = FakeFetcher::image("http://cdn.com/x.jpg");
    let outcome = handle_job(&job, &store, &fetcher).unwrap();
    assert!(matches!(outcome, Outcome::Stored { .. }));
}

#[test]
fn test_persist_failure_surfaces() {
    let (store, _path, _tmp) = create_store();
    seed_article(&store, "http://a.com/p1");
    let store = FailingStore(store);

    let fetcher = FakeFetcher::image("http://cdn.com/x.jpg");
    let outcome = handle_job(
        &job("http://a.com/p1", RecordKind::Article, false),
        &store,
        &fetcher,
    )
    .unwrap();

    assert!(matches!(outcome, Outcome::PersistFailed { .. }));
}

#[test]
fn test_existing_image_outranks_mp3_check() {
    let mut record = Record {
        kind: RecordKind::Episode,
        link: "http://a.com/e1.mp3".to_string(),
        ..Default::default()
    };
    record.images.insert(
        OG_IMAGE.to_string(),
        "http://cdn.com/old.jpg".to_string(),
    );

    let job = job("http://a.com/e1.mp3", RecordKind::Episode, false);
    assert_eq!(
        check_eligibility(&record, &job),
        Some(SkipReason::AlreadyHasImage {
            existing: "http://cdn.com/old.jpg".to_string()
        })
    );

    // with update requested, the audio check is the one that fires
    let job_update = Job {
        update: true,
        ..job
    };
    assert_eq!(
        check_eligibility(&record, &job_update),
        Some(SkipReason::AudioUrl)
    );
}

#[test]
fn test_eligible_when_no_image_and_not_audio() {
    let record = Record {
        kind: RecordKind::Article,
        url: "http://a.com/p1".to_string(),
        ..Default::default()
    };
    let job = job("http://a.com/p1", RecordKind::Article, false);
    assert_eq!(check_eligibility(&record, &job), None);
}
