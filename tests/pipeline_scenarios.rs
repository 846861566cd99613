//! End-to-end scenarios against the pipeline orchestrator's merge cycle,
//! built directly on filesystem fixtures (no QR decoding involved — these
//! pin the grouping/dedup/promotion behavior once files are already
//! classified by identifier, per the concrete scenarios).

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use lopdf::{Document, Object};

use kiosk_fleet::audit::AuditLogger;
use kiosk_fleet::auth::BasicAuthProvider;
use kiosk_fleet::config::ConfigManager;
use kiosk_fleet::paths::DataPaths;
use kiosk_fleet::pipeline::run_merge_cycle;
use kiosk_fleet::state::{KioskState, RecentEvents};

fn sample_yaml() -> &'static str {
    r#"
system:
  web_port: 8000
  mode: kiosk
paths:
  scanner_output: /data/inbox
  data_root: /data
watcher:
  mode: polling
qr:
  pattern: "^[0-9]{14}$"
upload:
  type: none
"#
}

fn pdf_with_pages(dir: &Path, name: &str, contents: &[&[u8]]) -> PathBuf {
    let path = dir.join(name);
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for content in contents {
        let stream_id = doc.add_object(lopdf::Stream::new(lopdf::Dictionary::new(), content.to_vec()));
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => Object::Reference(stream_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(lopdf::dictionary! {
            "Type" => "Pages",
            "Count" => contents.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(lopdf::dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(&path).unwrap();
    path
}

fn build_state(data_root: &Path) -> Arc<KioskState> {
    let config_path = data_root.join("config.yaml");
    std::fs::write(&config_path, sample_yaml()).unwrap();
    let config_manager = ConfigManager::load(&config_path).unwrap();

    let paths = DataPaths::new(data_root.join("data"), data_root.join("inbox"), data_root.join("qr_debug"));
    paths.ensure_all().unwrap();

    Arc::new(KioskState {
        config: RwLock::new(config_manager),
        paths,
        auth: Arc::new(BasicAuthProvider::new("s3cret".to_string())),
        audit: Arc::new(AuditLogger::new(data_root.join("audit.log"))),
        recent: RecentEvents::new(),
        paused: AtomicBool::new(false),
        last_batch_at: Mutex::new(None),
        merge_in_flight: AtomicBool::new(false),
        started_at: Instant::now(),
        last_arrival: Mutex::new(Instant::now()),
    })
}

fn page_count(path: &Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

/// S2 — three already-classified files for the same identifier in *pending*
/// merge into one three-page document; *pending* ends up empty.
#[tokio::test]
async fn multi_page_arrival_merges_into_one_document() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    pdf_with_pages(&state.paths.pending, "99999999999999.pdf", &[b"page-a"]);
    pdf_with_pages(&state.paths.pending, "99999999999999(1).pdf", &[b"page-b"]);
    pdf_with_pages(&state.paths.pending, "99999999999999(2).pdf", &[b"page-c"]);

    run_merge_cycle(state.clone()).await;

    let merged_path = state.paths.merged.join("99999999999999.pdf");
    assert!(merged_path.exists());
    assert_eq!(page_count(&merged_path), 3);
    assert_eq!(DataPaths::count_pdfs(&state.paths.pending), 0);
}

/// S3 — a late-arriving page for an already-uploaded identifier demotes the
/// uploaded artifact back into *merged*, deduped against its own prior pages.
#[tokio::test]
async fn late_arrival_after_upload_demotes_to_merged() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    pdf_with_pages(&state.paths.uploaded, "77777777777777.pdf", &[b"old-page-1", b"old-page-2"]);
    pdf_with_pages(&state.paths.pending, "77777777777777.pdf", &[b"new-page"]);

    run_merge_cycle(state.clone()).await;

    assert!(!state.paths.uploaded.join("77777777777777.pdf").exists());
    let merged_path = state.paths.merged.join("77777777777777.pdf");
    assert!(merged_path.exists());
    assert_eq!(page_count(&merged_path), 3);
}

/// S4 — the same physical scan dropped twice under different filenames
/// contributes only one page to the merged artifact.
#[tokio::test]
async fn identical_physical_file_is_deduped() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    pdf_with_pages(&state.paths.pending, "a.pdf", &[b"shared-content"]);
    // Copy identical bytes under a second name, as the scenario requires
    // a byte-for-byte duplicate rather than a second distinct scan.
    std::fs::copy(state.paths.pending.join("a.pdf"), state.paths.pending.join("b.pdf")).unwrap();
    std::fs::rename(state.paths.pending.join("a.pdf"), state.paths.pending.join("11111111111111.pdf")).unwrap();
    std::fs::rename(state.paths.pending.join("b.pdf"), state.paths.pending.join("11111111111111(1).pdf")).unwrap();

    run_merge_cycle(state.clone()).await;

    let merged_path = state.paths.merged.join("11111111111111.pdf");
    assert!(merged_path.exists());
    assert_eq!(page_count(&merged_path), 1);
}

/// Universal invariant #1: at most one live `<id>.pdf` per folder, and at
/// most two across the three queue folders after a cycle settles (no
/// transient coexistence left over once the cycle above has returned).
#[tokio::test]
async fn at_most_one_artifact_per_folder_after_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    pdf_with_pages(&state.paths.pending, "22222222222222.pdf", &[b"only-page"]);
    run_merge_cycle(state.clone()).await;

    let in_pending = state.paths.pending.join("22222222222222.pdf").exists();
    let in_merged = state.paths.merged.join("22222222222222.pdf").exists();
    let in_uploaded = state.paths.uploaded.join("22222222222222.pdf").exists();
    let live_count = [in_pending, in_merged, in_uploaded].iter().filter(|b| **b).count();
    assert!(live_count <= 1, "expected at most one live artifact, got {live_count}");
}

/// A second `RUN_BATCH` while one is in flight is a no-op (spec §4.3):
/// `try_begin_merge` must fail for the duration of the first cycle.
#[tokio::test]
async fn merge_cycle_is_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    assert!(state.try_begin_merge());
    assert!(!state.try_begin_merge(), "second concurrent claim should be refused");
    state.end_merge();
    assert!(state.try_begin_merge(), "claim should succeed again once released");
}
