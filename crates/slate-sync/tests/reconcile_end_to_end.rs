use std::fs;
use std::path::{Path, PathBuf};

use slate_sync::{
    run_fetch, run_prompts, run_scaffold, run_sync, FileConfig, SlateConfig, WorkOrigin,
};
use tempfile::TempDir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn sample_workspace() -> (TempDir, SlateConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixtures = workspace_root().join("fixtures/sample");
    for name in ["events.json", "my_events.json"] {
        fs::copy(fixtures.join(name), dir.path().join(name)).expect("copy fixture");
    }
    let file = FileConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..FileConfig::default()
    };
    let config = SlateConfig::resolve(file, |_| None);
    (dir, config)
}

#[test]
fn sample_fixtures_exist() {
    let root = workspace_root();
    assert!(root.join("fixtures/sample/events.json").exists());
    assert!(root.join("fixtures/sample/my_events.json").exists());
    assert!(root.join("templates/game_content.md").exists());
}

#[test]
fn scaffold_creates_matched_files_once() {
    let (dir, config) = sample_workspace();

    let first = run_scaffold(&config).expect("scaffold");
    assert_eq!(
        first.created,
        vec![
            "game-alabama-vs-tennessee-2025-09-20.json",
            "game-navy-vs-army-2025-09-20.json",
            "game-air-force-vs-navy-2025-09-20.json",
            "game-auburn-vs-texas-a-and-m-2025-09-27.json",
        ]
    );
    assert_eq!(first.skips.malformed_intents, 1);
    assert_eq!(first.skips.unmatched_intents, 1);
    assert!(first.collisions.is_empty());
    for name in &first.created {
        assert_eq!(fs::metadata(dir.path().join(name)).unwrap().len(), 0);
    }

    let second = run_scaffold(&config).expect("scaffold again");
    assert_eq!(second.units_of_work(), 0);
    assert_eq!(second.existing.len(), 4);
}

#[test]
fn prompts_follow_intent_order_then_directory_order() {
    let (dir, config) = sample_workspace();
    run_scaffold(&config).expect("scaffold");

    fs::write(
        dir.path().join("game-navy-vs-army-2025-09-20.json"),
        "{\"game_id\": \"def456\"}",
    )
    .unwrap();
    fs::write(dir.path().join("game-air-force-vs-navy-2025-09-20.json"), " \n\t\n").unwrap();
    fs::write(dir.path().join("game-rutgers-vs-iowa-2025-09-13.json"), "").unwrap();

    let (report, rendered) = run_prompts(&config).expect("prompts");
    let got: Vec<_> = report
        .prompts
        .iter()
        .map(|w| (w.event_id.as_str(), w.filename.as_str(), w.origin))
        .collect();
    assert_eq!(
        got,
        vec![
            (
                "abc123",
                "game-alabama-vs-tennessee-2025-09-20.json",
                WorkOrigin::IntendedEvent
            ),
            (
                "ghi789",
                "game-air-force-vs-navy-2025-09-20.json",
                WorkOrigin::IntendedEvent
            ),
            (
                "jkl012",
                "game-auburn-vs-texas-a-and-m-2025-09-27.json",
                WorkOrigin::IntendedEvent
            ),
            (
                "mno345",
                "game-rutgers-vs-iowa-2025-09-13.json",
                WorkOrigin::ExistingFile
            ),
        ]
    );
    assert_eq!(rendered.len(), 4);
    assert!(rendered[0].contains("Alabama at Tennessee"));
    assert!(rendered[0].contains("Use abc123 for the game_id."));
    assert!(rendered[3].contains("Paste content into: game-rutgers-vs-iowa-2025-09-13.json"));

    let (again, rendered_again) = run_prompts(&config).expect("prompts again");
    assert_eq!(again.prompts, report.prompts);
    assert_eq!(rendered_again, rendered);
}

#[test]
fn sync_scaffolds_then_prompts_everything_new() {
    let (_dir, config) = sample_workspace();
    let summary = run_sync(&config).expect("sync");
    assert_eq!(summary.scaffold.units_of_work(), 4);
    assert_eq!(summary.prompts.units_of_work(), 4);
    assert_eq!(summary.rendered.len(), 4);
}

#[test]
fn missing_inputs_are_fatal() {
    let (dir, config) = sample_workspace();
    fs::remove_file(dir.path().join("events.json")).unwrap();
    let err = run_scaffold(&config).expect_err("events.json is required");
    assert!(format!("{err:#}").contains("events.json"));

    fs::write(dir.path().join("events.json"), "{\"not\": \"a list\"}").unwrap();
    assert!(run_prompts(&config).is_err());
}

#[test]
fn custom_prompt_template_replaces_the_default() {
    let (dir, mut config) = sample_workspace();
    let template = dir.path().join("template.md");
    fs::write(&template, "Short form only.").unwrap();
    config.prompt_template = Some(template);
    run_scaffold(&config).expect("scaffold");

    let (_, rendered) = run_prompts(&config).expect("prompts");
    assert!(rendered[0].ends_with("\nShort form only.\n"));
    assert!(!rendered[0].contains("storylines"));
}

#[tokio::test]
async fn fetch_from_saved_response_replaces_events_file() {
    let (dir, config) = sample_workspace();
    fs::remove_file(dir.path().join("events.json")).unwrap();

    let saved = workspace_root().join("fixtures/sample/events.json");
    let summary = run_fetch(&config, Some(saved)).await.expect("fetch");
    assert_eq!(summary.total, 6);
    assert_eq!(summary.valid, 5);
    assert_eq!(summary.content_hash.len(), 64);

    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("events.json")).unwrap()).unwrap();
    assert_eq!(written.as_array().map(Vec::len), Some(5));

    let report = run_scaffold(&config).expect("scaffold from fetched feed");
    assert_eq!(report.units_of_work(), 4);
}

#[tokio::test]
async fn live_fetch_without_api_key_fails_before_any_request() {
    let (dir, config) = sample_workspace();
    let before = fs::read(dir.path().join("events.json")).unwrap();
    let err = run_fetch(&config, None).await.expect_err("no key");
    assert!(format!("{err:#}").contains("ODDS_API_KEY"));
    assert_eq!(fs::read(dir.path().join("events.json")).unwrap(), before);
}
