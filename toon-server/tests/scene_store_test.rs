//! Tests for saving, listing and loading scene collections on disk.

use std::io::Read;

use chrono::TimeZone;
use toon::{SceneCollection, ScenePosition, SCENE_COUNT};
use toon_client::config::ImageSettings;
use toon_client::generation::DispatchReport;
use toon_server::storage::{drawn_since, SceneStore};

fn collection() -> SceneCollection {
    let scenes = (1..=SCENE_COUNT)
        .map(|n| {
            let script = if n % 2 == 1 {
                format!("{n}번 장면에서 문을 열었는데")
            } else {
                format!("{n}번 장면은 정말 좋았어요.")
            };
            format!(r#""scene_{n}": {{"script": "{script}", "main_keyword": "장면{n}"}}"#)
        })
        .collect::<Vec<_>>()
        .join(",");
    SceneCollection::from_json(&format!(r#"{{"scenes": {{{scenes}}}}}"#)).unwrap()
}

#[tokio::test]
async fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();

    let id = store.save(&collection()).await.unwrap();

    assert!(dir
        .path()
        .join("scenes")
        .join(format!("scenes_{id}.json"))
        .exists());
    assert_eq!(store.load(&id).await.unwrap(), Some(collection()));
    assert_eq!(store.list().await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_saves_in_the_same_second_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();

    let mut ids = vec![];
    for _ in 0..3 {
        ids.push(store.save(&collection()).await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(store.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_and_unsafe_ids_load_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();

    assert_eq!(store.load("20240101_000000").await.unwrap(), None);
    assert_eq!(store.load("../scenes").await.unwrap(), None);
    assert!(store.images_dir("..").is_none());
    assert!(store.image_path("20240101_000000", "../../secret.png").is_none());
    assert!(store.image_path("..", "scene_1_20240101_000000.png").is_none());
}

#[tokio::test]
async fn test_list_ignores_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();
    std::fs::write(dir.path().join("scenes").join("notes.txt"), "hi").unwrap();
    std::fs::write(dir.path().join("scenes").join("scenes_x.json"), "{}").unwrap();

    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_image_per_scene() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();
    let id = store.save(&collection()).await.unwrap();
    let images = store.images_dir(&id).unwrap();
    std::fs::create_dir_all(&images).unwrap();
    for name in [
        "scene_1_20240101_090000.png",
        "scene_1_20240101_100000.png",
        "scene_2_20240101_090000.png",
        "scene_2_20240101_090000.png.part",
        "generation_report.json",
    ] {
        std::fs::write(images.join(name), b"x").unwrap();
    }

    let latest = store.latest_images(&id).await.unwrap();

    assert_eq!(latest.len(), 2);
    assert_eq!(
        latest[&ScenePosition::new(1).unwrap()],
        "scene_1_20240101_100000.png"
    );
    assert_eq!(
        latest[&ScenePosition::new(2).unwrap()],
        "scene_2_20240101_090000.png"
    );
    assert_eq!(
        store.image_path(&id, "scene_2_20240101_090000.png"),
        Some(images.join("scene_2_20240101_090000.png"))
    );
}

#[tokio::test]
async fn test_no_images_yet() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();
    let id = store.save(&collection()).await.unwrap();

    assert!(store.latest_images(&id).await.unwrap().is_empty());
    assert!(store.report(&id).await.is_none());
}

#[tokio::test]
async fn test_zip_holds_the_latest_image_of_each_scene() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();
    let id = store.save(&collection()).await.unwrap();
    let images = store.images_dir(&id).unwrap();
    std::fs::create_dir_all(&images).unwrap();
    for (name, bytes) in [
        ("scene_1_20240101_090000.png", b"old one".as_slice()),
        ("scene_1_20240101_100000.png", b"new one".as_slice()),
        ("scene_18_20240101_090000.png", b"last".as_slice()),
        ("generation_report.json", b"{}".as_slice()),
    ] {
        std::fs::write(images.join(name), bytes).unwrap();
    }

    let bytes = store.images_zip(&id).await.unwrap().unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();

    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "scene_18_20240101_090000.png".to_string(),
            "scene_1_20240101_100000.png".to_string(),
        ]
    );
    let mut content = String::new();
    archive
        .by_name("scene_1_20240101_100000.png")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "new one");
}

#[tokio::test]
async fn test_no_zip_without_images() {
    let dir = tempfile::tempdir().unwrap();
    let store = SceneStore::open(dir.path()).await.unwrap();
    let id = store.save(&collection()).await.unwrap();

    assert!(store.images_zip(&id).await.unwrap().is_none());
    assert!(store.images_zip("../x").await.unwrap().is_none());
}

#[test]
fn test_redraw_after_the_batch_supersedes_its_report() {
    let mut report = DispatchReport::new(ImageSettings::default());
    report.timestamp = chrono::Local
        .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
        .single()
        .unwrap()
        .to_rfc3339();

    assert!(drawn_since("scene_3_20240101_100500.png", &report));
    assert!(drawn_since("scene_3_20240101_100000.png", &report));
    assert!(!drawn_since("scene_3_20240101_095959.png", &report));
    assert!(!drawn_since("notes.txt", &report));
}
