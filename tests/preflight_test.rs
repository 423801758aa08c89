use media_sync::preflight::{self, BatchManifest, PreflightError};
use serde_json::json;

fn photos(n: usize) -> Vec<serde_json::Value> {
    (0..n).map(|i| json!({"url": format!("batch/{i}.jpg")})).collect()
}

#[test]
fn three_item_batch_with_oversized_item() {
    let td = tempfile::tempdir().unwrap();
    let input = td.path().join("batch.json");
    let batch = json!([
        {"id": "B-1", "name": "Civil War Sabre", "category": "militaria",
         "condition": "good", "photos": photos(4)},
        {"id": "B-2", "name": "First Edition Atlas", "category": "books_and_manuscripts",
         "condition": "very_good", "photos": photos(25)},
        {"id": "B-3", "name": "Oil Landscape", "category": "fine_art",
         "condition": "excellent", "photos": photos(2)},
    ]);
    std::fs::write(&input, serde_json::to_vec(&batch).unwrap()).unwrap();
    let out = td.path().join("batches");

    let (manifest, path) = preflight::run(&input, &out).unwrap();

    assert_eq!(manifest.total_products, 3);
    assert_eq!(manifest.valid_products, 2);
    assert_eq!(manifest.invalid_products, 1);
    assert_eq!(manifest.total_photos, 31);
    let oversized = &manifest.products[1];
    assert!(!oversized.valid);
    assert_eq!(oversized.errors, vec!["Too many photos: 25 (max 20)".to_string()]);
    assert_eq!(oversized.index, 1);

    assert_eq!(path.parent().unwrap(), out.as_path());
    let written: BatchManifest = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written, manifest);
}

#[test]
fn all_invalid_batch_still_writes_manifest() {
    let td = tempfile::tempdir().unwrap();
    let input = td.path().join("batch.json");
    std::fs::write(&input, r#"[{"name": "No photos", "category": "toys", "condition": "good"}]"#)
        .unwrap();

    let (manifest, path) = preflight::run(&input, td.path()).unwrap();

    assert_eq!(manifest.valid_products, 0);
    assert_eq!(
        manifest.products[0].errors,
        vec![
            "Invalid category: toys".to_string(),
            "Missing required field: photos (at least 1 required)".to_string(),
        ]
    );
    assert!(path.exists());
}

#[test]
fn null_fields_reach_the_validator() {
    let td = tempfile::tempdir().unwrap();
    let input = td.path().join("batch.json");
    std::fs::write(
        &input,
        r#"[{"id": "P-1", "name": null, "category": "militaria", "condition": "good", "photos": []}]"#,
    )
    .unwrap();

    let (manifest, _) = preflight::run(&input, td.path()).unwrap();

    assert_eq!(
        manifest.products[0].errors,
        vec![
            "Missing required field: name".to_string(),
            "Missing required field: photos (at least 1 required)".to_string(),
        ]
    );
    assert_eq!(manifest.products[0].id, "P-1");
}

#[test]
fn missing_input_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let err = preflight::run(&td.path().join("nope.json"), td.path()).unwrap_err();
    assert!(matches!(err, PreflightError::NotFound(_)));
    assert_eq!(std::fs::read_dir(td.path()).unwrap().count(), 0);
}
