use dishlens::catalog::Catalog;
use dishlens::ranking::top_k;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_catalog(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn load_and_rank_salad_soup() {
    let file = write_catalog(
        r#"[
            {"id": 1, "label": "Salad", "image_locator": "salad.jpg", "embedding": [1.0, 0.0]},
            {"id": 2, "label": "Soup", "image_locator": "soup.jpg", "embedding": [0.0, 1.0]}
        ]"#,
    );
    let catalog = Catalog::load(file.path()).unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.dimension(), Some(2));

    let matches = top_k(&[1.0, 0.0], &catalog, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].entry.id, "1");
    assert_eq!(matches[0].entry.label, "Salad");
    assert!((matches[0].score - 1.0).abs() < 1e-9);
}

#[test]
fn load_generator_output_keeps_file_order() {
    let file = write_catalog(
        r#"[
            {"relative_path": "italian/risotto.jpg", "cuisine": "italian", "dish": "risotto",
             "url": "https://img.example/risotto.jpg", "embedding": [0.0, 0.6, 0.8], "embedding_dim": 3},
            {"relative_path": "italian/tiramisu.jpg", "cuisine": "italian", "dish": "tiramisu",
             "url": "https://img.example/tiramisu.jpg", "embedding": [0.0, 0.6, 0.8], "embedding_dim": 3}
        ]"#,
    );
    let catalog = Catalog::load(file.path()).unwrap();

    // Identical embeddings tie; catalog order decides
    let matches = top_k(&[0.0, 0.6, 0.8], &catalog, 2);
    let labels: Vec<&str> = matches.iter().map(|m| m.entry.label.as_str()).collect();
    assert_eq!(labels, vec!["risotto", "tiramisu"]);
}

#[test]
fn load_fails_fast_on_mixed_dimensions() {
    let file = write_catalog(
        r#"[
            {"dish": "risotto", "url": "a.jpg", "embedding": [1.0, 0.0]},
            {"dish": "tiramisu", "url": "b.jpg", "embedding": [1.0, 0.0, 0.0]}
        ]"#,
    );
    let err = Catalog::load(file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("tiramisu"), "got: {message}");
    assert!(message.contains("expected 2"), "got: {message}");
}

#[test]
fn load_missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dish_embeddings.json");
    let err = Catalog::load(&path).unwrap_err();
    assert!(err.to_string().contains("dish_embeddings.json"));
}

#[test]
fn empty_catalog_ranks_nothing() {
    let file = write_catalog("[]");
    let catalog = Catalog::load(file.path()).unwrap();
    assert!(catalog.is_empty());
    assert!(top_k(&[1.0, 0.0], &catalog, 3).is_empty());
}
