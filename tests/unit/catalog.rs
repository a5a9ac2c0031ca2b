//! Catalog selection and configuration loading

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rust_market_sync::models::{Catalog, Category, Config};
use rust_market_sync::SyncError;
use test_log::test;

#[test]
fn test_every_category_has_default_instruments() {
    let catalog = Catalog::default_catalog();
    for category in Category::ALL {
        assert!(
            !catalog.instruments_in(category).is_empty(),
            "no instruments for {}",
            category
        );
    }
    let categories: Vec<Category> = catalog.categories().collect();
    assert_eq!(categories, Category::ALL.to_vec());
}

#[test]
fn test_select_is_case_insensitive() {
    let catalog = Catalog::default_catalog();
    let semis = catalog.select(Some("Semiconductor")).unwrap();
    let tickers: Vec<&str> = semis.iter().map(|i| i.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["005930", "000660"]);
}

#[test]
fn test_unknown_category_is_client_error() {
    let err = Catalog::default_catalog().select(Some("crypto")).unwrap_err();
    assert_matches!(&err, SyncError::UnknownCategory(name) if name == "crypto");
    assert!(err.is_client_error());
}

#[test]
fn test_load_catalog_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.csv");
    std::fs::write(&path, "category,ticker,name\nbio,068270,Celltrion\nbio,207940,\n").unwrap();

    let config = Config {
        catalog_path: Some(path.to_string_lossy().to_string()),
        ..Config::default()
    };
    let catalog = config.load_catalog().unwrap();
    assert_eq!(catalog.len(), 2);
    assert_matches!(catalog.select(Some("car")), Err(SyncError::UnknownCategory(_)));

    let default = Config::default().load_catalog().unwrap();
    assert_eq!(default.len(), 24);
}
