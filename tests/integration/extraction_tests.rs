use super::*;
use drift_harvester::extractor::placeholders;
use drift_harvester::Extractor;

#[test]
fn test_three_reviews_one_missing_reviewer() {
    let html = product_page("lz_28 zl_28 lz4_28");
    let record = Extractor::parse(&html, "item", &SelectorConfig::default_template()).unwrap();

    assert_eq!(record.reviews.len(), 3);

    let incomplete = &record.reviews[1];
    assert_eq!(incomplete.reviewer, placeholders::REVIEWER);
    assert_eq!(incomplete.date, "2 March");
    assert_eq!(incomplete.comment, "Runs small");
    assert_eq!(incomplete.rating, 1);
    assert_eq!(incomplete.product_color, "White");
    assert!(incomplete.media.is_empty());

    assert_eq!(record.reviews[0].reviewer, "Anna");
    assert_eq!(record.reviews[0].rating, 2);
    assert_eq!(record.reviews[0].media, vec!["https://cdn.example/a.jpg".to_string()]);
    assert_eq!(record.reviews[2].reviewer, "Boris");
    assert_eq!(record.reviews[2].rating, 3);
}

#[test]
fn test_empty_config_yields_all_placeholders() {
    let html = product_page("lz_28 zl_28 lz4_28");
    let record = Extractor::parse(&html, "item", &SelectorConfig::from_json_str("{\"selectors\": 7}")).unwrap();

    assert_eq!(record.title, placeholders::TITLE);
    assert_eq!(record.price, placeholders::PRICE);
    assert_eq!(record.description, placeholders::DESCRIPTION);
    assert_eq!(record.rating.overall_rating, placeholders::RATING_MISSING);
    assert!(record.characteristics.is_empty());
    assert!(record.reviews.is_empty());
}

#[test]
fn test_selector_config_round_trip_through_disk() {
    let workspace = Workspace::new();
    let config = SelectorConfig::default_template();

    config.save(&workspace.selectors()).unwrap();
    let loaded = SelectorConfig::load(&workspace.selectors()).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_unreadable_selector_file_is_config_load_error() {
    let workspace = Workspace::new();
    let err = SelectorConfig::load(&workspace.selectors()).unwrap_err();
    assert!(matches!(err, drift_harvester::AppError::ConfigLoad { .. }));
}
