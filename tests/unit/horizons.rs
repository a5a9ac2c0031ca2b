//! Horizon arithmetic over realistic window lengths

use crate::common::test_data;
use pretty_assertions::assert_eq;
use rust_market_sync::api::{percent_change, HorizonChanges};
use test_log::test;

#[test]
fn test_full_year_window_fills_every_horizon() {
    // ~245 sessions in a trading year
    let window = test_data::rising_history(100.0, 245);
    let changes = HorizonChanges::from_window(&window);

    let latest = 344.0;
    assert_eq!(changes.previous, percent_change(latest, Some(343.0)));
    assert_eq!(changes.one_month, percent_change(latest, Some(latest - 21.0)));
    assert_eq!(changes.three_month, percent_change(latest, Some(latest - 63.0)));
    assert_eq!(changes.one_year, percent_change(latest, Some(100.0)));
    assert_eq!(changes.one_year, Some(244.0));
}

#[test]
fn test_three_month_needs_sixty_four_points() {
    let short = HorizonChanges::from_window(&test_data::rising_history(10.0, 63));
    assert_eq!(short.three_month, None);
    assert!(short.one_month.is_some());

    let enough = HorizonChanges::from_window(&test_data::rising_history(10.0, 64));
    assert_eq!(enough.three_month, percent_change(73.0, Some(10.0)));
}

#[test]
fn test_zero_past_close_is_absent() {
    let window = test_data::history(&[0.0, 50.0]);
    let changes = HorizonChanges::from_window(&window);
    assert_eq!(changes.previous, None);
    assert_eq!(changes.one_year, None);
}
