//! Market calendar behaviour through the public configuration path

use chrono::{NaiveDate, NaiveTime};
use pretty_assertions::assert_eq;
use rust_market_sync::models::{CalendarBasis, Config};
use rust_market_sync::utils::MarketCalendar;
use test_log::test;

fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
}

#[test]
fn test_default_config_calendar() {
    let calendar = MarketCalendar::from_config(&Config::default()).unwrap();

    assert_eq!(calendar.offset().local_minus_utc(), 9 * 3600);
    // Liberation Day and Christmas are closed even on weekdays
    assert_eq!(calendar.basis_for_local(local(2025, 8, 15, 10, 0)), CalendarBasis::NonTrading);
    assert_eq!(calendar.basis_for_local(local(2025, 12, 25, 10, 0)), CalendarBasis::NonTrading);
    assert_eq!(calendar.basis_for_local(local(2025, 12, 24, 10, 0)), CalendarBasis::Regular);
}

#[test]
fn test_custom_session_hours() {
    let config = Config {
        market_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        market_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        market_utc_offset_hours: -5,
        holidays: vec![],
        ..Config::default()
    };
    let calendar = MarketCalendar::from_config(&config).unwrap();

    assert_eq!(calendar.basis_for_local(local(2025, 12, 25, 9, 29)), CalendarBasis::PreviousClosing);
    assert_eq!(calendar.basis_for_local(local(2025, 12, 25, 16, 0)), CalendarBasis::Regular);
    assert_eq!(calendar.basis_for_local(local(2025, 12, 25, 16, 1)), CalendarBasis::Closing);

    // 14:00 UTC is 09:00 in UTC-5
    let now = local(2025, 12, 25, 14, 0).and_utc();
    assert_eq!(calendar.basis_for(now), CalendarBasis::PreviousClosing);
}

#[test]
fn test_invalid_offset_rejected() {
    let config = Config {
        market_utc_offset_hours: 30,
        ..Config::default()
    };
    assert!(MarketCalendar::from_config(&config).is_err());
}

#[test]
fn test_previous_trading_day_skips_holiday_weekend() {
    let calendar = MarketCalendar::from_config(&Config::default()).unwrap();
    // Tuesday 2025-05-06 -> Monday 05-05 is Children's Day -> Friday 05-02
    let tuesday = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
    assert_eq!(calendar.previous_trading_day(tuesday), NaiveDate::from_ymd_opt(2025, 5, 2));
}
