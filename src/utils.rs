use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::collections::BTreeSet;

use crate::models::{CalendarBasis, Config};

/// Market calendar for deciding which basis a sync cycle runs under.
///
/// Trading days are weekdays that are not in the fixed holiday set. Within a
/// trading day the regular session is inclusive at both ends.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    open: NaiveTime,
    close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
    offset: FixedOffset,
}

impl MarketCalendar {
    pub fn new(
        open: NaiveTime,
        close: NaiveTime,
        holidays: impl IntoIterator<Item = NaiveDate>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            open,
            close,
            holidays: holidays.into_iter().collect(),
            offset,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let offset = FixedOffset::east_opt(config.market_utc_offset_hours * 3600)
            .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset: {}h", config.market_utc_offset_hours))?;
        Ok(Self::new(
            config.market_open,
            config.market_close,
            config.holidays.iter().copied(),
            offset,
        ))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current date in the market's timezone
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Basis from time of day alone
    pub fn time_basis(&self, time: NaiveTime) -> CalendarBasis {
        if time < self.open {
            CalendarBasis::PreviousClosing
        } else if time <= self.close {
            CalendarBasis::Regular
        } else {
            CalendarBasis::Closing
        }
    }

    /// Basis for a wall-clock time already expressed in market local time
    pub fn basis_for_local(&self, local: NaiveDateTime) -> CalendarBasis {
        if !self.is_trading_day(local.date()) {
            return CalendarBasis::NonTrading;
        }
        self.time_basis(local.time())
    }

    pub fn basis_for(&self, now: DateTime<Utc>) -> CalendarBasis {
        self.basis_for_local(now.with_timezone(&self.offset).naive_local())
    }

    /// Most recent trading day strictly before `date`
    pub fn previous_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut current = date;

        // Holiday runs longer than a few weeks mean the holiday list is wrong
        for _ in 0..31 {
            current = current - Duration::days(1);
            if self.is_trading_day(current) {
                return Some(current);
            }
        }
        None
    }
}
