//! Calendar pricing: weekday/weekend crossed with winter/summer.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::engine::EngineError;
use crate::model::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// September through March, wrapping the year end.
    Winter,
    /// April through August.
    Summer,
}

impl Season {
    pub fn of(date: NaiveDate) -> Self {
        match date.month() {
            9..=12 | 1..=3 => Season::Winter,
            _ => Season::Summer,
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateTable {
    pub winter_weekday: Amount,
    pub winter_weekend: Amount,
    pub summer_weekday: Amount,
    pub summer_weekend: Amount,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            winter_weekday: 50,
            winter_weekend: 70,
            summer_weekday: 60,
            summer_weekend: 80,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingCalculator {
    rates: RateTable,
}

impl PricingCalculator {
    pub fn new(rates: RateTable) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    pub fn price_per_day(&self, date: NaiveDate) -> Amount {
        match (Season::of(date), is_weekend(date)) {
            (Season::Winter, false) => self.rates.winter_weekday,
            (Season::Winter, true) => self.rates.winter_weekend,
            (Season::Summer, false) => self.rates.summer_weekday,
            (Season::Summer, true) => self.rates.summer_weekend,
        }
    }

    /// Sum of daily prices from `from` to `to`, both ends included.
    pub fn total_price(&self, from: NaiveDate, to: NaiveDate) -> Result<Amount, EngineError> {
        if to < from {
            return Err(EngineError::InvalidRange { from, to });
        }
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .map(|d| self.price_per_day(d))
            .sum())
    }
}
