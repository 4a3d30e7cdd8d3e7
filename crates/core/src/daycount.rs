use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;

/// Calendar policy for chargeable-day counting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayCountPolicy {
    /// Days of the week that never count toward a request.
    pub weekend_days: Vec<Weekday>,
}

impl Default for DayCountPolicy {
    fn default() -> Self {
        Self { weekend_days: vec![Weekday::Sat, Weekday::Sun] }
    }
}

impl DayCountPolicy {
    pub fn with_weekend_days(weekend_days: Vec<Weekday>) -> Self {
        Self { weekend_days }
    }

    pub fn is_weekend(&self, date: NaiveDate) -> bool {
        self.weekend_days.contains(&date.weekday())
    }

    /// Total chargeable days for a request. Half-day requests are always 0.5
    /// (the caller forces to_date == from_date for them); otherwise every
    /// non-weekend day in the inclusive range counts. Pure in its inputs, so
    /// callers re-run it on every save instead of trusting a stored value.
    pub fn total_days(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        is_half_day: bool,
    ) -> Decimal {
        if is_half_day {
            return Decimal::new(5, 1);
        }

        let mut days = 0u32;
        let mut cursor = from_date;
        while cursor <= to_date {
            if !self.is_weekend(cursor) {
                days += 1;
            }
            let Some(next) = cursor.succ_opt() else {
                break;
            };
            cursor = next;
        }

        Decimal::from(days)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};
    use rust_decimal::Decimal;

    use super::DayCountPolicy;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_through_friday_counts_five() {
        let policy = DayCountPolicy::default();
        // 2025-03-10 is a Monday, 2025-03-14 a Friday.
        assert_eq!(policy.total_days(date(2025, 3, 10), date(2025, 3, 14), false), Decimal::new(5, 0));
    }

    #[test]
    fn weekend_only_range_counts_zero() {
        let policy = DayCountPolicy::default();
        assert_eq!(policy.total_days(date(2025, 3, 15), date(2025, 3, 16), false), Decimal::ZERO);
    }

    #[test]
    fn single_weekend_day_counts_zero() {
        let policy = DayCountPolicy::default();
        assert_eq!(policy.total_days(date(2025, 3, 15), date(2025, 3, 15), false), Decimal::ZERO);
    }

    #[test]
    fn range_straddling_a_weekend_skips_it() {
        let policy = DayCountPolicy::default();
        // Thursday through Monday: Thu, Fri, Mon.
        assert_eq!(policy.total_days(date(2025, 3, 13), date(2025, 3, 17), false), Decimal::new(3, 0));
    }

    #[test]
    fn half_day_is_half_regardless_of_span() {
        let policy = DayCountPolicy::default();
        assert_eq!(policy.total_days(date(2025, 3, 10), date(2025, 3, 21), true), Decimal::new(5, 1));
        assert_eq!(policy.total_days(date(2025, 3, 15), date(2025, 3, 15), true), Decimal::new(5, 1));
    }

    #[test]
    fn single_weekday_counts_one() {
        let policy = DayCountPolicy::default();
        assert_eq!(policy.total_days(date(2025, 3, 12), date(2025, 3, 12), false), Decimal::ONE);
    }

    #[test]
    fn empty_weekend_set_counts_every_calendar_day() {
        let policy = DayCountPolicy::with_weekend_days(Vec::new());
        assert_eq!(policy.total_days(date(2025, 3, 10), date(2025, 3, 16), false), Decimal::new(7, 0));
    }

    #[test]
    fn custom_weekend_set_is_honored() {
        let policy = DayCountPolicy::with_weekend_days(vec![Weekday::Fri]);
        assert_eq!(policy.total_days(date(2025, 3, 10), date(2025, 3, 16), false), Decimal::new(6, 0));
    }

    #[test]
    fn inverted_range_counts_zero() {
        let policy = DayCountPolicy::default();
        assert_eq!(policy.total_days(date(2025, 3, 14), date(2025, 3, 10), false), Decimal::ZERO);
    }
}
