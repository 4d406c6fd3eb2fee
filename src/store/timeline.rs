//! The ordered sequence of model periods every array is aligned to.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    /// Calendar month, 1..=12.
    pub month: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub periods: Vec<Period>,
}

impl Timeline {
    pub fn new(periods: Vec<Period>) -> Self { Self { periods } }

    /// `count` consecutive months starting at `start_year`/`start_month`.
    pub fn monthly(start_year: i32, start_month: u8, count: usize) -> Self {
        let mut year = start_year;
        let mut month = start_month.clamp(1, 12);
        let mut periods = Vec::with_capacity(count);
        for _ in 0..count {
            periods.push(Period { year, month });
            if month == 12 {
                month = 1;
                year += 1;
            } else {
                month += 1;
            }
        }
        Self { periods }
    }

    #[inline(always)]
    pub fn len(&self) -> usize { self.periods.len() }

    pub fn is_empty(&self) -> bool { self.periods.is_empty() }

    pub fn period(&self, i: usize) -> Option<&Period> { self.periods.get(i) }

    /// True for the first period and wherever the calendar year rolls over.
    pub fn is_year_start(&self, i: usize) -> bool {
        match i {
            0 => true,
            _ => match (self.periods.get(i - 1), self.periods.get(i)) {
                (Some(prev), Some(cur)) => prev.year != cur.year,
                _ => false,
            },
        }
    }
}
