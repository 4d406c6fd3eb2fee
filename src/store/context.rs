//! The resolver's output: named, period-aligned input arrays.
//!
//! The host application owns how these arrays are produced. The builders here
//! cover the shapes a model typically supplies (constants, series, time-window
//! flags with their start/end markers, and escalation indices).
use super::timeline::Timeline;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Series = Arc<Vec<f64>>;

#[derive(Debug, Clone, Default)]
pub struct ReferenceContext {
    periods: usize,
    values: BTreeMap<String, Series>,
}

impl ReferenceContext {
    pub fn new(periods: usize) -> Self {
        Self { periods, values: BTreeMap::new() }
    }

    pub fn for_timeline(timeline: &Timeline) -> Self { Self::new(timeline.len()) }

    pub fn periods(&self) -> usize { self.periods }

    pub fn insert_series(&mut self, name: &str, values: Vec<f64>) -> &mut Self {
        self.values.insert(name.to_string(), Arc::new(values));
        self
    }

    /// A scalar broadcast to every period.
    pub fn insert_constant(&mut self, name: &str, value: f64) -> &mut Self {
        let periods = self.periods;
        self.insert_series(name, vec![value; periods])
    }

    /// A 1/0 window over `start..=end`, plus `{name}.Start` and `{name}.End`
    /// markers set only on the window's first and last period.
    pub fn insert_flag(&mut self, name: &str, start: usize, end: usize) -> &mut Self {
        let periods = self.periods;
        let mut flag = vec![0.0; periods];
        let mut first = vec![0.0; periods];
        let mut last = vec![0.0; periods];
        if start <= end && start < periods {
            let end = end.min(periods - 1);
            flag[start..=end].iter_mut().for_each(|v| *v = 1.0);
            first[start] = 1.0;
            last[end] = 1.0;
        }
        self.insert_series(name, flag);
        self.insert_series(&format!("{}.Start", name), first);
        self.insert_series(&format!("{}.End", name), last)
    }

    /// Annually compounding index: `(1 + rate)^(year - base_year)`, 1 before the base year.
    pub fn insert_index(&mut self, name: &str, annual_rate_pct: f64, base_year: i32, timeline: &Timeline) -> &mut Self {
        let rate = annual_rate_pct / 100.0;
        let values = timeline
            .periods
            .iter()
            .map(|p| {
                let years = (p.year - base_year).max(0);
                (1.0 + rate).powi(years)
            })
            .collect();
        self.insert_series(name, values)
    }

    pub fn get(&self, name: &str) -> Option<&Series> { self.values.get(name) }

    pub fn contains(&self, name: &str) -> bool { self.values.contains_key(name) }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Series)> { self.values.iter() }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_derives_start_and_end_markers() {
        let mut ctx = ReferenceContext::new(6);
        ctx.insert_flag("F1", 2, 4);
        assert_eq!(ctx.get("F1").unwrap().as_slice(), &[0.0, 0.0, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(ctx.get("F1.Start").unwrap().as_slice(), &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(ctx.get("F1.End").unwrap().as_slice(), &[0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_flag_window_clamped_to_timeline() {
        let mut ctx = ReferenceContext::new(3);
        ctx.insert_flag("F2", 1, 10);
        assert_eq!(ctx.get("F2").unwrap().as_slice(), &[0.0, 1.0, 1.0]);
        assert_eq!(ctx.get("F2.End").unwrap().as_slice(), &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_index_steps_at_year_boundary() {
        let timeline = Timeline::monthly(2024, 12, 3);
        let mut ctx = ReferenceContext::for_timeline(&timeline);
        ctx.insert_index("I1", 10.0, 2024, &timeline);
        let idx = ctx.get("I1").unwrap();
        assert_eq!(idx[0], 1.0);
        assert!((idx[1] - 1.1).abs() < 1e-12);
        assert!((idx[2] - 1.1).abs() < 1e-12);
    }
}
