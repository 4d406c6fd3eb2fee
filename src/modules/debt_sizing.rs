//! Debt sizing: the largest loan whose DSCR-sculpted repayment schedule stays
//! within the target coverage ratio and clears inside the tenor.
use super::{InputSpec, ModuleInputs, ModuleTemplate};
use crate::config::SolverConfig;
use crate::solver::largest_feasible;
use crate::store::Timeline;

const INPUTS: &[InputSpec] = &[
    InputSpec::series("cfads"),
    InputSpec::series("debt_flag"),
    InputSpec::series("total_funding"),
    InputSpec::scalar("max_gearing", 70.0),
    InputSpec::scalar("interest_rate", 0.0),
    InputSpec::scalar("tenor_years", 15.0),
    InputSpec::scalar("target_dscr", 1.35),
    InputSpec::choice("debt_period", "quarterly"),
];

const OUTPUTS: &[&str] = &[
    "sized_debt",
    "opening_balance",
    "interest",
    "principal",
    "debt_service",
    "closing_balance",
    "dscr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Frequency::Monthly),
            "quarterly" => Some(Frequency::Quarterly),
            "yearly" | "annual" | "annually" => Some(Frequency::Yearly),
            _ => None,
        }
    }

    fn months(self) -> u8 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::Yearly => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DebtSizing;

impl DebtSizing {
    pub fn new() -> Self { Self }
}

impl ModuleTemplate for DebtSizing {
    fn id(&self) -> &str { "debt_sizing" }

    fn inputs(&self) -> &[InputSpec] { INPUTS }

    fn outputs(&self) -> &[&'static str] { OUTPUTS }

    fn evaluate(&self, inputs: &ModuleInputs, timeline: &Timeline, solver: &SolverConfig) -> Vec<Vec<f64>> {
        let periods = timeline.len();
        let Some(terms) = Terms::from_inputs(inputs, timeline) else {
            return Schedule::zeros(periods).into_outputs(0.0);
        };

        let eligible: f64 = inputs.series("total_funding").iter().sum();
        let bound = eligible * inputs.scalar("max_gearing") / 100.0;
        if !(bound.is_finite() && bound > 0.0) {
            tracing::debug!(bound, "debt sizing bound is not positive, no debt");
            return Schedule::zeros(periods).into_outputs(0.0);
        }

        let outcome = largest_feasible(0.0, bound, solver, |debt| {
            terms.schedule(debt, periods, solver.dscr_tolerance).feasible
        });
        tracing::debug!(iterations = outcome.iterations, debt = ?outcome.best, bound, "debt sized");

        match outcome.best {
            Some(debt) if debt > 0.0 => terms.schedule(debt, periods, solver.dscr_tolerance).into_outputs(debt),
            _ => Schedule::zeros(periods).into_outputs(0.0),
        }
    }
}

/// Loan terms resolved against the timeline.
struct Terms<'a> {
    cfads: &'a [f64],
    /// Active periods in order, with whether each is a payment period.
    window: Vec<(usize, bool)>,
    payments: usize,
    monthly_rate: f64,
    target: f64,
}

impl<'a> Terms<'a> {
    /// `None` when no schedule can exist: no active period, zero tenor or a
    /// non-positive coverage target.
    fn from_inputs(inputs: &'a ModuleInputs, timeline: &Timeline) -> Option<Self> {
        let target = inputs.scalar("target_dscr");
        if !(target.is_finite() && target > 0.0) {
            return None;
        }

        let frequency = match inputs.choice("debt_period") {
            None => Frequency::Quarterly,
            Some(s) => Frequency::parse(s).unwrap_or_else(|| {
                tracing::warn!(debt_period = s, "unknown debt period, using quarterly");
                Frequency::Quarterly
            }),
        };

        let flag = inputs.series("debt_flag");
        let active = |i: usize| flag.get(i).is_some_and(|f| *f != 0.0);
        let first = (0..timeline.len()).find(|&i| active(i))?;

        let tenor_months = (inputs.scalar("tenor_years") * 12.0).round();
        if !(tenor_months >= 1.0) {
            return None;
        }
        let end = timeline.len().min(first.saturating_add(tenor_months as usize));

        let step = frequency.months();
        let mut window: Vec<(usize, bool)> = (first..end)
            .filter(|&i| active(i))
            .map(|i| (i, timeline.period(i).is_some_and(|p| p.month % step == 0)))
            .collect();
        if let Some(last) = window.last_mut() {
            last.1 = true;
        }
        let payments = window.iter().filter(|(_, pay)| *pay).count();

        Some(Terms {
            cfads: inputs.series("cfads"),
            window,
            payments,
            monthly_rate: inputs.scalar("interest_rate") / 100.0 / 12.0,
            target,
        })
    }

    /// Walks the window for one candidate principal.
    fn schedule(&self, debt: f64, periods: usize, dscr_tolerance: f64) -> Schedule {
        let mut s = Schedule::zeros(periods);
        let mut balance = debt;
        let mut remaining = self.payments;
        let (mut cfads_acc, mut interest_acc) = (0.0, 0.0);

        for &(i, pay) in &self.window {
            s.opening[i] = balance;
            let interest = balance * self.monthly_rate;
            s.interest[i] = interest;
            interest_acc += interest;
            cfads_acc += self.cfads.get(i).copied().unwrap_or(0.0);

            if pay {
                let principal = if remaining <= 1 {
                    balance
                } else {
                    let sculpted = cfads_acc / self.target - interest_acc;
                    sculpted.min(balance / remaining as f64)
                };
                if principal < 0.0 {
                    s.feasible = false;
                }

                let service = principal + interest_acc;
                if service > 0.0 {
                    let dscr = cfads_acc / service;
                    s.dscr[i] = dscr;
                    if dscr < self.target - dscr_tolerance {
                        s.feasible = false;
                    }
                }

                s.principal[i] = principal;
                s.service[i] = service;
                balance -= principal;
                remaining = remaining.saturating_sub(1);
                cfads_acc = 0.0;
                interest_acc = 0.0;
            }
            s.closing[i] = balance;
        }

        tracing::trace!(debt, feasible = s.feasible, "debt schedule candidate");
        s
    }
}

struct Schedule {
    opening: Vec<f64>,
    interest: Vec<f64>,
    principal: Vec<f64>,
    service: Vec<f64>,
    closing: Vec<f64>,
    dscr: Vec<f64>,
    feasible: bool,
}

impl Schedule {
    fn zeros(periods: usize) -> Self {
        let z = vec![0.0; periods];
        Schedule {
            opening: z.clone(),
            interest: z.clone(),
            principal: z.clone(),
            service: z.clone(),
            closing: z.clone(),
            dscr: z,
            feasible: true,
        }
    }

    fn into_outputs(self, debt: f64) -> Vec<Vec<f64>> {
        let sized = vec![debt; self.opening.len()];
        vec![sized, self.opening, self.interest, self.principal, self.service, self.closing, self.dscr]
    }
}
