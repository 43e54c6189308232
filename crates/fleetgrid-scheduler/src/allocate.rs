//! Allocation scheduler.
//!
//! A greedy approximation of max-min fair share. Each pass shuffles the
//! machinetypes, drops the ineligible ones, and picks the one with the lowest
//! `weighted_machines`; ties go to the earlier type in the shuffled order.
//! One machine is requested per pass and the counters are bumped at once, so
//! the next pass sees the new pressure even if the request later fails.
//!
//! ```text
//! loop:
//!     stop if space shutdown_time passed
//!     stop if space total_processors >= processors_limit
//!     stop if processors issued this cycle >= ceil(processors_limit * 0.1)
//!     shuffle machinetypes
//!     pick eligible type with min weighted_machines, or stop
//!     issue one creation of min_processors
//! ```

use std::collections::BTreeMap;

use tracing::debug;

use crate::counters::{MachinetypeCounters, SpaceTotals};

/// Processors created per cycle when the space limit is unknown.
pub const DEFAULT_CREATIONS_PER_CYCLE: u32 = 10;

/// Why a machinetype is skipped in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// `target_share` is zero.
    Disabled,
    /// The machinetype reached its own processor limit.
    ProcessorsLimit,
    /// Too many processors are still starting.
    StartingLimit,
    /// Inside the flat cooldown after an abort.
    Backoff,
    /// Inside the extended cooldown while older machines may still fizzle.
    FizzleBackoff,
}

impl Ineligible {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ProcessorsLimit => "processors limit reached",
            Self::StartingLimit => "max starting processors reached",
            Self::Backoff => "in backoff after abort",
            Self::FizzleBackoff => "in backoff while machines may still fizzle",
        }
    }
}

/// Why allocation stops for the rest of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PassedShutdownTime,
    SpaceLimit,
    Throttle,
    NothingEligible,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PassedShutdownTime => "space passed its shutdown time",
            Self::SpaceLimit => "space processors limit reached",
            Self::Throttle => "per-cycle creation throttle reached",
            Self::NothingEligible => "no eligible machinetype",
        }
    }
}

/// Processors that may be created in one cycle.
pub fn creation_budget(processors_limit: Option<u32>) -> u32 {
    processors_limit.map_or(DEFAULT_CREATIONS_PER_CYCLE, |limit| limit.div_ceil(10))
}

/// Space-wide conditions that end allocation before any pass.
pub fn hard_stop(
    totals: &SpaceTotals,
    processors_limit: Option<u32>,
    shutdown_time: Option<u64>,
    issued: u32,
    budget: u32,
    now: u64,
) -> Option<StopReason> {
    if shutdown_time.is_some_and(|deadline| now > deadline) {
        return Some(StopReason::PassedShutdownTime);
    }
    if processors_limit.is_some_and(|limit| totals.total_processors >= limit) {
        return Some(StopReason::SpaceLimit);
    }
    if issued >= budget {
        return Some(StopReason::Throttle);
    }
    None
}

/// Check one machinetype against every per-type constraint.
pub fn eligibility(c: &MachinetypeCounters, now: u64) -> Result<(), Ineligible> {
    let config = &c.config;
    if config.target_share <= 0.0 {
        return Err(Ineligible::Disabled);
    }
    if config
        .processors_limit
        .is_some_and(|limit| c.total_processors >= limit)
    {
        return Err(Ineligible::ProcessorsLimit);
    }
    if config
        .effective_max_starting_processors()
        .is_some_and(|limit| c.starting_processors >= limit)
    {
        return Err(Ineligible::StartingLimit);
    }
    let backoff_until = c.last_abort_time.saturating_add(config.backoff_seconds);
    if now < backoff_until {
        return Err(Ineligible::Backoff);
    }
    if now < backoff_until.saturating_add(config.fizzle_seconds) && c.not_passed_fizzle > 0 {
        return Err(Ineligible::FizzleBackoff);
    }
    Ok(())
}

/// Pick the most under-served eligible machinetype.
///
/// `order` is the shuffled list of machinetype names; on equal
/// `weighted_machines` the earlier one wins.
pub fn select(
    space: &str,
    counters: &BTreeMap<String, MachinetypeCounters>,
    order: &[String],
    now: u64,
) -> Option<String> {
    let mut best: Option<&MachinetypeCounters> = None;
    for name in order {
        let Some(c) = counters.get(name) else {
            continue;
        };
        if let Err(reason) = eligibility(c, now) {
            debug!(%space, machinetype = %name, reason = reason.as_str(), "machinetype not eligible");
            continue;
        }
        if best.is_none_or(|b| c.weighted_machines < b.weighted_machines) {
            best = Some(c);
        }
    }
    best.map(|c| c.config.name.clone())
}

/// Account for one issued creation before the provider answers.
///
/// Never rolled back: a failed creation over-counts until the next fold.
pub fn record_creation(c: &mut MachinetypeCounters, totals: &mut SpaceTotals, processors: u32) {
    c.total_machines += 1;
    c.total_processors += processors;
    c.starting_processors += processors;
    c.not_passed_fizzle += 1;
    if let Some(weighted) = c.weighted(c.expected_weight(processors)) {
        c.weighted_machines += weighted;
    }

    totals.total_machines += 1;
    totals.total_processors += processors;
    totals.starting_processors += processors;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mt_config;

    fn counters_of(list: Vec<MachinetypeCounters>) -> BTreeMap<String, MachinetypeCounters> {
        list.into_iter().map(|c| (c.config.name.clone(), c)).collect()
    }

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn budget_is_a_tenth_of_the_limit() {
        assert_eq!(creation_budget(Some(100)), 10);
        assert_eq!(creation_budget(Some(101)), 11);
        assert_eq!(creation_budget(Some(5)), 1);
        assert_eq!(creation_budget(None), DEFAULT_CREATIONS_PER_CYCLE);
    }

    #[test]
    fn hard_stops() {
        let mut totals = SpaceTotals::default();
        assert_eq!(hard_stop(&totals, Some(100), None, 0, 10, 1000), None);
        assert_eq!(
            hard_stop(&totals, Some(100), Some(999), 0, 10, 1000),
            Some(StopReason::PassedShutdownTime)
        );
        assert_eq!(hard_stop(&totals, Some(100), None, 10, 10, 1000), Some(StopReason::Throttle));

        totals.total_processors = 100;
        assert_eq!(hard_stop(&totals, Some(100), None, 0, 10, 1000), Some(StopReason::SpaceLimit));
        // No known limit: only the throttle applies.
        assert_eq!(hard_stop(&totals, None, None, 0, 10, 1000), None);
    }

    #[test]
    fn disabled_type_is_never_eligible() {
        let c = MachinetypeCounters::new(mt_config("atlas", 0.0), 0);
        assert_eq!(eligibility(&c, 1000), Err(Ineligible::Disabled));
    }

    #[test]
    fn own_processor_limit() {
        let mut config = mt_config("atlas", 1.0);
        config.processors_limit = Some(50);
        let mut c = MachinetypeCounters::new(config, 0);
        c.total_processors = 50;
        assert_eq!(eligibility(&c, 1000), Err(Ineligible::ProcessorsLimit));
    }

    #[test]
    fn starting_limit_defaults_to_processors_limit() {
        let mut config = mt_config("atlas", 1.0);
        config.processors_limit = Some(50);
        let mut c = MachinetypeCounters::new(config, 0);
        c.total_processors = 20;
        c.starting_processors = 20;
        assert_eq!(eligibility(&c, 1000), Ok(()));

        c.config.max_starting_processors = Some(5);
        assert_eq!(eligibility(&c, 1000), Err(Ineligible::StartingLimit));
    }

    #[test]
    fn flat_backoff_after_abort() {
        let mut config = mt_config("atlas", 1.0);
        config.backoff_seconds = 600;
        config.fizzle_seconds = 300;
        let c = MachinetypeCounters::new(config, 1000);

        assert_eq!(eligibility(&c, 1599), Err(Ineligible::Backoff));
        // Past the flat backoff and nothing left that could fizzle.
        assert_eq!(eligibility(&c, 1600), Ok(()));
    }

    #[test]
    fn extended_backoff_while_siblings_may_fizzle() {
        let mut config = mt_config("atlas", 1.0);
        config.backoff_seconds = 600;
        config.fizzle_seconds = 300;
        let mut c = MachinetypeCounters::new(config, 1000);
        c.not_passed_fizzle = 1;

        assert_eq!(eligibility(&c, 1700), Err(Ineligible::FizzleBackoff));
        assert_eq!(eligibility(&c, 1900), Ok(()));
    }

    #[test]
    fn select_prefers_lowest_weight() {
        let mut a = MachinetypeCounters::new(mt_config("a", 0.75), 0);
        a.weighted_machines = 4.0;
        let mut b = MachinetypeCounters::new(mt_config("b", 0.25), 0);
        b.weighted_machines = 2.0;
        let counters = counters_of(vec![a, b]);

        assert_eq!(select("cloud", &counters, &order(&["a", "b"]), 0), Some("b".to_string()));
    }

    #[test]
    fn ties_follow_shuffle_order() {
        let counters = counters_of(vec![
            MachinetypeCounters::new(mt_config("a", 1.0), 0),
            MachinetypeCounters::new(mt_config("b", 1.0), 0),
        ]);
        assert_eq!(select("cloud", &counters, &order(&["b", "a"]), 0), Some("b".to_string()));
        assert_eq!(select("cloud", &counters, &order(&["a", "b"]), 0), Some("a".to_string()));
    }

    #[test]
    fn nothing_selected_when_all_ineligible() {
        let counters = counters_of(vec![MachinetypeCounters::new(mt_config("a", 0.0), 0)]);
        assert_eq!(select("cloud", &counters, &order(&["a"]), 0), None);
    }

    #[test]
    fn starting_cap_reached_within_one_cycle() {
        // max_starting_processors = 5, min_processors = 1, processors_limit = 50.
        let mut config = mt_config("atlas", 1.0);
        config.processors_limit = Some(50);
        config.max_starting_processors = Some(5);
        let mut counters = counters_of(vec![MachinetypeCounters::new(config, 0)]);
        let mut totals = SpaceTotals::default();
        let names = order(&["atlas"]);

        let mut issued = 0;
        while let Some(mt) = select("cloud", &counters, &names, 1000) {
            let c = counters.get_mut(&mt).unwrap();
            record_creation(c, &mut totals, 1);
            issued += 1;
            assert!(issued <= 5);
        }
        assert_eq!(issued, 5);
        assert_eq!(counters["atlas"].starting_processors, 5);
        assert_eq!(
            eligibility(&counters["atlas"], 1000),
            Err(Ineligible::StartingLimit)
        );
    }

    #[test]
    fn creation_bump_uses_observed_capacity() {
        let mut c = MachinetypeCounters::new(mt_config("atlas", 0.5), 0);
        c.running_processors = 2;
        c.running_hs06 = 20.0;
        c.weighted_machines = 40.0;
        let mut totals = SpaceTotals::default();

        record_creation(&mut c, &mut totals, 1);
        // 1 processor at 10 hs06 each, over a 0.5 share.
        assert_eq!(c.weighted_machines, 60.0);
        assert_eq!(totals.total_processors, 1);
    }

    #[test]
    fn greedy_passes_converge_to_target_shares() {
        let mut counters = counters_of(vec![
            MachinetypeCounters::new(mt_config("a", 0.75), 0),
            MachinetypeCounters::new(mt_config("b", 0.25), 0),
        ]);
        let mut totals = SpaceTotals::default();
        let names = order(&["a", "b"]);

        while hard_stop(&totals, Some(100), None, 0, u32::MAX, 0).is_none() {
            let mt = select("cloud", &counters, &names, 0).unwrap();
            record_creation(counters.get_mut(&mt).unwrap(), &mut totals, 1);
        }

        let a = counters["a"].total_processors;
        let b = counters["b"].total_processors;
        assert_eq!(a + b, 100);
        assert!((a as i64 - 75).abs() <= 1, "a = {a}");
        assert!((b as i64 - 25).abs() <= 1, "b = {b}");
    }
}
