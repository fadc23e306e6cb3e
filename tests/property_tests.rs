//! Property-based tests for plotwise
//!
//! - Test layout invariants for every design family
//! - Test statistical invariants of the analyzer
//! - Run with ProptestConfig::with_cases(100)
//! - Must complete in <30 seconds for pre-commit hook

use plotwise::aggregate::{ChangePolicy, TrialAggregate};
use plotwise::design::{generate_plots, DesignParams, Factor, FactorStructure};
use plotwise::ledger::Observation;
use plotwise::model::{ExperimentalDesign, MeasurementType, NewTreatment, NewTrial, Plot, Trial, TrialType};
use plotwise::stats::{analyze, assign_letters, share_group, AnalysisConfig};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Design family plus factor level counts (a × b = treatment count).
fn arb_design() -> impl Strategy<Value = (ExperimentalDesign, usize, usize)> {
    (
        prop::sample::select(ExperimentalDesign::ALL.to_vec()),
        1usize..=4,
        1usize..=4,
    )
}

fn aggregate(design: ExperimentalDesign, treatments: usize, reps: u32) -> TrialAggregate {
    let t = u32::try_from(treatments).unwrap();
    let new = NewTrial::builder("Property trial", TrialType::OnFarmResearch, design, t, reps)
        .year(2024)
        .crop_type("corn")
        .build();
    let mut agg = TrialAggregate::new(Trial::create(new).unwrap());
    for n in 1..=t {
        agg.add_treatment(NewTreatment::builder(n, format!("T{n}")).build(), ChangePolicy::Strict)
            .unwrap();
    }
    agg
}

fn factor_params(a: usize, b: usize) -> DesignParams {
    DesignParams::with_factors(FactorStructure::new(
        Factor::new("A", (1..=a).map(|i| format!("a{i}"))),
        Factor::new("B", (1..=b).map(|i| format!("b{i}"))),
    ))
}

fn layout(design: ExperimentalDesign, a: usize, b: usize, reps: u32, seed: u64) -> (TrialAggregate, Vec<Plot>) {
    let agg = aggregate(design, a * b, reps);
    let params = if design == ExperimentalDesign::CompletelyRandomized
        || design == ExperimentalDesign::RandomizedCompleteBlock
    {
        DesignParams::default()
    } else {
        factor_params(a, b)
    };
    let plots = generate_plots(agg.trial(), agg.treatments(), &params, &mut StdRng::seed_from_u64(seed)).unwrap();
    (agg, plots)
}

/// Observations where treatment `i` has mean `means[i]` and deviations
/// `±spread` alternating over its plots.
fn observations(agg: &TrialAggregate, means: &[f64], spread: f64) -> Vec<Observation> {
    let mut out = Vec::new();
    for (i, treatment) in agg.treatments().iter().enumerate() {
        for (j, plot) in agg.plots_for_treatment(treatment.treatment_id()).iter().enumerate() {
            let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
            out.push(Observation {
                plot_id: plot.plot_id(),
                treatment_id: treatment.treatment_id(),
                value: means[i] + sign * spread,
                unit: "bu/ac".to_string(),
            });
        }
    }
    out
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Layout Properties
    // ========================================================================

    /// Property: every (treatment, replication) pair appears exactly once
    #[test]
    fn prop_layout_is_treatment_by_replication(
        (design, a, b) in arb_design(),
        reps in 1u32..=5,
        seed in any::<u64>()
    ) {
        let (agg, plots) = layout(design, a, b, reps, seed);
        prop_assert_eq!(plots.len(), a * b * reps as usize);

        let pairs: BTreeSet<_> = plots.iter().map(|p| (p.treatment_id(), p.replication())).collect();
        prop_assert_eq!(pairs.len(), plots.len());
        for treatment in agg.treatments() {
            let count = plots.iter().filter(|p| p.treatment_id() == treatment.treatment_id()).count();
            prop_assert_eq!(count, reps as usize);
        }
    }

    /// Property: plot numbers are unique within a trial
    #[test]
    fn prop_plot_numbers_unique(
        (design, a, b) in arb_design(),
        reps in 1u32..=5,
        seed in any::<u64>()
    ) {
        let (_, plots) = layout(design, a, b, reps, seed);
        let numbers: BTreeSet<u32> = plots.iter().map(Plot::plot_number).collect();
        prop_assert_eq!(numbers.len(), plots.len());
    }

    /// Property: blocked designs hold one plot per treatment per block
    #[test]
    fn prop_blocked_one_per_treatment_per_block(
        (design, a, b) in arb_design(),
        reps in 1u32..=5,
        seed in any::<u64>()
    ) {
        prop_assume!(design.is_blocked());
        let (agg, plots) = layout(design, a, b, reps, seed);
        let mut per_block: BTreeMap<u32, BTreeSet<_>> = BTreeMap::new();
        for plot in &plots {
            let block = plot.block().unwrap();
            prop_assert!(per_block.entry(block).or_default().insert(plot.treatment_id()));
        }
        prop_assert_eq!(per_block.len(), reps as usize);
        for treatments in per_block.values() {
            prop_assert_eq!(treatments.len(), agg.treatments().len());
        }
    }

    /// Property: output order is independent of the seed
    #[test]
    fn prop_presentation_order_is_stable(
        treatments in 1usize..=6,
        reps in 1u32..=4,
        seed_a in any::<u64>(),
        seed_b in any::<u64>()
    ) {
        let agg = aggregate(ExperimentalDesign::RandomizedCompleteBlock, treatments, reps);
        let params = DesignParams::default();
        let x = generate_plots(agg.trial(), agg.treatments(), &params, &mut StdRng::seed_from_u64(seed_a)).unwrap();
        let y = generate_plots(agg.trial(), agg.treatments(), &params, &mut StdRng::seed_from_u64(seed_b)).unwrap();
        let key = |p: &Plot| (p.block(), p.treatment_id());
        prop_assert_eq!(x.iter().map(key).collect::<Vec<_>>(), y.iter().map(key).collect::<Vec<_>>());
    }

    // ========================================================================
    // Analysis Properties
    // ========================================================================

    /// Property: LSD strictly increases with within-treatment spread
    #[test]
    fn prop_lsd_increases_with_variance(
        means in prop::collection::vec(50.0f64..250.0, 2..6),
        spread in 0.5f64..20.0,
        factor in 1.1f64..4.0
    ) {
        let mut agg = aggregate(ExperimentalDesign::RandomizedCompleteBlock, means.len(), 4);
        agg.regenerate(&DesignParams::default(), 1).unwrap();
        let config = AnalysisConfig::default();

        let narrow = analyze(&agg, &MeasurementType::Yield, &observations(&agg, &means, spread), &config).unwrap();
        let wide = analyze(&agg, &MeasurementType::Yield, &observations(&agg, &means, spread * factor), &config).unwrap();
        prop_assert!(wide.lsd.lsd_05 > narrow.lsd.lsd_05);
        prop_assert!(wide.lsd.lsd_01 > narrow.lsd.lsd_01);
        prop_assert!((narrow.summaries[0].mean - means[0]).abs() < 1e-9);
    }

    /// Property: pooled variance never negative, LSD at 1% above LSD at 5%
    #[test]
    fn prop_error_term_sane(
        means in prop::collection::vec(0.0f64..100.0, 2..6),
        spread in 0.1f64..10.0
    ) {
        let mut agg = aggregate(ExperimentalDesign::RandomizedCompleteBlock, means.len(), 3);
        agg.regenerate(&DesignParams::default(), 1).unwrap();
        let result = analyze(&agg, &MeasurementType::Yield, &observations(&agg, &means, spread), &AnalysisConfig::default()).unwrap();
        prop_assert!(result.error_term.mse >= 0.0);
        prop_assert_eq!(result.error_term.df_error, means.len() * 2);
        prop_assert!(result.lsd.lsd_01 > result.lsd.lsd_05);
        prop_assert_eq!(result.comparisons.len(), means.len() * (means.len() - 1) / 2);
    }

    /// Property: two means share a letter iff they differ by at most the LSD
    #[test]
    fn prop_letters_match_lsd(
        mut means in prop::collection::vec(0.0f64..100.0, 1..70),
        lsd in 0.0f64..30.0
    ) {
        means.sort_by(|a, b| b.total_cmp(a));
        let letters = assign_letters(&means, lsd);
        for i in 0..means.len() {
            prop_assert!(!letters[i].is_empty());
            for j in 0..means.len() {
                let share = share_group(&letters[i], &letters[j]);
                prop_assert_eq!(share, (means[i] - means[j]).abs() <= lsd);
            }
        }
    }
}
