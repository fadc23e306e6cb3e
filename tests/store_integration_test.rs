//! Trial store integration tests
//!
//! Structural consistency under incremental edits, destructive
//! regeneration, snapshots and concurrent writers.

use chrono::NaiveDate;
use plotwise::aggregate::{ChangePolicy, GenerationRequest};
use plotwise::design::{DesignParams, Factor, FactorStructure};
use plotwise::export::{ExportOptions, TrialExport};
use plotwise::ledger::MeasurementFilter;
use plotwise::model::{
    ExperimentalDesign, MeasurementType, NewMeasurement, NewPlot, NewTreatment, NewTrial, TreatmentUpdate,
    TrialId, TrialType, TrialUpdate,
};
use plotwise::stats::AnalysisWarning;
use plotwise::store::DeletePolicy;
use plotwise::{EngineConfig, Error, TrialStore};
use std::sync::Arc;
use std::thread;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
}

fn setup(store: &TrialStore, design: ExperimentalDesign, treatments: u32, reps: u32) -> TrialId {
    let id = store
        .create_trial(
            NewTrial::builder("Store trial", TrialType::TreatmentComparison, design, treatments, reps)
                .year(2024)
                .crop_type("corn")
                .field_id("north-40")
                .plot_size("10 ft x 40 ft")
                .plot_area_acres(0.009)
                .build(),
        )
        .unwrap()
        .trial_id();
    for n in 1..=treatments {
        store
            .add_treatment(id, NewTreatment::builder(n, format!("T{n}")).build(), ChangePolicy::Strict)
            .unwrap();
    }
    id
}

fn record_all(store: &TrialStore, id: TrialId, kind: &MeasurementType) -> usize {
    let plots = store.list_plots(id).unwrap();
    for plot in &plots {
        let value = f64::from(plot.plot_number()) + f64::from(plot.replication());
        store
            .record_measurement(NewMeasurement::builder(plot.plot_id(), kind.clone(), value, "bu/ac", date(20)).build())
            .unwrap();
    }
    plots.len()
}

// =============================================================================
// Regeneration
// =============================================================================

#[test]
fn test_regenerate_without_measurements_succeeds() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 3, 2);
    store.generate_plots(id, GenerationRequest::default().seed(1)).unwrap();
    let report = store.generate_plots(id, GenerationRequest::default().seed(2)).unwrap();
    assert_eq!(report.plots_created, 6);
    assert_eq!(report.plots_replaced, 6);
    assert_eq!(report.measurements_removed, 0);
}

#[test]
fn test_regenerate_with_measurements_conflicts_unless_forced() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 3, 2);
    store.generate_plots(id, GenerationRequest::default().seed(1)).unwrap();
    let recorded = record_all(&store, id, &MeasurementType::Yield);
    let before = store.list_plots(id).unwrap();

    let err = store
        .generate_plots(id, GenerationRequest::default().seed(2))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(store.list_plots(id).unwrap(), before);

    let report = store
        .generate_plots(id, GenerationRequest::default().seed(2).force())
        .unwrap();
    assert_eq!(report.measurements_removed, recorded);
    assert!(store
        .list_measurements(id, &MeasurementFilter::default())
        .unwrap()
        .is_empty());
    // Old plots are gone
    let err = store
        .record_measurement(
            NewMeasurement::builder(before[0].plot_id(), MeasurementType::Yield, 1.0, "bu/ac", date(21)).build(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "plot", .. }));
}

#[test]
fn test_same_seed_reproduces_layout() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::CompletelyRandomized, 4, 3);
    let first = store.generate_plots(id, GenerationRequest::default().seed(77)).unwrap();
    let layout = |plots: Vec<plotwise::model::Plot>| -> Vec<(u32, plotwise::model::TreatmentId)> {
        plots.iter().map(|p| (p.plot_number(), p.treatment_id())).collect()
    };
    let a = layout(store.list_plots(id).unwrap());
    store.generate_plots(id, GenerationRequest::default().seed(first.seed)).unwrap();
    let b = layout(store.list_plots(id).unwrap());
    assert_eq!(a, b);
    assert_eq!(store.aggregate(id).unwrap().randomization().unwrap().seed, 77);
}

#[test]
fn test_oversized_plot_number_base_is_rejected_and_trial_stays_usable() {
    let config = EngineConfig::builder().plot_number_base(3_000_000_000).build().unwrap();
    let store = TrialStore::with_config(config);
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);

    let err = store.generate_plots(id, GenerationRequest::default().seed(1)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(store.list_plots(id).unwrap().is_empty());

    let request = GenerationRequest::with_params(DesignParams::default().plot_number_base(u32::MAX)).seed(1);
    assert!(matches!(store.generate_plots(id, request).unwrap_err(), Error::Configuration(_)));

    let request = GenerationRequest::with_params(DesignParams::default().plot_number_base(100)).seed(1);
    assert_eq!(store.generate_plots(id, request).unwrap().plots_created, 4);
}

#[test]
fn test_large_plot_number_base_keeps_numbers_unique() {
    let config = EngineConfig::builder().plot_number_base(1_000_000_000).build().unwrap();
    let store = TrialStore::with_config(config);
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 4, 4);
    store.generate_plots(id, GenerationRequest::default().seed(3)).unwrap();

    let mut numbers: Vec<u32> = store.list_plots(id).unwrap().iter().map(|p| p.plot_number()).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), 16);
    assert_eq!(numbers.first(), Some(&1_000_000_001));
    assert_eq!(numbers.last(), Some(&4_000_000_004));
}

#[test]
fn test_generate_without_treatments_fails() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 1, 2);
    let only = store.list_treatments(id).unwrap()[0].treatment_id();
    store.remove_treatment(id, only, ChangePolicy::Strict).unwrap();
    let err = store.generate_plots(id, GenerationRequest::default()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_split_plot_requires_factor_structure() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::SplitPlot, 6, 2);
    let err = store.generate_plots(id, GenerationRequest::default()).unwrap_err();
    assert!(format!("{err}").contains("two treatment factors"));

    let factors = FactorStructure::new(
        Factor::new("Tillage", ["Conventional", "No-till"]),
        Factor::new("Nitrogen", ["0", "90", "180"]),
    );
    let report = store
        .generate_plots(id, GenerationRequest::with_params(DesignParams::with_factors(factors)).seed(3))
        .unwrap();
    assert_eq!(report.plots_created, 12);
    assert!(store
        .list_plots(id)
        .unwrap()
        .iter()
        .all(|p| p.main_plot().is_some() && p.sub_plot().is_some()));
}

// =============================================================================
// Treatment and trial edits
// =============================================================================

#[test]
fn test_treatment_changes_after_plots_need_acknowledgement() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store
        .update_trial(id, TrialUpdate {
            num_treatments: Some(3),
            ..TrialUpdate::default()
        })
        .unwrap();
    store.generate_plots(id, GenerationRequest::default().seed(9)).unwrap();

    let err = store
        .add_treatment(id, NewTreatment::builder(3, "Late entry").build(), ChangePolicy::Strict)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    store
        .add_treatment(
            id,
            NewTreatment::builder(3, "Late entry").build(),
            ChangePolicy::AcknowledgeStaleLayout,
        )
        .unwrap();
    assert!(store.aggregate(id).unwrap().layout_stale());

    record_all(&store, id, &MeasurementType::Yield);
    let result = store.analyze(id, &MeasurementType::Yield).unwrap();
    assert!(result.warnings.contains(&AnalysisWarning::StaleLayout));
}

#[test]
fn test_update_treatment_requires_policy_once_plotted() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    let first = store.list_treatments(id).unwrap()[0].treatment_id();
    let rename = || TreatmentUpdate {
        name: Some("Renamed".to_string()),
        ..TreatmentUpdate::default()
    };
    store.update_treatment(id, first, rename(), ChangePolicy::Strict).unwrap();
    store.generate_plots(id, GenerationRequest::default().seed(4)).unwrap();

    let err = store
        .update_treatment(id, first, rename(), ChangePolicy::Strict)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    let updated = store
        .update_treatment(id, first, rename(), ChangePolicy::AcknowledgeStaleLayout)
        .unwrap();
    assert_eq!(updated.name(), "Renamed");
}

#[test]
fn test_acknowledged_rate_change_warns_stale_layout() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(4)).unwrap();
    let first = store.list_treatments(id).unwrap()[0].treatment_id();
    store
        .update_treatment(
            id,
            first,
            TreatmentUpdate {
                rate: Some(99.0),
                ..TreatmentUpdate::default()
            },
            ChangePolicy::AcknowledgeStaleLayout,
        )
        .unwrap();
    assert!(store.aggregate(id).unwrap().layout_stale());

    record_all(&store, id, &MeasurementType::Yield);
    let result = store.analyze(id, &MeasurementType::Yield).unwrap();
    assert!(result.warnings.contains(&AnalysisWarning::StaleLayout));

    let snapshot = store.export(id, ExportOptions::without_analysis()).unwrap();
    assert!(snapshot.stale_layout);
}

#[test]
fn test_remove_plotted_treatment_always_conflicts() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(4)).unwrap();
    let first = store.list_treatments(id).unwrap()[0].treatment_id();
    let err = store
        .remove_treatment(id, first, ChangePolicy::AcknowledgeStaleLayout)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_duplicate_and_excess_treatments() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    let err = store
        .add_treatment(id, NewTreatment::builder(2, "Again").build(), ChangePolicy::Strict)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    let err = store
        .add_treatment(id, NewTreatment::builder(3, "Extra").build(), ChangePolicy::Strict)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn test_replication_change_blocked_by_plots() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(4)).unwrap();
    let err = store
        .update_trial(id, TrialUpdate {
            num_replications: Some(3),
            ..TrialUpdate::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

// =============================================================================
// Plot deletion
// =============================================================================

#[test]
fn test_delete_plot_policies() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 3);
    store.generate_plots(id, GenerationRequest::default().seed(8)).unwrap();
    let plots = store.list_plots(id).unwrap();
    let measured = plots[0].plot_id();
    let empty = plots[1].plot_id();
    store
        .record_measurement(NewMeasurement::builder(measured, MeasurementType::Yield, 180.0, "bu/ac", date(1)).build())
        .unwrap();

    let err = store.delete_plot(measured, DeletePolicy::Reject).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let deletion = store.delete_plot(empty, DeletePolicy::Reject).unwrap();
    assert_eq!(deletion.measurements_removed, 0);

    let deletion = store.delete_plot(measured, DeletePolicy::Cascade).unwrap();
    assert_eq!(deletion.measurements_removed, 1);
    assert_eq!(store.list_plots(id).unwrap().len(), 4);
}

#[test]
fn test_deleted_plot_can_be_entered_again() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(8)).unwrap();
    let removed = store.list_plots(id).unwrap()[0].clone();
    store.delete_plot(removed.plot_id(), DeletePolicy::Reject).unwrap();

    let new = NewPlot::new(removed.treatment_id(), removed.plot_number(), removed.replication());
    let plot = store.add_plot(id, new.clone()).unwrap();
    assert_eq!(plot.block(), Some(removed.replication()));
    assert_eq!(store.list_plots(id).unwrap().len(), 4);

    store
        .record_measurement(NewMeasurement::builder(plot.plot_id(), MeasurementType::Yield, 190.0, "bu/ac", date(2)).build())
        .unwrap();
    assert!(matches!(store.add_plot(id, new).unwrap_err(), Error::Conflict(_)));
}

#[test]
fn test_farmer_laid_plots_without_generation() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::CompletelyRandomized, 2, 2);
    let treatments = store.list_treatments(id).unwrap();
    let mut number = 0;
    for rep in 1..=2 {
        for treatment in &treatments {
            number += 1;
            store
                .add_plot(id, NewPlot::new(treatment.treatment_id(), number, rep))
                .unwrap();
        }
    }
    let plots = store.list_plots(id).unwrap();
    assert_eq!(plots.len(), 4);
    assert!(plots.iter().all(|p| p.block().is_none()));

    let other = setup(&store, ExperimentalDesign::CompletelyRandomized, 2, 2);
    let foreign = store.list_treatments(other).unwrap()[0].treatment_id();
    let err = store.add_plot(id, NewPlot::new(foreign, 9, 1)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = store
        .add_plot(id, NewPlot::new(treatments[0].treatment_id(), 10, 3))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn test_delete_trial_cascades() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(8)).unwrap();
    record_all(&store, id, &MeasurementType::Yield);

    let deletion = store.delete_trial(id).unwrap();
    assert_eq!(deletion.treatments_removed, 2);
    assert_eq!(deletion.plots_removed, 4);
    assert_eq!(deletion.measurements_removed, 4);
    assert!(matches!(store.get_trial(id).unwrap_err(), Error::NotFound { .. }));
}

// =============================================================================
// Measurements
// =============================================================================

#[test]
fn test_measurement_validation() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(8)).unwrap();
    let plot = store.list_plots(id).unwrap()[0].plot_id();

    let err = store
        .record_measurement(NewMeasurement::builder(plot, MeasurementType::Yield, f64::NAN, "bu/ac", date(1)).build())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = store
        .record_measurement(NewMeasurement::builder(plot, MeasurementType::Yield, 1.0, "  ", date(1)).build())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = store
        .record_measurement(
            NewMeasurement::builder(plotwise::model::PlotId::new(), MeasurementType::Yield, 1.0, "bu/ac", date(1))
                .build(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "plot", .. }));
}

#[test]
fn test_list_measurements_filters_and_orders() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(8)).unwrap();
    let plot = store.list_plots(id).unwrap()[0].plot_id();
    for (day, kind) in [(15, MeasurementType::Height), (3, MeasurementType::Height), (9, MeasurementType::PlantPopulation)] {
        store
            .record_measurement(NewMeasurement::builder(plot, kind, 1.0, "in", date(day)).build())
            .unwrap();
    }

    let heights = store
        .list_measurements(id, &MeasurementFilter::of_type(MeasurementType::Height))
        .unwrap();
    assert_eq!(heights.len(), 2);
    assert!(heights[0].measurement_date() < heights[1].measurement_date());

    let on_plot = store
        .list_measurements(id, &MeasurementFilter::on_plot(plot))
        .unwrap();
    assert_eq!(on_plot.len(), 3);
    assert_eq!(
        store.measurement_types(id).unwrap(),
        vec![MeasurementType::PlantPopulation, MeasurementType::Height]
    );
}

// =============================================================================
// Export / import
// =============================================================================

#[test]
fn test_export_round_trip_restores_assignment() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 3, 3);
    store.generate_plots(id, GenerationRequest::default().seed(12)).unwrap();
    record_all(&store, id, &MeasurementType::Yield);

    let export = store.export(id, ExportOptions::default()).unwrap();
    assert!(export.analysis(&MeasurementType::Yield).unwrap().result().is_some());

    let json = export.to_json().unwrap();
    let parsed = TrialExport::from_json(&json).unwrap();

    let fresh = TrialStore::new();
    let restored = fresh.import(parsed).unwrap();
    assert_eq!(restored, id);

    let original: Vec<_> = store
        .list_plots(id)
        .unwrap()
        .iter()
        .map(|p| (p.plot_id(), p.treatment_id(), p.plot_number()))
        .collect();
    let copy: Vec<_> = fresh
        .list_plots(id)
        .unwrap()
        .iter()
        .map(|p| (p.plot_id(), p.treatment_id(), p.plot_number()))
        .collect();
    assert_eq!(original, copy);
    assert_eq!(
        fresh.list_measurements(id, &MeasurementFilter::default()).unwrap().len(),
        9
    );
    let a = store.analyze(id, &MeasurementType::Yield).unwrap();
    let b = fresh.analyze(id, &MeasurementType::Yield).unwrap();
    assert_eq!(a.summaries, b.summaries);
}

#[test]
fn test_export_reports_unavailable_analysis() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    store.generate_plots(id, GenerationRequest::default().seed(12)).unwrap();
    record_all(&store, id, &MeasurementType::Yield);
    let plot = store.list_plots(id).unwrap()[0].plot_id();
    store
        .record_measurement(NewMeasurement::builder(plot, MeasurementType::Lodging, 5.0, "%", date(2)).build())
        .unwrap();

    let export = store.export(id, ExportOptions::default()).unwrap();
    assert_eq!(export.analyses.len(), 2);
    assert!(export.analysis(&MeasurementType::Lodging).unwrap().result().is_none());
    assert!(export.analysis(&MeasurementType::Yield).unwrap().result().is_some());

    let bare = store.export(id, ExportOptions::without_analysis()).unwrap();
    assert!(bare.analyses.is_empty());
    assert_eq!(bare.measurements.len(), 5);
}

#[test]
fn test_import_into_same_store_conflicts() {
    let store = TrialStore::new();
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 2, 2);
    let export = store.export(id, ExportOptions::without_analysis()).unwrap();
    let err = store.import(export).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_export_unknown_trial() {
    let store = TrialStore::new();
    let err = store.export(TrialId::new(), ExportOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "trial", .. }));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_recording_across_trials() {
    let store = Arc::new(TrialStore::new());
    let ids: Vec<TrialId> = (0..4)
        .map(|_| {
            let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 3, 4);
            store.generate_plots(id, GenerationRequest::default().seed(1)).unwrap();
            id
        })
        .collect();

    let workers: Vec<_> = ids
        .iter()
        .map(|&id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for plot in store.list_plots(id).unwrap() {
                    for day in 1..=5 {
                        store
                            .record_measurement(
                                NewMeasurement::builder(plot.plot_id(), MeasurementType::Yield, f64::from(day), "bu/ac", date(day))
                                    .build(),
                            )
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for id in ids {
        let all = store.list_measurements(id, &MeasurementFilter::default()).unwrap();
        assert_eq!(all.len(), 12 * 5);
    }
}

#[test]
fn test_forced_regeneration_races_recording_without_orphans() {
    let store = Arc::new(TrialStore::new());
    let id = setup(&store, ExperimentalDesign::RandomizedCompleteBlock, 3, 3);
    store.generate_plots(id, GenerationRequest::default().seed(1)).unwrap();
    let plots = store.list_plots(id).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for plot in plots.iter().cycle().take(200) {
                // NotFound once the plot was replaced
                let _ = store.record_measurement(
                    NewMeasurement::builder(plot.plot_id(), MeasurementType::Yield, 1.0, "bu/ac", date(1)).build(),
                );
            }
        })
    };
    let regenerator = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for seed in 2..20 {
                store
                    .generate_plots(id, GenerationRequest::default().seed(seed).force())
                    .unwrap();
            }
        })
    };
    writer.join().unwrap();
    regenerator.join().unwrap();

    let agg = store.aggregate(id).unwrap();
    for m in store.list_measurements(id, &MeasurementFilter::default()).unwrap() {
        assert!(agg.plot(m.plot_id()).is_some(), "orphaned measurement {}", m.measurement_id());
    }
}
