//! Field Trial Walkthrough
//!
//! Designs a corn hybrid trial, records harvest yields, analyzes them and
//! exports a snapshot.
//!
//! Run with: RUST_LOG=plotwise=debug cargo run --example field_trial_walkthrough

use anyhow::Result;
use chrono::NaiveDate;
use plotwise::aggregate::{ChangePolicy, GenerationRequest};
use plotwise::export::ExportOptions;
use plotwise::model::{
    ExperimentalDesign, MeasurementType, NewMeasurement, NewTreatment, NewTrial, TrialType,
};
use plotwise::{EngineConfig, TrialStore};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plotwise=info")))
        .with_target(false)
        .init();

    println!("=== Plotwise Field Trial Walkthrough ===\n");

    let store = TrialStore::with_config(EngineConfig::builder().default_seed(2024).build()?);

    // -------------------------------------------------------------------------
    // 1. Design the trial
    // -------------------------------------------------------------------------
    println!("1. Creating trial...");

    let trial = store.create_trial(
        NewTrial::builder(
            "2024 Corn Hybrid Comparison",
            TrialType::VarietyTrial,
            ExperimentalDesign::RandomizedCompleteBlock,
            5,
            4,
        )
        .year(2024)
        .crop_type("corn")
        .objective("Compare five hybrids under local management")
        .field_id("home-farm-north")
        .plot_size("4 rows x 300 ft")
        .build(),
    )?;
    let id = trial.trial_id();
    println!("   Trial ID: {id}");
    println!("   Design: {}", trial.design().label());

    let hybrids = [
        ("Check hybrid", true),
        ("Hybrid 6120", false),
        ("Hybrid 6244", false),
        ("Hybrid 6310", false),
        ("Hybrid 6475", false),
    ];
    for (number, (name, control)) in (1..).zip(hybrids) {
        let mut treatment = NewTreatment::builder(number, name).product(name);
        if control {
            treatment = treatment.control();
        }
        store.add_treatment(id, treatment.build(), ChangePolicy::Strict)?;
    }

    // -------------------------------------------------------------------------
    // 2. Generate the plot layout
    // -------------------------------------------------------------------------
    println!("\n2. Generating plots...");

    let report = store.generate_plots(id, GenerationRequest::default())?;
    println!("   {} plots, seed {}", report.plots_created, report.seed);

    let treatments = store.list_treatments(id)?;
    let plots = store.list_plots(id)?;
    for block in 1..=4 {
        let row: Vec<String> = plots
            .iter()
            .filter(|p| p.block() == Some(block))
            .map(|p| {
                let number = treatments
                    .iter()
                    .find(|t| t.treatment_id() == p.treatment_id())
                    .map_or(0, |t| t.treatment_number());
                format!("{}:T{number}", p.plot_number())
            })
            .collect();
        println!("   Block {block}: {}", row.join("  "));
    }

    // -------------------------------------------------------------------------
    // 3. Record harvest yields
    // -------------------------------------------------------------------------
    println!("\n3. Recording yields...");

    let harvest = NaiveDate::from_ymd_opt(2024, 10, 14).unwrap_or_default();
    let base = [186.0, 201.0, 195.0, 208.0, 190.0];
    let block_effect = [0.0, 4.5, -3.0, 1.5];
    let noise = [2.1, -1.4, 0.6, -2.2, 1.8, -0.9, 2.7, -1.1, 0.4, -2.6];
    for (i, plot) in plots.iter().enumerate() {
        let t = treatments
            .iter()
            .position(|t| t.treatment_id() == plot.treatment_id())
            .unwrap_or(0);
        let block = plot.block().map_or(0, |b| b as usize - 1);
        let value = base[t] + block_effect[block] + noise[i % noise.len()];
        store.record_measurement(
            NewMeasurement::builder(plot.plot_id(), MeasurementType::Yield, value, "bu/ac", harvest)
                .collector("harvest crew")
                .build(),
        )?;
    }
    println!("   {} yield readings recorded", plots.len());

    // -------------------------------------------------------------------------
    // 4. Analyze
    // -------------------------------------------------------------------------
    println!("\n4. Analyzing yield...");

    let analysis = store.analyze(id, &MeasurementType::Yield)?;
    println!(
        "   MSE {:.2} on {} df, CV {:.1}%",
        analysis.error_term.mse,
        analysis.error_term.df_error,
        analysis.error_term.cv_percent.unwrap_or(0.0)
    );
    println!("   LSD(0.05) {:.2}  LSD(0.01) {:.2}", analysis.lsd.lsd_05, analysis.lsd.lsd_01);
    for ranked in &analysis.ranking {
        println!(
            "   #{} {:<14} {:>7.1} {:<3} {}",
            ranked.rank,
            ranked.name,
            ranked.mean,
            ranked.letters,
            ranked
                .percent_vs_baseline
                .map(|p| format!("{p:+.1}% vs check"))
                .unwrap_or_default()
        );
    }
    println!("   {}", analysis.interpretation);

    // -------------------------------------------------------------------------
    // 5. Export
    // -------------------------------------------------------------------------
    println!("\n5. Exporting snapshot...");

    let export = store.export(id, ExportOptions::default())?;
    let json = export.to_json()?;
    println!("   {} bytes, {} analyses", json.len(), export.analyses.len());

    let restored = TrialStore::new();
    restored.import(plotwise::export::TrialExport::from_json(&json)?)?;
    println!("   Restored {} plots into a fresh store", restored.list_plots(id)?.len());

    println!("\n=== Walkthrough Complete ===");
    Ok(())
}
