//! One-way analysis of a single measurement type
//!
//! Observations are grouped by treatment, a pooled within-treatment error
//! term is computed, and every pair of treatments is compared with a
//! two-sample t-test on that pooled error. The same error term drives the
//! LSD thresholds and letter groups. Blocks and factors are not modelled
//! separately: every design uses the one-way error.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::distribution::{f_upper_tail, t_critical, t_two_sided_p};
use super::grouping::{assign_letters, split_labels};
use super::summary::{harmonic_mean, SampleStats};
use crate::aggregate::TrialAggregate;
use crate::ledger::Observation;
use crate::model::{MeasurementType, PlotId, Preference, Treatment, TreatmentId, TrialId};
use crate::{Error, Result};

/// Significance level for letter groups and the primary LSD.
pub const ALPHA_05: f64 = 0.05;
/// Secondary significance level.
pub const ALPHA_01: f64 = 0.01;

/// Analysis options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Average repeated readings on one plot into a single plot-level
    /// observation before grouping. Off by default: every record counts.
    pub collapse_subsamples: bool,
}

/// Per-treatment descriptive statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSummary {
    /// Treatment id.
    pub treatment_id: TreatmentId,
    /// Treatment number within the trial.
    pub treatment_number: u32,
    /// Treatment name.
    pub name: String,
    /// Whether the treatment is flagged as a control.
    pub is_control: bool,
    /// Whether the treatment is the comparison baseline.
    pub is_baseline: bool,
    /// Number of observations.
    pub n: usize,
    /// Mean.
    pub mean: f64,
    /// Sample variance (0 when n = 1).
    pub variance: f64,
    /// Standard deviation.
    pub std_dev: f64,
    /// Standard error of the mean.
    pub std_error: f64,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
    /// LSD letter group(s) at 5 %.
    pub letters: String,
}

/// Pooled error term and one-way ANOVA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTerm {
    /// Pooled within-treatment variance (mean square error).
    pub mse: f64,
    /// Error degrees of freedom, N − k.
    pub df_error: usize,
    /// Treatment degrees of freedom, k − 1.
    pub df_treatment: usize,
    /// Total observations N.
    pub total_n: usize,
    /// Mean of all observations.
    pub grand_mean: f64,
    /// Coefficient of variation in percent; absent for a zero grand mean.
    pub cv_percent: Option<f64>,
    /// Between-treatment sum of squares.
    pub ss_treatment: f64,
    /// Within-treatment sum of squares.
    pub ss_error: f64,
    /// F statistic; absent when the error variance is zero.
    pub f_statistic: Option<f64>,
    /// Upper-tail p-value of the F statistic.
    pub f_p_value: Option<f64>,
}

/// Two-sample t-test between two treatments on the pooled error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    /// First treatment (lower number).
    pub treatment_a: TreatmentId,
    /// Number of the first treatment.
    pub treatment_number_a: u32,
    /// Second treatment.
    pub treatment_b: TreatmentId,
    /// Number of the second treatment.
    pub treatment_number_b: u32,
    /// mean(a) − mean(b).
    pub mean_difference: f64,
    /// Standard error of the difference.
    pub std_error: f64,
    /// t statistic; absent when the standard error is zero.
    pub t_statistic: Option<f64>,
    /// Degrees of freedom (error df).
    pub df: usize,
    /// Two-sided p-value.
    pub p_value: f64,
    /// |difference| exceeds the 5 % critical difference.
    pub significant_05: bool,
    /// |difference| exceeds the 1 % critical difference.
    pub significant_01: bool,
}

/// Least significant difference thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsdThresholds {
    /// Harmonic mean of treatment sample sizes.
    pub harmonic_n: f64,
    /// Two-sided critical t at 5 %.
    pub t_critical_05: f64,
    /// Two-sided critical t at 1 %.
    pub t_critical_01: f64,
    /// LSD at 5 %.
    pub lsd_05: f64,
    /// LSD at 1 %.
    pub lsd_01: f64,
}

/// One entry of the preference-ordered ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTreatment {
    /// 1-based rank.
    pub rank: usize,
    /// Treatment id.
    pub treatment_id: TreatmentId,
    /// Treatment number.
    pub treatment_number: u32,
    /// Treatment name.
    pub name: String,
    /// Mean.
    pub mean: f64,
    /// Letter group(s).
    pub letters: String,
    /// (mean − baseline) / baseline × 100; absent when the baseline has no
    /// data or a zero mean.
    pub percent_vs_baseline: Option<f64>,
}

/// Best treatment by preference direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPerformer {
    /// Treatment id.
    pub treatment_id: TreatmentId,
    /// Treatment number.
    pub treatment_number: u32,
    /// Treatment name.
    pub name: String,
    /// Mean.
    pub mean: f64,
    /// Percent difference from the baseline.
    pub percent_vs_baseline: Option<f64>,
    /// Whether it differs from the baseline at 5 %; absent when it is the
    /// baseline or the baseline has no data.
    pub significant_vs_baseline: Option<bool>,
}

/// Non-fatal data quality findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// Observations were recorded in more than one unit; values were not
    /// converted.
    MixedUnits {
        /// Distinct units seen, sorted.
        units: Vec<String>,
    },
    /// Treatments excluded because they have no observations.
    TreatmentsWithoutData {
        /// Their treatment numbers.
        treatment_numbers: Vec<u32>,
    },
    /// Treatments changed after plot generation; regenerate to refresh.
    StaleLayout,
}

/// Full analysis of one measurement type in one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Trial analyzed.
    pub trial_id: TrialId,
    /// Measurement type analyzed.
    pub measurement_type: MeasurementType,
    /// Most frequent unit among the observations.
    pub unit: String,
    /// Which direction counts as better.
    pub preference: Preference,
    /// Observations used (after optional subsample collapsing).
    pub observations_used: usize,
    /// Baseline treatment, when it has data.
    pub baseline_treatment_id: Option<TreatmentId>,
    /// Per-treatment summaries ordered by treatment number.
    pub summaries: Vec<TreatmentSummary>,
    /// Pooled error and ANOVA.
    pub error_term: ErrorTerm,
    /// LSD thresholds.
    pub lsd: LsdThresholds,
    /// All pairwise comparisons, ordered by treatment number pairs.
    pub comparisons: Vec<PairwiseComparison>,
    /// Treatments ordered best first.
    pub ranking: Vec<RankedTreatment>,
    /// Best treatment.
    pub top_performer: TopPerformer,
    /// Data quality findings.
    pub warnings: Vec<AnalysisWarning>,
    /// Plain-language summary.
    pub interpretation: String,
    /// When the result was computed.
    pub computed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Summary of a treatment, if it had data.
    #[must_use]
    pub fn summary(&self, treatment_id: TreatmentId) -> Option<&TreatmentSummary> {
        self.summaries.iter().find(|s| s.treatment_id == treatment_id)
    }

    /// Comparison between two treatments, in either order.
    #[must_use]
    pub fn comparison(&self, a: TreatmentId, b: TreatmentId) -> Option<&PairwiseComparison> {
        self.comparisons.iter().find(|c| {
            (c.treatment_a == a && c.treatment_b == b) || (c.treatment_a == b && c.treatment_b == a)
        })
    }

    /// Number of distinct letter groups.
    #[must_use]
    pub fn letter_group_count(&self) -> usize {
        let mut seen: Vec<String> = Vec::new();
        for summary in &self.summaries {
            for label in split_labels(&summary.letters) {
                if !seen.iter().any(|known| known == label) {
                    seen.push(label.to_string());
                }
            }
        }
        seen.len()
    }
}

struct Group<'a> {
    treatment: &'a Treatment,
    stats: SampleStats,
}

/// Analyze `observations` of `measurement_type` against the structure of
/// `trial`.
///
/// Pure function of its inputs; nothing is cached.
///
/// # Errors
///
/// Returns [`Error::InsufficientData`] when fewer than two treatments have
/// observations, or when no treatment is replicated (zero error df).
#[allow(clippy::too_many_lines, clippy::cast_precision_loss)]
pub fn analyze(
    trial: &TrialAggregate,
    measurement_type: &MeasurementType,
    observations: &[Observation],
    config: &AnalysisConfig,
) -> Result<AnalysisResult> {
    let insufficient = |reason: String| Error::InsufficientData {
        trial_id: trial.trial_id().to_string(),
        measurement_type: measurement_type.code(),
        reason,
    };

    let mut unit_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for obs in observations {
        *unit_counts.entry(obs.unit.as_str()).or_default() += 1;
    }

    let values_by_treatment = group_values(observations, config);

    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut without_data: Vec<u32> = Vec::new();
    for treatment in trial.treatments() {
        let stats = values_by_treatment
            .get(&treatment.treatment_id())
            .and_then(|values| SampleStats::from_values(values));
        match stats {
            Some(stats) => groups.push(Group { treatment, stats }),
            None => without_data.push(treatment.treatment_number()),
        }
    }

    if groups.len() < 2 {
        return Err(insufficient(format!(
            "{} treatment(s) have observations; at least 2 are required",
            groups.len()
        )));
    }
    let k = groups.len();
    let total_n: usize = groups.iter().map(|g| g.stats.n).sum();
    let df_error = total_n - k;
    if df_error == 0 {
        return Err(insufficient(
            "every treatment has a single observation, so there are no error degrees of freedom"
                .to_string(),
        ));
    }

    // Error term
    let ss_error: f64 = groups.iter().map(|g| g.stats.sum_squares).sum();
    let mse = ss_error / df_error as f64;
    let grand_mean = groups.iter().map(|g| g.stats.mean * g.stats.n as f64).sum::<f64>() / total_n as f64;
    let ss_treatment: f64 = groups
        .iter()
        .map(|g| g.stats.n as f64 * (g.stats.mean - grand_mean).powi(2))
        .sum();
    let df_treatment = k - 1;
    let (f_statistic, f_p_value) = if mse > 0.0 {
        let f = (ss_treatment / df_treatment as f64) / mse;
        (Some(f), Some(f_upper_tail(f, df_treatment as f64, df_error as f64)))
    } else {
        (None, None)
    };
    let cv_percent = (grand_mean != 0.0).then(|| mse.sqrt() / grand_mean.abs() * 100.0);
    let error_term = ErrorTerm {
        mse,
        df_error,
        df_treatment,
        total_n,
        grand_mean,
        cv_percent,
        ss_treatment,
        ss_error,
        f_statistic,
        f_p_value,
    };

    // LSD
    let df = df_error as f64;
    let t05 = t_critical(ALPHA_05, df);
    let t01 = t_critical(ALPHA_01, df);
    let sizes: Vec<usize> = groups.iter().map(|g| g.stats.n).collect();
    let harmonic_n = harmonic_mean(&sizes);
    let lsd_se = (2.0 * mse / harmonic_n).sqrt();
    let lsd = LsdThresholds {
        harmonic_n,
        t_critical_05: t05,
        t_critical_01: t01,
        lsd_05: t05 * lsd_se,
        lsd_01: t01 * lsd_se,
    };

    // Pairwise comparisons
    let mut comparisons = Vec::with_capacity(k * (k - 1) / 2);
    for (i, a) in groups.iter().enumerate() {
        for b in &groups[i + 1..] {
            let diff = a.stats.mean - b.stats.mean;
            let se = (mse * (1.0 / a.stats.n as f64 + 1.0 / b.stats.n as f64)).sqrt();
            let (t_statistic, p_value) = if se > 0.0 {
                let t = diff / se;
                (Some(t), t_two_sided_p(t, df))
            } else if diff == 0.0 {
                (None, 1.0)
            } else {
                (None, 0.0)
            };
            comparisons.push(PairwiseComparison {
                treatment_a: a.treatment.treatment_id(),
                treatment_number_a: a.treatment.treatment_number(),
                treatment_b: b.treatment.treatment_id(),
                treatment_number_b: b.treatment.treatment_number(),
                mean_difference: diff,
                std_error: se,
                t_statistic,
                df: df_error,
                p_value,
                significant_05: diff.abs() > t05 * se,
                significant_01: diff.abs() > t01 * se,
            });
        }
    }

    // Letters on means sorted descending, ties by treatment number
    let mut desc: Vec<usize> = (0..k).collect();
    desc.sort_by(|&x, &y| {
        groups[y]
            .stats
            .mean
            .total_cmp(&groups[x].stats.mean)
            .then(groups[x].treatment.treatment_number().cmp(&groups[y].treatment.treatment_number()))
    });
    let sorted_means: Vec<f64> = desc.iter().map(|&i| groups[i].stats.mean).collect();
    let mut letters = vec![String::new(); k];
    for (slot, label) in desc.iter().zip(assign_letters(&sorted_means, lsd.lsd_05)) {
        letters[*slot] = label;
    }

    // Baseline
    let baseline = trial
        .baseline_treatment()
        .and_then(|b| groups.iter().position(|g| g.treatment.treatment_id() == b.treatment_id()));
    let baseline_mean = baseline.map(|i| groups[i].stats.mean);
    let percent_vs_baseline = |mean: f64| {
        baseline_mean
            .filter(|&b| b != 0.0)
            .map(|b| (mean - b) / b.abs() * 100.0)
    };

    let summaries: Vec<TreatmentSummary> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| TreatmentSummary {
            treatment_id: g.treatment.treatment_id(),
            treatment_number: g.treatment.treatment_number(),
            name: g.treatment.name().to_string(),
            is_control: g.treatment.is_control(),
            is_baseline: baseline == Some(i),
            n: g.stats.n,
            mean: g.stats.mean,
            variance: g.stats.variance,
            std_dev: g.stats.std_dev(),
            std_error: g.stats.std_error(),
            min: g.stats.min,
            max: g.stats.max,
            letters: letters[i].clone(),
        })
        .collect();

    // Ranking by preference
    let preference = measurement_type.preference();
    let ranked_order: Vec<usize> = match preference {
        Preference::HigherIsBetter => desc.clone(),
        Preference::LowerIsBetter => {
            let mut asc: Vec<usize> = (0..k).collect();
            asc.sort_by(|&x, &y| {
                groups[x]
                    .stats
                    .mean
                    .total_cmp(&groups[y].stats.mean)
                    .then(groups[x].treatment.treatment_number().cmp(&groups[y].treatment.treatment_number()))
            });
            asc
        }
    };
    let ranking: Vec<RankedTreatment> = ranked_order
        .iter()
        .enumerate()
        .map(|(rank, &i)| RankedTreatment {
            rank: rank + 1,
            treatment_id: groups[i].treatment.treatment_id(),
            treatment_number: groups[i].treatment.treatment_number(),
            name: groups[i].treatment.name().to_string(),
            mean: groups[i].stats.mean,
            letters: letters[i].clone(),
            percent_vs_baseline: percent_vs_baseline(groups[i].stats.mean),
        })
        .collect();

    let top = ranked_order[0];
    let significant_vs_baseline = baseline.filter(|&b| b != top).and_then(|b| {
        let (a_id, b_id) = (groups[top].treatment.treatment_id(), groups[b].treatment.treatment_id());
        comparisons
            .iter()
            .find(|c| {
                (c.treatment_a == a_id && c.treatment_b == b_id)
                    || (c.treatment_a == b_id && c.treatment_b == a_id)
            })
            .map(|c| c.significant_05)
    });
    let top_performer = TopPerformer {
        treatment_id: groups[top].treatment.treatment_id(),
        treatment_number: groups[top].treatment.treatment_number(),
        name: groups[top].treatment.name().to_string(),
        mean: groups[top].stats.mean,
        percent_vs_baseline: percent_vs_baseline(groups[top].stats.mean),
        significant_vs_baseline,
    };

    // Warnings
    let unit = unit_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(u, _)| (*u).to_string())
        .unwrap_or_default();
    let mut warnings = Vec::new();
    if unit_counts.len() > 1 {
        let units: Vec<String> = unit_counts.keys().map(|u| (*u).to_string()).collect();
        warn!(
            trial_id = %trial.trial_id(),
            measurement_type = %measurement_type,
            ?units,
            "mixed units in analysis; values were not converted"
        );
        warnings.push(AnalysisWarning::MixedUnits { units });
    }
    if !without_data.is_empty() {
        warnings.push(AnalysisWarning::TreatmentsWithoutData {
            treatment_numbers: without_data,
        });
    }
    if trial.layout_stale() {
        warnings.push(AnalysisWarning::StaleLayout);
    }

    let mut result = AnalysisResult {
        trial_id: trial.trial_id(),
        measurement_type: measurement_type.clone(),
        unit,
        preference,
        observations_used: total_n,
        baseline_treatment_id: baseline.map(|i| groups[i].treatment.treatment_id()),
        summaries,
        error_term,
        lsd,
        comparisons,
        ranking,
        top_performer,
        warnings,
        interpretation: String::new(),
        computed_at: Utc::now(),
    };
    result.interpretation = interpret(&result);

    debug!(
        trial_id = %result.trial_id,
        measurement_type = %result.measurement_type,
        treatments = k,
        observations = total_n,
        mse = result.error_term.mse,
        lsd_05 = result.lsd.lsd_05,
        "analysis complete"
    );
    Ok(result)
}

/// Values per treatment, optionally averaged per plot first.
fn group_values(observations: &[Observation], config: &AnalysisConfig) -> FxHashMap<TreatmentId, Vec<f64>> {
    let mut by_treatment: FxHashMap<TreatmentId, Vec<f64>> = FxHashMap::default();
    if config.collapse_subsamples {
        // Keep first-seen plot order so results do not depend on hashing
        let mut plots: Vec<(PlotId, TreatmentId, f64, usize)> = Vec::new();
        let mut index: FxHashMap<PlotId, usize> = FxHashMap::default();
        for obs in observations {
            if let Some(&i) = index.get(&obs.plot_id) {
                plots[i].2 += obs.value;
                plots[i].3 += 1;
            } else {
                index.insert(obs.plot_id, plots.len());
                plots.push((obs.plot_id, obs.treatment_id, obs.value, 1));
            }
        }
        for (_, treatment_id, sum, count) in plots {
            #[allow(clippy::cast_precision_loss)]
            by_treatment.entry(treatment_id).or_default().push(sum / count as f64);
        }
    } else {
        for obs in observations {
            by_treatment.entry(obs.treatment_id).or_default().push(obs.value);
        }
    }
    by_treatment
}

fn interpret(result: &AnalysisResult) -> String {
    let label = result.measurement_type.label().to_lowercase();
    let top = &result.top_performer;
    if result.letter_group_count() <= 1 {
        return format!(
            "No significant differences among {} treatments for {label} at the 5% level (LSD {:.2} {}).",
            result.summaries.len(),
            result.lsd.lsd_05,
            result.unit
        );
    }

    let mut text = format!(
        "{} ranked first for {label} with a mean of {:.2} {}",
        top.name, top.mean, result.unit
    );
    let baseline_name = result
        .baseline_treatment_id
        .and_then(|id| result.summary(id))
        .map(|s| s.name.as_str());
    match (baseline_name, top.percent_vs_baseline, top.significant_vs_baseline) {
        (Some(_), _, None) => text.push_str(" and is the comparison baseline"),
        (Some(name), Some(pct), Some(significant)) => {
            text.push_str(&format!(
                ", {pct:+.1}% versus {name}, a difference that is {}significant at the 5% level",
                if significant { "" } else { "not " }
            ));
        }
        (Some(name), None, Some(significant)) => {
            text.push_str(&format!(
                "; the difference from {name} is {}significant at the 5% level",
                if significant { "" } else { "not " }
            ));
        }
        _ => {}
    }
    text.push_str(&format!(
        ". Treatments fall into {} letter groups (LSD {:.2} {}).",
        result.letter_group_count(),
        result.lsd.lsd_05,
        result.unit
    ));
    text
}
