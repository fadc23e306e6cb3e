//! Statistical analyzer
//!
//! Per-treatment summaries, pooled error, pairwise t-tests, LSD thresholds
//! and letter groups for one measurement type at a time.
//!
//! ## Example
//!
//! ```rust
//! use plotwise::stats::{assign_letters, t_critical};
//!
//! // Two-sided 5% critical value with 6 error df
//! let t = t_critical(0.05, 6.0);
//! assert!((t - 2.447).abs() < 1e-3);
//!
//! let letters = assign_letters(&[30.0, 26.0, 22.0], 5.0);
//! assert_eq!(letters, vec!["a", "ab", "b"]);
//! ```

mod analyzer;
mod distribution;
mod grouping;
mod summary;

pub use analyzer::{
    analyze, AnalysisConfig, AnalysisResult, AnalysisWarning, ErrorTerm, LsdThresholds,
    PairwiseComparison, RankedTreatment, TopPerformer, TreatmentSummary, ALPHA_01, ALPHA_05,
};
pub use distribution::{f_upper_tail, ln_gamma, regularized_beta, t_critical, t_two_sided_p};
pub use grouping::{assign_letters, group_label, share_group, split_labels};
pub use summary::{harmonic_mean, SampleStats};
