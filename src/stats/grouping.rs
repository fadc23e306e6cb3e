//! LSD letter grouping
//!
//! Means are sorted descending and covered by maximal runs whose spread is
//! within the LSD; each run that is not contained in the previous one gets
//! the next letter. Two treatments share a letter exactly when their means
//! differ by no more than the LSD.

/// Letter label for the `index`-th group: `a`..`z`, then `A`..`Z`, then
/// `a1`, `b1`, ...
#[must_use]
pub fn group_label(index: usize) -> String {
    const LOWER: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
    const UPPER: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    match index {
        0..=25 => char::from(LOWER[index]).to_string(),
        26..=51 => char::from(UPPER[index - 26]).to_string(),
        _ => format!("{}{}", char::from(LOWER[index % 26]), index / 26 - 1),
    }
}

/// Split a concatenated letter string (`"ab"`, `"z1a2"`) into its group
/// labels.
#[must_use]
pub fn split_labels(letters: &str) -> Vec<&str> {
    let mut labels = Vec::new();
    let mut start = 0;
    for (i, c) in letters.char_indices().skip(1) {
        if !c.is_ascii_digit() {
            labels.push(&letters[start..i]);
            start = i;
        }
    }
    if !letters.is_empty() {
        labels.push(&letters[start..]);
    }
    labels
}

/// Whether two letter strings share a group label.
#[must_use]
pub fn share_group(a: &str, b: &str) -> bool {
    let theirs = split_labels(b);
    split_labels(a).iter().any(|label| theirs.contains(label))
}

/// Assign letters to means already sorted in descending order.
///
/// Returns one letter string per mean, in the same order.
#[must_use]
pub fn assign_letters(sorted_desc: &[f64], lsd: f64) -> Vec<String> {
    let k = sorted_desc.len();
    let mut letters = vec![String::new(); k];
    let mut last_end: Option<usize> = None;
    let mut next_group = 0;

    for start in 0..k {
        let mut end = start;
        while end + 1 < k && sorted_desc[start] - sorted_desc[end + 1] <= lsd {
            end += 1;
        }
        if last_end.map_or(true, |previous| end > previous) {
            let label = group_label(next_group);
            for slot in &mut letters[start..=end] {
                slot.push_str(&label);
            }
            next_group += 1;
            last_end = Some(end);
        }
    }
    letters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_labels() {
        assert_eq!(group_label(0), "a");
        assert_eq!(group_label(25), "z");
        assert_eq!(group_label(26), "A");
        assert_eq!(group_label(52), "a1");
    }

    #[test]
    fn test_all_equal_means_share_one_letter_with_zero_lsd() {
        let letters = assign_letters(&[10.0, 10.0, 10.0], 0.0);
        assert_eq!(letters, vec!["a", "a", "a"]);
    }

    #[test]
    fn test_all_distinct() {
        let letters = assign_letters(&[30.0, 20.0, 10.0], 5.0);
        assert_eq!(letters, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_overlapping_groups() {
        // 30 ~ 26, 26 ~ 22, but 30 !~ 22
        let letters = assign_letters(&[30.0, 26.0, 22.0, 10.0], 5.0);
        assert_eq!(letters, vec!["a", "ab", "b", "c"]);
    }

    #[test]
    fn test_nested_run_gets_no_new_letter() {
        let letters = assign_letters(&[30.0, 29.0, 28.0], 5.0);
        assert_eq!(letters, vec!["a", "a", "a"]);
    }

    #[test]
    fn test_sharing_letter_iff_within_lsd() {
        let means = [50.0, 47.5, 44.0, 41.0, 40.5, 33.0];
        let lsd = 4.0;
        let letters = assign_letters(&means, lsd);
        for i in 0..means.len() {
            for j in 0..means.len() {
                let share = share_group(&letters[i], &letters[j]);
                assert_eq!(share, (means[i] - means[j]).abs() <= lsd, "i={i} j={j}");
            }
        }
    }

    #[test]
    fn test_split_labels() {
        assert_eq!(split_labels("ab"), vec!["a", "b"]);
        assert_eq!(split_labels("Za1b1"), vec!["Z", "a1", "b1"]);
        assert_eq!(split_labels("a12"), vec!["a12"]);
        assert!(split_labels("").is_empty());
        assert!(!share_group("a1", "b1"));
        assert!(!share_group("a1", "a"));
        assert!(share_group("Za1", "a1b1"));
    }

    #[test]
    fn test_more_than_52_groups_keep_lsd_sharing() {
        // Neighbours 1 apart share a group, anything further apart does not
        let means: Vec<f64> = (0..60).rev().map(f64::from).collect();
        let lsd = 1.0;
        let letters = assign_letters(&means, lsd);
        assert!(letters.iter().any(|l| l.contains('1')));
        for i in 0..means.len() {
            for j in 0..means.len() {
                let share = share_group(&letters[i], &letters[j]);
                assert_eq!(share, (means[i] - means[j]).abs() <= lsd, "i={i} j={j}");
            }
        }
    }

    #[test]
    fn test_empty() {
        assert!(assign_letters(&[], 1.0).is_empty());
    }
}
