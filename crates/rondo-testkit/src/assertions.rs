//! Assertion helpers for run and verification reports

use rondo_core::MachineKey;
use rondo_engine::{RunReport, VerificationReport};
use std::collections::BTreeMap;

/// Assert that a verification session found no invariant violations
#[macro_export]
macro_rules! assert_clean {
    ($report:expr) => {
        assert!(
            $report.is_clean(),
            "unexpected violations: {:?}",
            $report.violations().collect::<Vec<_>>()
        )
    };
}

/// Assert that a run ended for the given reason, rendered as text
#[macro_export]
macro_rules! assert_reason {
    ($run:expr, $expected:expr) => {
        assert_eq!(
            $run.reason.to_string(),
            $expected,
            "run {} ended with {}",
            $run.run,
            $run.reason
        )
    };
}

/// Assert that no run ever had more than one machine inside the critical section
pub fn assert_mutual_exclusion(report: &VerificationReport) {
    for run in &report.runs {
        assert!(
            run.max_holders <= 1,
            "run {} had {} simultaneous holders",
            run.run,
            run.max_holders
        );
    }
}

/// Admission order of a run as plain strings
pub fn admission_keys(run: &RunReport) -> Vec<String> {
    run.admissions.iter().map(ToString::to_string).collect()
}

/// Longest stretch of admissions any machine waited between two of its own
/// turns, counted in admissions of other machines. Machines that were admitted
/// only once do not contribute.
pub fn max_admission_gap(admissions: &[MachineKey]) -> usize {
    let mut last_seen: BTreeMap<&MachineKey, usize> = BTreeMap::new();
    let mut widest = 0;
    for (position, key) in admissions.iter().enumerate() {
        if let Some(previous) = last_seen.insert(key, position) {
            widest = widest.max(position - previous - 1);
        }
    }
    widest
}

/// Distinct machines admitted in a run
pub fn admitted_machines(run: &RunReport) -> Vec<MachineKey> {
    let mut keys = run.admissions.clone();
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&str]) -> Vec<MachineKey> {
        raw.iter().map(|key| MachineKey::from(*key)).collect()
    }

    #[test]
    fn gap_counts_foreign_admissions_between_turns() {
        assert_eq!(max_admission_gap(&keys(&["a", "b", "a", "b"])), 1);
        assert_eq!(max_admission_gap(&keys(&["a", "b", "c", "d", "a"])), 3);
        assert_eq!(max_admission_gap(&keys(&["a", "a"])), 0);
    }

    #[test]
    fn single_admissions_have_no_gap() {
        assert_eq!(max_admission_gap(&keys(&["a", "b", "c"])), 0);
        assert_eq!(max_admission_gap(&[]), 0);
    }
}
