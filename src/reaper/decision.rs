//! Pure retain/release rules.
//!
//! Nothing here performs I/O. The runner resolves provenance, hands the
//! resolved candidates to these functions, and applies whatever they select.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{BuildId, JobId, ReleaseReason, SavedContainer, Verdict};

/// An unsuccessful-build container whose build resolved to a live job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContainer {
    pub job_id: JobId,
    pub build_id: BuildId,
    pub container: SavedContainer,
}

/// Highest successful build per job.
pub fn successful_aggregate(builds: impl IntoIterator<Item = (JobId, BuildId)>) -> HashMap<JobId, BuildId> {
    let mut max_by_job = HashMap::new();
    for (job_id, build_id) in builds {
        max_by_job
            .entry(job_id)
            .and_modify(|max: &mut BuildId| *max = (*max).max(build_id))
            .or_insert(build_id);
    }
    max_by_job
}

/// Group resolved unsuccessful containers by job.
pub fn failed_groups(
    containers: impl IntoIterator<Item = ResolvedContainer>,
) -> BTreeMap<JobId, Vec<ResolvedContainer>> {
    let mut groups: BTreeMap<JobId, Vec<ResolvedContainer>> = BTreeMap::new();
    for resolved in containers {
        groups.entry(resolved.job_id).or_default().push(resolved);
    }
    groups
}

/// Decide every container of one job's group.
///
/// A container from build `b` is released iff the job has succeeded after its
/// latest failure (`max_succeeded > max_failed`) or a later failure exists
/// (`max_failed > b`). What survives is the latest failed build of a job that
/// has not succeeded since, kept so the next retry can reuse its cache.
pub fn decide_group(group: Vec<ResolvedContainer>, max_succeeded: Option<BuildId>) -> Vec<Verdict> {
    let Some(max_failed) = group.iter().map(|r| r.build_id).max() else {
        return Vec::new();
    };

    group
        .into_iter()
        .map(|resolved| match max_succeeded {
            Some(succeeded) if succeeded > max_failed => {
                Verdict::release(resolved.container, ReleaseReason::SucceededSince { succeeded })
            }
            _ if max_failed > resolved.build_id => Verdict::release(
                resolved.container,
                ReleaseReason::SupersededByFailure {
                    latest_failed: max_failed,
                },
            ),
            _ => Verdict::retain(resolved.container),
        })
        .collect()
}

/// Decide every group against the successful aggregate of the same pass.
pub fn decide_all(
    groups: BTreeMap<JobId, Vec<ResolvedContainer>>,
    successful: &HashMap<JobId, BuildId>,
) -> Vec<Verdict> {
    groups
        .into_iter()
        .flat_map(|(job_id, group)| decide_group(group, successful.get(&job_id).copied()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, OutcomeClass};

    fn failed(handle: &str, job_id: JobId, build_id: BuildId) -> ResolvedContainer {
        ResolvedContainer {
            job_id,
            build_id,
            container: SavedContainer::new(handle, Some(build_id), "unit", 1, OutcomeClass::UnsuccessfulBuild),
        }
    }

    fn decision_for<'a>(verdicts: &'a [Verdict], handle: &str) -> &'a Decision {
        &verdicts.iter().find(|v| v.handle() == handle).unwrap().decision
    }

    #[test]
    fn test_successful_aggregate_keeps_max() {
        let agg = successful_aggregate(vec![(1, 5), (1, 13), (1, 9), (2, 4)]);
        assert_eq!(agg.get(&1), Some(&13));
        assert_eq!(agg.get(&2), Some(&4));
        assert_eq!(agg.get(&3), None);
    }

    #[test]
    fn test_successful_aggregate_empty() {
        let agg = successful_aggregate(Vec::new());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_failed_groups_by_job() {
        let groups = failed_groups(vec![failed("a", 1, 10), failed("b", 2, 11), failed("c", 1, 12)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&1].len(), 2);
        assert_eq!(groups[&2].len(), 1);
    }

    #[test]
    fn test_latest_failure_retained() {
        let verdicts = decide_group(vec![failed("h10", 1, 10), failed("h12", 1, 12)], None);

        assert_eq!(
            decision_for(&verdicts, "h10"),
            &Decision::Release(ReleaseReason::SupersededByFailure { latest_failed: 12 })
        );
        assert_eq!(decision_for(&verdicts, "h12"), &Decision::Retain);
    }

    #[test]
    fn test_success_supersedes_failures() {
        let verdicts = decide_group(vec![failed("h10", 1, 10), failed("h12", 1, 12)], Some(13));

        for handle in ["h10", "h12"] {
            assert_eq!(
                decision_for(&verdicts, handle),
                &Decision::Release(ReleaseReason::SucceededSince { succeeded: 13 })
            );
        }
    }

    #[test]
    fn test_older_success_does_not_release_latest_failure() {
        let verdicts = decide_group(vec![failed("h10", 1, 10), failed("h12", 1, 12)], Some(11));

        assert!(decision_for(&verdicts, "h10").is_release());
        assert_eq!(decision_for(&verdicts, "h12"), &Decision::Retain);
    }

    #[test]
    fn test_containers_of_latest_build_all_retained() {
        // A build runs several steps, each in its own container.
        let verdicts = decide_group(
            vec![failed("get", 1, 12), failed("task", 1, 12), failed("old", 1, 7)],
            None,
        );

        assert_eq!(decision_for(&verdicts, "get"), &Decision::Retain);
        assert_eq!(decision_for(&verdicts, "task"), &Decision::Retain);
        assert!(decision_for(&verdicts, "old").is_release());
    }

    #[test]
    fn test_empty_group() {
        assert!(decide_group(Vec::new(), Some(3)).is_empty());
    }

    #[test]
    fn test_decide_all_at_most_one_build_retained_per_job() {
        let groups = failed_groups(vec![
            failed("a1", 1, 3),
            failed("a2", 1, 8),
            failed("a3", 1, 5),
            failed("b1", 2, 4),
            failed("b2", 2, 6),
            failed("c1", 3, 2),
        ]);
        let successful = successful_aggregate(vec![(2, 9)]);

        let verdicts = decide_all(groups, &successful);
        let retained: Vec<&str> = verdicts
            .iter()
            .filter(|v| !v.decision.is_release())
            .map(|v| v.handle())
            .collect();

        assert_eq!(verdicts.len(), 6);
        assert_eq!(retained, vec!["a2", "c1"]);
    }
}
