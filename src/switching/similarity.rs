//! Deterministic similarity between a known session and the current context.
//!
//! | criterion                 | exact | containment |
//! |---------------------------|-------|-------------|
//! | project name (no case)    | 0.4   | 0.2         |
//! | project path              | 0.4   | 0.2         |
//! | git repository            | 0.2   | -           |
//!
//! The sum is capped at 1.0.

use chrono::{DateTime, Utc};

use crate::session_management::SessionRecord;
use crate::switching::types::SwitchContext;

const NAME_EXACT: f64 = 0.4;
const NAME_PARTIAL: f64 = 0.2;
const PATH_EXACT: f64 = 0.4;
const PATH_PARTIAL: f64 = 0.2;
const REPOSITORY_EXACT: f64 = 0.2;

fn either_contains(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

pub fn similarity(session: &SessionRecord, context: &SwitchContext) -> f64 {
    let mut score = 0.0;

    let session_name = session.project_name.to_lowercase();
    let context_name = context.project_name.to_lowercase();
    if !context_name.is_empty() && session_name == context_name {
        score += NAME_EXACT;
    } else if either_contains(&session_name, &context_name) {
        score += NAME_PARTIAL;
    }

    if !context.project_path.is_empty() && session.project_path == context.project_path {
        score += PATH_EXACT;
    } else if either_contains(&session.project_path, &context.project_path) {
        score += PATH_PARTIAL;
    }

    if let (Some(ours), Some(theirs)) = (&session.git_repository, &context.git_repository) {
        if ours == theirs {
            score += REPOSITORY_EXACT;
        }
    }

    f64::min(score, 1.0)
}

/// Coarse recency used to break similarity ties.
pub fn recency_bucket(session: &SessionRecord, now: DateTime<Utc>) -> f64 {
    let days = session.idle_for(now).num_seconds() as f64 / 86_400.0;
    if days <= 1.0 {
        1.0
    } else if days <= 7.0 {
        0.8
    } else if days <= 30.0 {
        0.5
    } else {
        0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 9, 12, 0, 0).unwrap()
    }

    fn session(name: &str, path: &str, repo: Option<&str>) -> SessionRecord {
        let mut s = SessionRecord::new(name, path, "test", now());
        s.git_repository = repo.map(String::from);
        s
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn name_and_path_alone_score_exactly_point_eight() {
        let ctx = SwitchContext::new("/w/app", "app");
        assert!(approx(similarity(&session("APP", "/w/app", None), &ctx), 0.8));
    }

    #[test]
    fn matching_repository_completes_the_score() {
        let ctx = SwitchContext::new("/w/app", "app").with_git_repository("git@h:app.git");
        let s = session("app", "/w/app", Some("git@h:app.git"));
        assert!(approx(similarity(&s, &ctx), 1.0));

        let other = session("app", "/w/app", Some("git@h:fork.git"));
        assert!(approx(similarity(&other, &ctx), 0.8));
    }

    #[test]
    fn containment_scores_partial_credit() {
        let ctx = SwitchContext::new("/w/app", "app");
        assert!(approx(similarity(&session("app", "/old/app", None), &ctx), 0.4));
        assert!(approx(similarity(&session("my-app", "/w/app/server", None), &ctx), 0.4));
        assert!(approx(similarity(&session("other", "/elsewhere", None), &ctx), 0.0));
    }

    #[test]
    fn empty_context_fields_never_match() {
        let ctx = SwitchContext::new("", "");
        assert!(approx(similarity(&session("app", "/w/app", None), &ctx), 0.0));
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let ctx = SwitchContext::new("/w/app", "app").with_git_repository("r");
        for (name, path, repo) in [
            ("app", "/w/app", Some("r")),
            ("ap", "/w", Some("r")),
            ("x", "/y", None),
        ] {
            let score = similarity(&session(name, path, repo), &ctx);
            assert!((0.0..=1.0).contains(&score), "{score}");
        }
    }

    #[test]
    fn recency_buckets() {
        let mut s = session("app", "/w/app", None);
        for (age, expected) in [
            (Duration::hours(2), 1.0),
            (Duration::days(3), 0.8),
            (Duration::days(20), 0.5),
            (Duration::days(90), 0.2),
        ] {
            s.last_activity_at = now() - age;
            assert!(approx(recency_bucket(&s, now()), expected));
        }
    }
}
