//! Filter Engine (spec §4.3): evaluates metadata predicates and date
//! windows to decide admission of a candidate video, and evaluates the same
//! predicate core for move-ops and filtered meta/filename-ops.

use crate::models::{Filter, FilterMode, FilterOp, FilteredOpSet, MoveOp};
use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct Decision {
    pub(crate) admitted: bool,
    /// Any hard-failing filter requires the caller to delete the JSON
    /// artifact for this video (spec §4.3 step 4 / §4.5 step 4).
    pub(crate) fail_hard: bool,
}

fn field_as_lowercase_string(metadata: &BTreeMap<String, serde_json::Value>, field: &str) -> Option<String> {
    metadata.get(field).map(|v| match v {
        serde_json::Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    })
}

/// Evaluate one filter against the metadata map. Returns `(passed,
/// fail_hard)` per the truth table in spec §4.3 step 2.
fn evaluate_one(filter: &Filter, metadata: &BTreeMap<String, serde_json::Value>) -> (bool, bool) {
    let is_must = filter.mode == FilterMode::Must;
    let present = field_as_lowercase_string(metadata, &filter.field);

    match (filter.op, filter.value.is_empty()) {
        (FilterOp::Contains, true) => {
            let passed = present.is_some();
            (passed, !passed && is_must)
        }
        (FilterOp::Omits, true) => {
            let passed = present.is_none();
            (passed, !passed && is_must)
        }
        (FilterOp::Contains, false) => {
            let passed = present
                .as_deref()
                .is_some_and(|v| v.contains(&filter.value.to_lowercase()));
            (passed, !passed && is_must)
        }
        (FilterOp::Omits, false) => {
            let passed = !present
                .as_deref()
                .is_some_and(|v| v.contains(&filter.value.to_lowercase()));
            (passed, !passed && is_must)
        }
    }
}

/// Scope rule (spec §4.3): a filter whose `channel_url` is non-empty and
/// doesn't case-insensitively match the current URL is excluded.
fn in_scope<T>(channel_url_field: &str, current_channel_url: &str, item: &T) -> bool
where
    T: ?Sized,
{
    let _ = item;
    channel_url_field.is_empty() || channel_url_field.eq_ignore_ascii_case(current_channel_url)
}

/// Decide admission for one candidate video's metadata against its
/// channel-URL's filter set. Pure function: same inputs, same output
/// (spec §8 testable property).
pub(crate) fn decide(
    metadata: &BTreeMap<String, serde_json::Value>,
    filters: &[Filter],
    current_channel_url: &str,
) -> Decision {
    let scoped: Vec<&Filter> = filters
        .iter()
        .filter(|f| in_scope(&f.channel_url, current_channel_url, *f))
        .collect();

    let must: Vec<&&Filter> = scoped.iter().filter(|f| f.mode == FilterMode::Must).collect();
    let any: Vec<&&Filter> = scoped.iter().filter(|f| f.mode == FilterMode::Any).collect();

    let mut fail_hard = false;
    let mut must_passed = 0usize;
    let mut any_passed = 0usize;

    for f in &must {
        let (passed, hard) = evaluate_one(f, metadata);
        if passed {
            must_passed += 1;
        }
        fail_hard |= hard;
    }
    for f in &any {
        let (passed, hard) = evaluate_one(f, metadata);
        if passed {
            any_passed += 1;
        }
        fail_hard |= hard;
    }

    // Open Question (spec §9): `any_total > 0 && any_passed == 0 && must_passed > 0`
    // rejects, matching the source's behavior verbatim.
    let admitted = !fail_hard && must_passed == must.len() && (any.is_empty() || any_passed >= 1);

    Decision { admitted, fail_hard }
}

/// Date-window check (spec §4.3): inclusive `[from_date, to_date]` over the
/// `YYYYMMDD` integer form of `upload_date`. A zero `upload_date` always
/// passes this dimension.
pub(crate) fn in_date_window(upload_date_int: i64, from_date: Option<i64>, to_date: Option<i64>) -> bool {
    if upload_date_int == 0 {
        return true;
    }
    if let Some(from) = from_date
        && upload_date_int < from
    {
        return false;
    }
    if let Some(to) = to_date
        && upload_date_int > to
    {
        return false;
    }
    true
}

/// First matching move-op (by declaration order) sets the override output
/// directory for a video (spec §3 `MoveOp`).
pub(crate) fn resolve_move_op(
    move_ops: &[MoveOp],
    metadata: &BTreeMap<String, serde_json::Value>,
    current_channel_url: &str,
) -> Option<String> {
    move_ops
        .iter()
        .filter(|op| in_scope(&op.channel_url, current_channel_url, op))
        .find(|op| {
            field_as_lowercase_string(metadata, &op.field)
                .is_some_and(|v| v.contains(&op.value.to_lowercase()))
        })
        .map(|op| op.output_dir.clone())
}

/// Accumulate post-processor ops whose attached filter set matches the
/// video's metadata (spec §3 `FilteredMetaOp`/`FilteredFilenameOp`).
pub(crate) fn matched_ops(
    sets: &[FilteredOpSet],
    metadata: &BTreeMap<String, serde_json::Value>,
    current_channel_url: &str,
) -> Vec<String> {
    let mut out = Vec::new();
    for set in sets {
        if !in_scope(&set.channel_url, current_channel_url, set) {
            continue;
        }
        let decision = decide(metadata, &set.filters, current_channel_url);
        if decision.admitted {
            for op in &set.ops {
                if !out.contains(op) {
                    out.push(op.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::String((*v).to_string())))
            .collect()
    }

    fn must_contains(field: &str, value: &str) -> Filter {
        Filter {
            channel_url: String::new(),
            field: field.to_string(),
            op: FilterOp::Contains,
            value: value.to_string(),
            mode: FilterMode::Must,
        }
    }

    #[test]
    fn basic_admission() {
        let m = meta(&[("title", "Dogs"), ("upload_date", "20240115")]);
        let filters = vec![must_contains("title", "dogs")];
        let decision = decide(&m, &filters, "u1");
        assert!(decision.admitted);
        assert!(!decision.fail_hard);
    }

    #[test]
    fn must_mismatch_rejects_hard() {
        let m = meta(&[("title", "Dogs")]);
        let filters = vec![must_contains("title", "cats")];
        let decision = decide(&m, &filters, "u1");
        assert!(!decision.admitted);
        assert!(decision.fail_hard);
    }

    #[test]
    fn any_group_requires_at_least_one_pass() {
        let m = meta(&[("title", "Dogs")]);
        let filters = vec![Filter {
            channel_url: String::new(),
            field: "title".to_string(),
            op: FilterOp::Contains,
            value: "cats".to_string(),
            mode: FilterMode::Any,
        }];
        let decision = decide(&m, &filters, "u1");
        assert!(!decision.admitted);
    }

    #[test]
    fn any_zero_passed_rejects_even_if_must_passed() {
        let m = meta(&[("title", "Dogs")]);
        let filters = vec![
            must_contains("title", "dogs"),
            Filter {
                channel_url: String::new(),
                field: "title".to_string(),
                op: FilterOp::Contains,
                value: "cats".to_string(),
                mode: FilterMode::Any,
            },
        ];
        let decision = decide(&m, &filters, "u1");
        assert!(!decision.admitted);
    }

    #[test]
    fn omits_empty_value_passes_when_field_missing() {
        let m = meta(&[]);
        let filters = vec![Filter {
            channel_url: String::new(),
            field: "banned".to_string(),
            op: FilterOp::Omits,
            value: String::new(),
            mode: FilterMode::Must,
        }];
        assert!(decide(&m, &filters, "u1").admitted);
    }

    #[test]
    fn scope_excludes_non_matching_channel_url() {
        let m = meta(&[("title", "Dogs")]);
        let filters = vec![Filter {
            channel_url: "https://other.example".to_string(),
            field: "title".to_string(),
            op: FilterOp::Contains,
            value: "cats".to_string(),
            mode: FilterMode::Must,
        }];
        // Filter doesn't apply to u1, so nothing to fail on.
        assert!(decide(&m, &filters, "https://u1.example").admitted);
    }

    #[test]
    fn date_window_zero_always_passes() {
        assert!(in_date_window(0, Some(20240101), Some(20240201)));
    }

    #[test]
    fn date_window_rejects_before_from() {
        assert!(!in_date_window(20230101, Some(20240101), None));
    }

    #[test]
    fn pure_repeated_calls_match() {
        let m = meta(&[("title", "Dogs")]);
        let filters = vec![must_contains("title", "dogs")];
        let a = decide(&m, &filters, "u1");
        let b = decide(&m, &filters, "u1");
        assert_eq!(a.admitted, b.admitted);
        assert_eq!(a.fail_hard, b.fail_hard);
    }

    #[test]
    fn first_matching_move_op_wins() {
        let m = meta(&[("title", "Dogs and cats")]);
        let ops = vec![
            MoveOp {
                channel_url: String::new(),
                field: "title".to_string(),
                value: "dogs".to_string(),
                output_dir: "/dogs".to_string(),
            },
            MoveOp {
                channel_url: String::new(),
                field: "title".to_string(),
                value: "cats".to_string(),
                output_dir: "/cats".to_string(),
            },
        ];
        assert_eq!(resolve_move_op(&ops, &m, "u1"), Some("/dogs".to_string()));
    }

    #[test]
    fn matched_ops_deduplicates() {
        let m = meta(&[("title", "Dogs")]);
        let sets = vec![
            FilteredOpSet {
                channel_url: String::new(),
                filters: vec![must_contains("title", "dogs")],
                ops: vec!["tag:add:pets".to_string()],
            },
            FilteredOpSet {
                channel_url: String::new(),
                filters: vec![must_contains("title", "dogs")],
                ops: vec!["tag:add:pets".to_string(), "tag:add:cute".to_string()],
            },
        ];
        let ops = matched_ops(&sets, &m, "u1");
        assert_eq!(ops, vec!["tag:add:pets".to_string(), "tag:add:cute".to_string()]);
    }
}
