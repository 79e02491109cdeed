//! File-based filter/move-op/filtered-op loader (spec §3, §9 Open
//! Question: re-read each run so edits take effect without restart).
//! One JSON document per channel URL lives under the configured rules
//! directory; the database-declared half (see `store.rs`) is merged in by
//! the caller.

use crate::models::{Filter, FilterMode, FilterOp, FilteredOpSet, MoveOp};

#[derive(Default, serde::Deserialize)]
struct FileFilterDef {
    #[serde(default)]
    channel_url: String,
    field: String,
    op: String,
    #[serde(default)]
    value: String,
    mode: String,
}

#[derive(Default, serde::Deserialize)]
struct FileMoveOpDef {
    #[serde(default)]
    channel_url: String,
    field: String,
    value: String,
    output_dir: String,
}

#[derive(Default, serde::Deserialize)]
struct FileOpSetDef {
    #[serde(default)]
    channel_url: String,
    filters: Vec<FileFilterDef>,
    ops: Vec<String>,
}

#[derive(Default, serde::Deserialize)]
struct RuleFile {
    #[serde(default)]
    filters: Vec<FileFilterDef>,
    #[serde(default)]
    move_ops: Vec<FileMoveOpDef>,
    #[serde(default)]
    meta_ops: Vec<FileOpSetDef>,
    #[serde(default)]
    filename_ops: Vec<FileOpSetDef>,
}

#[derive(Default)]
pub(crate) struct FileRules {
    pub(crate) filters: Vec<Filter>,
    pub(crate) move_ops: Vec<MoveOp>,
    pub(crate) meta_ops: Vec<FilteredOpSet>,
    pub(crate) filename_ops: Vec<FilteredOpSet>,
}

fn parse_op(s: &str) -> anyhow::Result<FilterOp> {
    match s {
        "contains" => Ok(FilterOp::Contains),
        "omits" => Ok(FilterOp::Omits),
        other => anyhow::bail!("unknown filter op '{other}'"),
    }
}

fn parse_mode(s: &str) -> anyhow::Result<FilterMode> {
    match s {
        "must" => Ok(FilterMode::Must),
        "any" => Ok(FilterMode::Any),
        other => anyhow::bail!("unknown filter mode '{other}'"),
    }
}

fn convert_filter(def: FileFilterDef) -> anyhow::Result<Filter> {
    Ok(Filter {
        channel_url: def.channel_url,
        field: def.field,
        op: parse_op(&def.op)?,
        value: def.value,
        mode: parse_mode(&def.mode)?,
    })
}

fn convert_op_set(def: FileOpSetDef) -> anyhow::Result<FilteredOpSet> {
    Ok(FilteredOpSet {
        channel_url: def.channel_url,
        filters: def
            .filters
            .into_iter()
            .map(convert_filter)
            .collect::<anyhow::Result<Vec<_>>>()?,
        ops: def.ops,
    })
}

/// Re-read every `*.json` document under `rules_dir`. Missing directory is
/// treated as "no file-based rules configured" rather than an error.
pub(crate) fn load(rules_dir: &str) -> anyhow::Result<FileRules> {
    let dir = std::path::Path::new(rules_dir);
    if !dir.is_dir() {
        return Ok(FileRules::default());
    }

    let mut out = FileRules::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let parsed: RuleFile = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse rule file {path:?}: {e}"))?;

        for f in parsed.filters {
            out.filters.push(convert_filter(f)?);
        }
        for m in parsed.move_ops {
            out.move_ops.push(MoveOp {
                channel_url: m.channel_url,
                field: m.field,
                value: m.value,
                output_dir: m.output_dir,
            });
        }
        for s in parsed.meta_ops {
            out.meta_ops.push(convert_op_set(s)?);
        }
        for s in parsed.filename_ops {
            out.filename_ops.push(convert_op_set(s)?);
        }
    }

    Ok(out)
}

/// Merge DB-declared and file-declared filter pools, deduplicated by
/// `(channel_url, field, op, value, mode)`.
pub(crate) fn merge_filters(db: &[Filter], file: &[Filter]) -> Vec<Filter> {
    let mut out = Vec::with_capacity(db.len() + file.len());
    let mut seen = std::collections::HashSet::new();
    for f in db.iter().chain(file.iter()) {
        let key = (
            f.channel_url.clone(),
            f.field.clone(),
            format!("{:?}", f.op),
            f.value.clone(),
            format!("{:?}", f.mode),
        );
        if seen.insert(key) {
            out.push(f.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_dir_returns_defaults() {
        let rules = load("/nonexistent/rules/dir/xyz").unwrap();
        assert!(rules.filters.is_empty());
    }

    #[test]
    fn loads_and_parses_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("channel1.json")).unwrap();
        write!(
            f,
            r#"{{
                "filters": [{{"field": "title", "op": "contains", "value": "dogs", "mode": "must"}}],
                "move_ops": [{{"field": "title", "value": "cats", "output_dir": "/cats"}}]
            }}"#
        )
        .unwrap();

        let rules = load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(rules.filters.len(), 1);
        assert_eq!(rules.move_ops.len(), 1);
    }

    #[test]
    fn merge_dedupes() {
        let f = Filter {
            channel_url: String::new(),
            field: "title".to_string(),
            op: FilterOp::Contains,
            value: "dogs".to_string(),
            mode: FilterMode::Must,
        };
        let merged = merge_filters(&[f.clone()], &[f]);
        assert_eq!(merged.len(), 1);
    }
}
