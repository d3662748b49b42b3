use std::collections::{BTreeMap, BTreeSet};

use hidra_core::SampleConfig;

/// Labels every scenario and step series carries, in order.
pub const COMMON_LABELS: [&str; 4] = ["name", "description", "kind", "config_file"];
pub const STEP_LABEL: &str = "step";

/// Map an arbitrary key onto `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()) {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Label name used for a sample tag key. Keys that would shadow a fixed
/// label or use the reserved `__` prefix get a `tag_` prefix.
pub fn tag_label(raw: &str) -> String {
    let name = sanitize_label_name(raw);
    if name.starts_with("__") || COMMON_LABELS.contains(&name.as_str()) || name == STEP_LABEL {
        format!("tag_{name}")
    } else {
        name
    }
}

/// Sorted union of tag label names across `samples`.
pub fn tag_schema(samples: &[SampleConfig]) -> Vec<String> {
    samples
        .iter()
        .flat_map(|s| s.tags.keys())
        .map(|k| tag_label(k))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Full common label name list for a tag schema.
pub(crate) fn common_names(tag_keys: &[String]) -> Vec<String> {
    COMMON_LABELS
        .iter()
        .map(|s| s.to_string())
        .chain(tag_keys.iter().cloned())
        .collect()
}

/// Values for [`common_names`] in the same order. Missing tags emit `""`.
pub(crate) fn common_values(sample: &SampleConfig, tag_keys: &[String]) -> Vec<String> {
    let tags: BTreeMap<String, &str> = sample
        .tags
        .iter()
        .map(|(k, v)| (tag_label(k), v.as_str()))
        .collect();

    let mut values = vec![
        sample.name.clone(),
        sample.description.clone(),
        sample.kind().to_string(),
        sample.path.display().to_string(),
    ];
    values.extend(
        tag_keys
            .iter()
            .map(|k| tags.get(k).copied().unwrap_or_default().to_string()),
    );
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn sanitizes_invalid_characters() {
        assert_eq!(sanitize_label_name("team-name"), "team_name");
        assert_eq!(sanitize_label_name("1zone"), "_zone");
        assert_eq!(sanitize_label_name("env.v2"), "env_v2");
        assert_eq!(sanitize_label_name(""), "_");
    }

    #[test]
    fn tag_labels_avoid_fixed_names() {
        assert_eq!(tag_label("name"), "tag_name");
        assert_eq!(tag_label("step"), "tag_step");
        assert_eq!(tag_label("__meta"), "tag___meta");
        assert_eq!(tag_label("region"), "region");
    }

    #[test]
    fn schema_is_sorted_union() {
        let a = SampleConfig::from_yaml(
            Path::new("a.yml"),
            "tags:\n  region: eu\n  team-name: core\nsteps:\n  - plugin: string\n    action: setOutput\n",
        )
        .unwrap();
        let b = SampleConfig::from_yaml(
            Path::new("b.yml"),
            "tags:\n  env: prod\n  region: us\nsteps:\n  - plugin: string\n    action: setOutput\n",
        )
        .unwrap();

        let schema = tag_schema(&[a.clone(), b]);
        assert_eq!(schema, vec!["env", "region", "team_name"]);

        let values = common_values(&a, &schema);
        assert_eq!(values, vec!["a", "", "string", "a.yml", "", "eu", "core"]);
    }
}
