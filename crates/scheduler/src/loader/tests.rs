use std::fs;
use std::path::Path;

use hidra_core::ConfigError;

use super::*;

const SAMPLE: &str = "steps:\n  - plugin: string\n    action: setOutput\n    parameters:\n      value: ok\n";

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[test]
fn missing_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = SampleLoader::new(dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, LoadError::NotFound(_)));
}

#[test]
fn discover_is_sorted_and_skips_hidden_and_non_yaml() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b.yml", SAMPLE);
    write(dir.path(), "a.yaml", SAMPLE);
    write(dir.path(), "nested/c.yml", SAMPLE);
    write(dir.path(), ".hidden.yml", SAMPLE);
    write(dir.path(), ".git/d.yml", SAMPLE);
    write(dir.path(), "notes.txt", "not a sample");

    let loader = SampleLoader::new(dir.path()).unwrap();
    let names: Vec<String> = loader
        .discover()
        .unwrap()
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
        .collect();
    assert_eq!(names, vec!["a.yaml", "b.yml", "nested/c.yml"]);
}

#[test]
fn load_all_names_samples_by_stem() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "web.yml", SAMPLE);
    write(dir.path(), "api.yml", &format!("name: api-health\n{SAMPLE}"));

    let samples = SampleLoader::new(dir.path()).unwrap().load_all().unwrap();
    let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["api-health", "web"]);
}

#[test]
fn duplicate_names_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "one.yml", &format!("name: dup\n{SAMPLE}"));
    write(dir.path(), "two.yml", &format!("name: dup\n{SAMPLE}"));

    let err = SampleLoader::new(dir.path()).unwrap().load_all().unwrap_err();
    match err {
        LoadError::Sample(ConfigError::DuplicateSample { name, first, second }) => {
            assert_eq!(name, "dup");
            assert!(first.ends_with("one.yml"));
            assert!(second.ends_with("two.yml"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn watcher_reloads_only_when_path_list_changes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yml", SAMPLE);
    write(dir.path(), "b.yml", SAMPLE);

    let loader = SampleLoader::new(dir.path()).unwrap();
    let (mut watcher, samples) = SampleWatcher::initial(loader).unwrap();
    assert_eq!(samples.len(), 2);
    assert!(watcher.poll().unwrap().is_none());

    write(dir.path(), "c.yml", SAMPLE);
    let reloaded = watcher.poll().unwrap().unwrap();
    assert_eq!(reloaded.len(), 3);
    assert!(watcher.poll().unwrap().is_none());

    fs::remove_file(dir.path().join("a.yml")).unwrap();
    let reloaded = watcher.poll().unwrap().unwrap();
    let names: Vec<&str> = reloaded.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
}

#[test]
fn failed_reload_keeps_snapshot_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yml", SAMPLE);
    let loader = SampleLoader::new(dir.path()).unwrap();
    let (mut watcher, _) = SampleWatcher::initial(loader).unwrap();

    write(dir.path(), "broken.yml", "steps: [");
    assert!(watcher.poll().is_err());
    assert_eq!(watcher.snapshot().len(), 1);

    write(dir.path(), "broken.yml", SAMPLE);
    assert_eq!(watcher.poll().unwrap().unwrap().len(), 2);
}
