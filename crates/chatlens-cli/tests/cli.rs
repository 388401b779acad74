use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Map, Value};

const THEMES: [&str; 3] = [
    "rust compiler borrow checker lifetime",
    "garden tomato soil compost seedling",
    "guitar chord melody rhythm scale",
];

const MONTH_STARTS: [i64; 4] = [1_704_067_200, 1_706_745_600, 1_709_251_200, 1_711_929_600];

/// Tree-shaped export: one conversation per (month, theme), each an
/// alternating exchange of `per_thread` messages on one theme.
fn write_export(path: &Path, per_thread: usize) {
    let mut conversations = Vec::new();
    for (mi, start) in MONTH_STARTS.iter().enumerate() {
        for (ti, theme) in THEMES.iter().enumerate() {
            let words: Vec<&str> = theme.split(' ').collect();
            let mut mapping = Map::new();
            mapping.insert("root".into(), json!({"message": null}));
            for i in 0..per_thread {
                let role = if i % 2 == 0 { "user" } else { "assistant" };
                let text = format!(
                    "{} {} {}",
                    words[i % 5],
                    words[(i + 1) % 5],
                    words[(i + 2) % 5]
                );
                let id = format!("m{mi}-{ti}-{i}");
                mapping.insert(
                    id.clone(),
                    json!({"message": {
                        "id": id,
                        "author": {"role": role},
                        "create_time": start + ((ti * per_thread + i) * 60) as i64,
                        "content": {"parts": [text]}
                    }}),
                );
            }
            conversations.push(json!({
                "id": format!("c{mi}-{ti}"),
                "title": format!("{} chat", words[0]),
                "mapping": Value::Object(mapping),
            }));
        }
    }
    std::fs::write(path, serde_json::to_vec(&conversations).unwrap()).unwrap();
}

fn write_config(path: &Path) {
    let small_topics = json!({"n_clusters": 3, "svd_components": 3, "min_df": 1, "max_df": 0.9});
    let config = json!({
        "precheck": {"min_user_messages": 50, "min_months": 3},
        "topics": small_topics,
        "domains": {"n_macro": 2},
        "robustness": {"k_values": [3], "svd_values": [3], "n_permutations": 10, "topics": small_topics},
        "coupling": {"n_permutations": 20},
        "dynamics": {"rolling_window": 50, "rolling_stride": 50, "shift_permutations": 50}
    });
    std::fs::write(path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
}

fn chatlens() -> Command {
    Command::cargo_bin("chatlens").unwrap()
}

#[test]
fn test_help_lists_stages() {
    chatlens()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("precheck"))
        .stdout(predicate::str::contains("robustness"))
        .stdout(predicate::str::contains("dynamics"));
}

#[test]
fn test_precheck_reports_small_export() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    write_export(&export, 4);
    chatlens()
        .arg("precheck")
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("Format detected : tree"))
        .stdout(predicate::str::contains("Not ready for analysis."));
}

#[test]
fn test_parse_then_stage_by_stage() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    let config = dir.path().join("config.json");
    let db = dir.path().join("store.db");
    let out = dir.path().join("out");
    write_export(&export, 24);
    write_config(&config);

    chatlens()
        .args(["--format", "json", "parse"])
        .arg(&export)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"messages_written\": 288"))
        .stdout(predicate::str::contains("\"format\": \"tree\""));

    for stage in ["profile", "topics", "domains", "alignment", "coupling", "dynamics"] {
        chatlens()
            .arg(stage)
            .arg("--db")
            .arg(&db)
            .arg("--out")
            .arg(&out)
            .arg("--config")
            .arg(&config)
            .assert()
            .success();
    }
    for file in [
        "ai_view_profile_v01.csv",
        "monthly_topic_entropy_tfidf.csv",
        "macro_monthly_domain_shares.csv",
        "dyadic_alignment_monthly.csv",
        "step9_directional_coupling_summary.csv",
        "rolling_entropy_50.csv",
        "step10b2_episode_summary.csv",
    ] {
        assert!(out.join(file).exists(), "missing {file}");
    }
}

#[test]
fn test_run_whole_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    let config = dir.path().join("config.json");
    let out = dir.path().join("out");
    write_export(&export, 24);
    write_config(&config);

    chatlens()
        .args(["--format", "json", "run"])
        .arg(&export)
        .arg("--db")
        .arg(dir.path().join("store.db"))
        .arg("--out")
        .arg(&out)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"robustness\""))
        .stdout(predicate::str::contains("\"episodes\": 12"));
    assert!(out.join("robustness_null_tests.csv").exists());
    assert!(out.join("robustness_curves_k3_svd3.csv").exists());
}

#[test]
fn test_run_stops_at_failed_precheck() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    write_export(&export, 4);
    chatlens()
        .arg("run")
        .arg(&export)
        .arg("--db")
        .arg(dir.path().join("store.db"))
        .arg("--out")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--skip-precheck"));
    assert!(!dir.path().join("store.db").exists());
}

#[test]
fn test_stage_without_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    chatlens()
        .arg("topics")
        .arg("--db")
        .arg(dir.path().join("missing.db"))
        .arg("--out")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("chatlens parse"));
}

#[test]
fn test_invalid_export_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    std::fs::write(&export, "{not json").unwrap();
    chatlens()
        .arg("parse")
        .arg(&export)
        .arg("--db")
        .arg(dir.path().join("store.db"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}
