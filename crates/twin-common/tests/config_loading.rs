//! ---
//! twin_section: "01-core-functionality"
//! twin_subsection: "tests"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run file loading from disk and environment."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::env;
use std::fs;

use tempfile::tempdir;
use twin_common::config::RunConfig;
use twin_common::LogFormat;

#[test]
fn load_with_source_prefers_environment_override() {
    let dir = tempdir().unwrap();
    let explicit = dir.path().join("explicit.toml");
    let from_env = dir.path().join("env.toml");
    fs::write(&explicit, "[model]\npackage = \"explicit.fmu\"\n").unwrap();
    fs::write(
        &from_env,
        "[model]\npackage = \"env.fmu\"\n\n[logging]\nformat = \"structured-json\"\n",
    )
    .unwrap();

    env::remove_var(RunConfig::ENV_CONFIG_PATH);
    let loaded = RunConfig::load_with_source(Some(&explicit))
        .unwrap()
        .expect("explicit path loads");
    assert_eq!(loaded.source, explicit);
    assert_eq!(loaded.config.model.package.to_str(), Some("explicit.fmu"));
    assert_eq!(loaded.config.logging.format, LogFormat::Pretty);

    env::set_var(RunConfig::ENV_CONFIG_PATH, &from_env);
    let loaded = RunConfig::load_with_source(Some(&explicit))
        .unwrap()
        .expect("environment path loads");
    env::remove_var(RunConfig::ENV_CONFIG_PATH);
    assert_eq!(loaded.source, from_env);
    assert_eq!(loaded.config.logging.format, LogFormat::StructuredJson);

    assert!(RunConfig::load_with_source(None).unwrap().is_none());
}

#[test]
fn invalid_run_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[model]\npackage = \"m.fmu\"\nstep_size = -1.0\n").unwrap();
    let err = RunConfig::from_path(&path).expect_err("negative step is rejected");
    let rendered = format!("{:#}", err);
    assert!(rendered.contains("bad.toml"));
    assert!(rendered.contains("step size"));
}
