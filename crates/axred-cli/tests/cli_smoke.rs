use assert_cmd::Command;

const AXRED_VARS: [&str; 11] = [
    "AXRED_CONFIG",
    "AXRED_BACKEND",
    "AXRED_KERNEL_CACHE",
    "AXRED_MAX_LOCAL_SIZE",
    "AXRED_LOCAL_MEMORY_BYTES",
    "AXRED_MAX_LOCAL_WORKERS",
    "AXRED_MAX_GRID_SIZE",
    "AXRED_KERNEL_LOCAL_SIZE_CAP",
    "AXRED_LOG_LEVEL",
    "AXRED_LOG_FORMAT",
    "RUST_LOG",
];

/// The binary run in an empty directory with a clean environment.
fn axred(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("axred").unwrap();
    cmd.current_dir(dir.path());
    for var in AXRED_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn help_works() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).arg("--help"));
    for needle in ["source", "run", "info", "config", "--config"] {
        assert!(s.contains(needle), "help missing `{needle}`");
    }
}

#[test]
fn version_works() {
    let dir = tempfile::tempdir().unwrap();
    axred(&dir).arg("--version").assert().success();
}

#[test]
fn invalid_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    axred(&dir).arg("nonexistent-command").assert().failure();
}

#[test]
fn source_prints_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args(["source", "--redux", "0,1", "--local-size", "8"]));
    assert!(s.contains("KERNEL void reduk("), "{s}");
    assert!(s.contains("LOCAL_MEM float ldata[8];"), "{s}");
}

#[test]
fn source_alias_with_header() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args(["src", "--redux", "1", "--header", "opencl"]));
    assert!(s.contains("#define KERNEL"), "{s}");
    assert!(s.contains("reduk"), "{s}");
}

#[test]
fn run_sums_rows() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args([
        "run", "--shape", "2,3", "--data", "1,2,3,4,5,6", "--redux", "0,1",
    ]));
    assert_eq!(s, "shape: [2]\n6 15\n");
}

#[test]
fn run_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args([
        "run",
        "--shape",
        "2,3",
        "--data",
        "1,-2,3,4,5,6",
        "--redux",
        "1,0",
        "--dtype",
        "int32",
        "--output-format",
        "json",
    ]));
    let value: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert_eq!(value["dtype"], "int32");
    assert_eq!(value["values"], serde_json::json!([5, 3, 9]));
}

#[test]
fn run_with_scalar_argument() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args([
        "run",
        "--shape",
        "4",
        "--data",
        "1,2,3,4",
        "--redux",
        "1",
        "--args",
        "const float *x, float alpha",
        "--map",
        "alpha * x[i]",
        "--scalar",
        "2",
    ]));
    assert_eq!(s, "shape: []\n20\n");
}

#[test]
fn run_with_cache_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "[redux]\nkernel_cache = true\nmax_local_size = 4\n").unwrap();
    let s = stdout_of(axred(&dir).arg("--config").arg(&config).args([
        "run", "--shape", "3,2", "--data", "1,2,3,4,5,6", "--redux", "1,0",
    ]));
    assert_eq!(s, "shape: [2]\n9 12\n");
}

#[test]
fn run_rejects_wrong_data_length() {
    let dir = tempfile::tempdir().unwrap();
    axred(&dir)
        .args(["run", "--shape", "2,3", "--data", "1,2", "--redux", "0,1"])
        .assert()
        .failure();
}

#[test]
fn invalid_reduction_fails() {
    let dir = tempfile::tempdir().unwrap();
    axred(&dir)
        .args(["source", "--redux", "0,1", "--args", "const float *acc"])
        .assert()
        .failure();
}

#[test]
fn config_path_defaults_to_working_directory_file() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args(["config", "path"]));
    assert_eq!(s.trim(), "axred.toml");
}

#[test]
fn config_show_reflects_environment() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).env("AXRED_KERNEL_CACHE", "true").args(["config", "show"]));
    assert!(s.contains("kernel_cache = true"), "{s}");
}

#[test]
fn info_json_reports_limits() {
    let dir = tempfile::tempdir().unwrap();
    let s = stdout_of(axred(&dir).args(["info", "--output-format", "json"]));
    let value: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert_eq!(value["backend"], "host");
    assert_eq!(value["limits"]["max_grid_size"], 65_535);
}
