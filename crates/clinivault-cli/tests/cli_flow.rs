use std::path::PathBuf;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const MASTER_KEY: &str = "test-master-key-123";

fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_clinivault"))
}

/// Isolated XDG homes with a config using fast key derivation.
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let env = Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        };
        let config_dir = env.config_home().join("clinivault");
        std::fs::create_dir_all(&config_dir).expect("create config dir");
        std::fs::write(
            config_dir.join("config.toml"),
            "[cipher]\nmemory_kib = 1024\niterations = 1\nparallelism = 1\n\n[[backup]]\ntenant_id = \"clinic-a\"\n",
        )
        .expect("write config");
        env
    }

    fn config_home(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    fn data_home(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(bin());
        cmd.args(args)
            .env("XDG_CONFIG_HOME", self.config_home())
            .env("XDG_DATA_HOME", self.data_home())
            .env("CLINIVAULT_MASTER_KEY", MASTER_KEY)
            .env("CLINIVAULT_USER", "dr-lima")
            .env_remove("CLINIVAULT_CONFIG")
            .env_remove("CLINIVAULT_STORE")
            .env_remove("CLINIVAULT_TENANT")
            .env_remove("CLINIVAULT_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run clinivault")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "clinivault {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).expect("utf8 stdout")
    }

    fn run_json(&self, args: &[&str]) -> Value {
        serde_json::from_str(&self.run_ok(args)).expect("valid JSON output")
    }

    fn init(&self) {
        self.run_ok(&["init"]);
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_init_creates_store_and_records_path() {
    let env = TestEnv::new();
    let stdout = env.run_ok(&["init"]);
    assert!(stdout.contains("Initialized clinivault store"));

    let store = env.data_home().join("clinivault").join("store.age");
    assert!(store.exists());
    let config =
        std::fs::read_to_string(env.config_home().join("clinivault").join("config.toml")).unwrap();
    assert!(config.contains(&store.to_string_lossy().to_string()));
    // Existing settings survive
    assert!(config.contains("memory_kib = 1024"));

    let again = env.run(&["init"]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("already exists"));
}

#[test]
fn test_record_flow_is_tenant_scoped_and_audited() {
    let env = TestEnv::new();
    env.init();

    env.run_ok(&[
        "put",
        "--tenant",
        "clinic-a",
        "patients",
        "p1",
        "--data",
        r#"{"name":"A. Silva"}"#,
        "--secret",
        "left knee pain",
    ]);

    let record = env.run_json(&["get", "-t", "clinic-a", "patients", "p1", "--decrypt", "--json"]);
    assert_eq!(record["publicData"]["name"], "A. Silva");
    assert_eq!(record["tenantId"], "clinic-a");
    assert_eq!(record["version"], 1);
    assert_eq!(record["payload"], "left knee pain");

    let other = env.run(&["get", "-t", "clinic-b", "patients", "p1"]);
    assert_eq!(other.status.code(), Some(1));
    assert!(stderr(&other).contains("Record not found"));

    let listed = env.run_json(&["list", "-t", "clinic-a", "patients", "--json"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    let listed = env.run_json(&["list", "-t", "clinic-b", "patients", "--json"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    let audit_out = env.run_ok(&["audit", "-t", "clinic-a", "--json"]);
    assert!(!audit_out.contains("left knee pain"));
    let entries: Value = serde_json::from_str(&audit_out).unwrap();
    let actions: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"CREATE"));
    assert!(actions.contains(&"VIEW"));
    assert!(entries
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["userId"] == "dr-lima"));
}

#[test]
fn test_backup_and_restore_flow() {
    let env = TestEnv::new();
    env.init();
    env.run_ok(&["put", "-t", "clinic-a", "patients", "p1", "--data", r#"{"name":"A. Silva"}"#]);

    let backup_id = env
        .run_ok(&["-q", "backup", "full", "-t", "clinic-a"])
        .trim()
        .to_string();
    assert!(!backup_id.is_empty());

    env.run_ok(&["put", "-t", "clinic-a", "patients", "p1", "--data", r#"{"name":"changed"}"#]);
    env.run_ok(&["put", "-t", "clinic-a", "patients", "p2", "--data", r#"{"name":"B. Costa"}"#]);

    let verify = env.run_ok(&["backup", "verify", "-t", "clinic-a", &backup_id]);
    assert!(verify.contains("OK"));

    env.run_ok(&[
        "backup",
        "restore",
        "-t",
        "clinic-a",
        &backup_id,
        "--overwrite",
        "--yes",
    ]);

    let listed = env.run_json(&["list", "-t", "clinic-a", "patients", "--json"]);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["publicData"]["name"], "A. Silva");

    // The original plus the safety backup taken before restoring
    let points = env.run_json(&["backup", "list", "-t", "clinic-a", "--json"]);
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p["canRestore"] == true));
}

#[test]
fn test_missing_master_key_without_tty_fails() {
    let env = TestEnv::new();
    env.init();

    let output = env
        .command(&["list", "-t", "clinic-a", "patients"])
        .env_remove("CLINIVAULT_MASTER_KEY")
        .output()
        .expect("run clinivault");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("CLINIVAULT_MASTER_KEY"));
}

#[test]
fn test_wrong_master_key_fails() {
    let env = TestEnv::new();
    env.init();

    let output = env
        .command(&["list", "-t", "clinic-a", "patients"])
        .env("CLINIVAULT_MASTER_KEY", "not-the-master-key")
        .output()
        .expect("run clinivault");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Decryption failed"));
}

#[test]
fn test_unknown_collection_rejected() {
    let env = TestEnv::new();
    let output = env.run(&["put", "-t", "clinic-a", "invoices", "i1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Unknown collection: invoices"));
}

#[test]
fn test_commands_before_init_point_to_init() {
    let env = TestEnv::new();
    let output = env.run(&["list", "-t", "clinic-a", "patients"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("clinivault init"));
}

#[test]
fn test_store_flag_overrides_config() {
    let env = TestEnv::new();
    let store = env.dir.path().join("elsewhere").join("clinic.age");
    let store_arg = store.to_string_lossy().to_string();

    env.run_ok(&["init", &store_arg]);
    assert!(store.exists());
    env.run_ok(&["--store", &store_arg, "put", "-t", "clinic-a", "exerciseLogs", "l1"]);

    let listed = env.run_json(&["--store", &store_arg, "list", "-t", "clinic-a", "exerciseLogs", "--json"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[test]
fn test_completions() {
    let env = TestEnv::new();
    let stdout = env.run_ok(&["completions", "bash"]);
    assert!(stdout.contains("clinivault"));
}
