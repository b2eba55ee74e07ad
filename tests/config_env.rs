use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use agentsim::cli::runtime::load_config;
use agentsim::ClockMode;

struct EnvVar(&'static str);

impl EnvVar {
    fn set(key: &'static str, value: &str) -> Self {
        std::env::set_var(key, value);
        Self(key)
    }
}

impl Drop for EnvVar {
    fn drop(&mut self) {
        std::env::remove_var(self.0);
    }
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
#[serial]
async fn environment_overrides_win_over_the_file() {
    let file = config_file("scheduler:\n  max_concurrency: 4\n  agent_timeout: 3s\n");
    let _concurrency = EnvVar::set("AGENTSIM__SCHEDULER__MAX_CONCURRENCY", "2");
    let _clock = EnvVar::set("AGENTSIM__SCHEDULER__CLOCK", "real_time");

    let loaded = load_config(Some(&file.path().to_path_buf())).await.unwrap();
    assert_eq!(loaded.overrides, 2);
    assert_eq!(loaded.config.scheduler.max_concurrency, 2);
    assert_eq!(loaded.config.scheduler.clock, ClockMode::RealTime);
    assert_eq!(loaded.config.scheduler.agent_timeout, Duration::from_secs(3));
}

#[tokio::test]
#[serial]
async fn invalid_override_is_rejected() {
    let file = config_file("log_level: info\n");
    let _zero = EnvVar::set("AGENTSIM__SCHEDULER__MAX_CONCURRENCY", "0");
    let err = load_config(Some(&file.path().to_path_buf()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("max_concurrency"));
}

#[tokio::test]
#[serial]
async fn unrelated_variables_are_ignored() {
    let file = config_file("");
    let _other = EnvVar::set("AGENTSIM_SCHEDULER_TICK", "nonsense");
    let loaded = load_config(Some(&file.path().to_path_buf())).await.unwrap();
    assert_eq!(loaded.overrides, 0);
    assert_eq!(loaded.config, agentsim::Config::default());
}
