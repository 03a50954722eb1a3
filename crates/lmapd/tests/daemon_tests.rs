//! Daemon binary tests for the offline code paths
//!
//! The scheduler loop itself is exercised in the library tests; these
//! cover the flag handling and the render-and-exit modes.

use std::process::Command;

const MINIMAL_CONFIG: &str = r#"<config>
  <lmapc:lmap xmlns:lmapc="urn:ietf:params:xml:ns:yang:ietf-lmap-control">
    <lmapc:agent>
      <lmapc:group-id>lab</lmapc:group-id>
    </lmapc:agent>
    <lmapc:tasks>
      <lmapc:task>
        <lmapc:name>noop</lmapc:name>
        <lmapc:program>/bin/true</lmapc:program>
      </lmapc:task>
    </lmapc:tasks>
    <lmapc:schedules>
      <lmapc:schedule>
        <lmapc:name>s1</lmapc:name>
        <lmapc:start>go</lmapc:start>
        <lmapc:action>
          <lmapc:name>a1</lmapc:name>
          <lmapc:task>noop</lmapc:task>
        </lmapc:action>
      </lmapc:schedule>
    </lmapc:schedules>
    <lmapc:events>
      <lmapc:event>
        <lmapc:name>go</lmapc:name>
        <lmapc:immediate/>
      </lmapc:event>
    </lmapc:events>
  </lmapc:lmap>
</config>
"#;

fn lmapd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lmapd"))
}

fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let config = dir.path().join("lmap.xml");
    std::fs::write(&config, MINIMAL_CONFIG).unwrap();
    config
}

#[test]
fn test_version_flag() {
    let output = lmapd().arg("-v").output().expect("failed to run lmapd");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("lmapd version"));
}

#[test]
fn test_noop_renders_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir);

    let output = lmapd()
        .args(["-n", "-c", config.to_str().unwrap()])
        .output()
        .expect("failed to run lmapd");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("<config>"));
    assert!(stdout.contains("<lmapc:group-id>lab</lmapc:group-id>"));
    // the config view hides runtime-only data
    assert!(!stdout.contains("capabilities"));
}

#[test]
fn test_state_includes_capabilities() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir);

    let output = lmapd()
        .args(["-s", "-c", config.to_str().unwrap()])
        .output()
        .expect("failed to run lmapd");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("<data>"));
    assert!(stdout.contains("<lmapc:capabilities>"));
    assert!(stdout.contains("lmapd version"));
    assert!(stdout.contains("<lmapc:state>enabled</lmapc:state>"));
}

#[test]
fn test_invalid_config_exits_nonzero() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("lmap.xml");
    std::fs::write(
        &config,
        MINIMAL_CONFIG.replace("<lmapc:start>go</lmapc:start>", "<lmapc:start>gone</lmapc:start>"),
    )
    .unwrap();

    let output = lmapd()
        .args(["-n", "-c", config.to_str().unwrap()])
        .output()
        .expect("failed to run lmapd");
    assert!(!output.status.success());
}

#[test]
fn test_config_directory_is_merged() {
    let dir = tempfile::TempDir::new().unwrap();
    write_config(&dir);

    let output = lmapd()
        .args(["-n", "-c", dir.path().to_str().unwrap()])
        .output()
        .expect("failed to run lmapd");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<lmapc:name>s1</lmapc:name>"));
}
