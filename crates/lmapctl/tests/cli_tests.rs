//! CLI integration tests

use std::process::Command;

const MINIMAL_CONFIG: &str = r#"<config>
  <lmapc:lmap xmlns:lmapc="urn:ietf:params:xml:ns:yang:ietf-lmap-control">
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

fn lmapctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lmapctl"))
}

#[test]
fn test_version_command() {
    let output = lmapctl().arg("version").output().expect("failed to run lmapctl");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("lmapctl version"));
}

#[test]
fn test_validate_accepts_good_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("lmap.xml");
    std::fs::write(&config, MINIMAL_CONFIG).unwrap();

    let output = lmapctl()
        .args(["-c", config.to_str().unwrap(), "validate"])
        .output()
        .expect("failed to run lmapctl");
    assert!(output.status.success());
}

#[test]
fn test_validate_rejects_dangling_reference() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("lmap.xml");
    std::fs::write(
        &config,
        MINIMAL_CONFIG.replace("<lmapc:start>go</lmapc:start>", "<lmapc:start>gone</lmapc:start>"),
    )
    .unwrap();

    let output = lmapctl()
        .args(["-c", config.to_str().unwrap(), "validate"])
        .output()
        .expect("failed to run lmapctl");
    assert!(!output.status.success());
}

#[test]
fn test_config_renders_xml() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("lmap.xml");
    std::fs::write(&config, MINIMAL_CONFIG).unwrap();

    let output = lmapctl()
        .args(["-c", config.to_str().unwrap(), "config"])
        .output()
        .expect("failed to run lmapctl");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("urn:ietf:params:xml:ns:yang:ietf-lmap-control"));
    assert!(stdout.contains("<lmapc:name>s1</lmapc:name>"));
}

#[test]
fn test_running_fails_without_daemon() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = lmapctl()
        .args(["-r", dir.path().to_str().unwrap(), "running"])
        .output()
        .expect("failed to run lmapctl");
    assert!(!output.status.success());
}

#[test]
fn test_report_reads_results_from_cwd() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("lmap.xml");
    std::fs::write(&config, MINIMAL_CONFIG).unwrap();

    let results = dir.path().join("results");
    std::fs::create_dir(&results).unwrap();
    std::fs::write(
        results.join("100-s1-a1.meta"),
        "magic;lmapd 0.4.0\nschedule;s1\naction;a1\ntask;noop\nstart;100\nend;101\nstatus;0\n",
    )
    .unwrap();
    std::fs::write(results.join("100-s1-a1.data"), "rtt;12.5\n").unwrap();

    let output = lmapctl()
        .args([
            "-c",
            config.to_str().unwrap(),
            "-C",
            results.to_str().unwrap(),
            "report",
        ])
        .output()
        .expect("failed to run lmapctl");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("lmapr:report"));
    assert!(stdout.contains("<lmapr:schedule>s1</lmapr:schedule>"));
    assert!(stdout.contains("<lmapr:value>rtt</lmapr:value>"));

    let output = lmapctl()
        .args([
            "-c",
            config.to_str().unwrap(),
            "-C",
            results.to_str().unwrap(),
            "-j",
            "report",
        ])
        .output()
        .expect("failed to run lmapctl");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ietf-lmap-report:report"));
    assert!(stdout.contains("\"schedule\": \"s1\""));
}
