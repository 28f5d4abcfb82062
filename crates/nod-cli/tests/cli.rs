use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use nod_encoder::snapshot::{FibRoute, InterfaceConfig, NodeConfig, Snapshot};
use nod_ir::state::Edge;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn iface(addr: &str) -> Result<InterfaceConfig, Box<dyn std::error::Error>> {
    Ok(InterfaceConfig {
        addresses: vec![addr.parse()?],
        ..Default::default()
    })
}

fn write_pair(dir: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let r1 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.1/30")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth0", "10.0.0.2".parse()?),
            ],
        );
    let r2 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.2/30")?)
        .with_routes(
            "default",
            vec![FibRoute::connected("10.0.0.0/30".parse()?, "eth0")],
        );
    let snapshot = Snapshot::default()
        .with_node("r1", r1)
        .with_node("r2", r2)
        .with_link(Edge::new("r1", "eth0", "r2", "eth0"));
    let path = dir.join("snapshot.json");
    fs::write(&path, serde_json::to_string(&snapshot)?)?;
    Ok(path.to_string_lossy().into_owned())
}

fn nod(args: &[&str]) -> std::io::Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_nod"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
}

#[test]
fn help_lists_every_analysis() -> TestResult {
    let output = nod(&["--help"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in [
        "reach",
        "multipath",
        "acl-lines",
        "reduced-reachability",
        "path-diff",
        "datalog",
    ] {
        assert!(stdout.contains(command), "help is missing {command}");
    }
    Ok(())
}

#[test]
fn reach_prints_flows_as_json() -> TestResult {
    let dir = tempfile::tempdir()?;
    let snapshot = write_pair(dir.path())?;
    let query = dir.path().join("query.json");
    fs::write(
        &query,
        r#"{
            "header_space": { "dst_ips": { "ip": "10.0.0.2" } },
            "ingress": [ { "type": "vrf", "node": "r1", "vrf": "default" } ]
        }"#,
    )?;
    let output = nod(&[
        "reach",
        "--sequential",
        "--snapshot",
        &snapshot,
        "--query",
        &query.to_string_lossy(),
    ])?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let answer: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let flows = answer["flows"].as_array().ok_or("no flows array")?;
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0]["ingress_node"], "r1");
    assert_eq!(flows[0]["tag"], "BASE");
    Ok(())
}

#[test]
fn datalog_renders_without_solving() -> TestResult {
    let dir = tempfile::tempdir()?;
    let snapshot = write_pair(dir.path())?;
    let output = nod(&["datalog", "--snapshot", &snapshot])?;
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Query"));
    Ok(())
}

#[test]
fn unreadable_snapshots_fail_cleanly() -> TestResult {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("missing.json");
    let output = nod(&["acl-lines", "--snapshot", &missing.to_string_lossy()])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.json"));
    Ok(())
}
