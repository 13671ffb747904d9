//! Two real daemons talking over link-local multicast between network
//! namespaces. Skipped unless the namespace environment is up and
//! `rallyd` has been built.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

pub const NS_A: &str = "rally-a";
pub const NS_B: &str = "rally-b";
pub const VETH_A: &str = "veth-a";
pub const VETH_B: &str = "veth-b";

const API_PORT: u16 = 9101;

/// Run a command inside a network namespace.
/// Returns stdout as a String on success, error on non-zero exit.
pub fn netns_exec(ns: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("ip")
        .args(["netns", "exec", ns])
        .args(args)
        .output()
        .with_context(|| format!("failed to run: ip netns exec {ns} {args:?}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        bail!(
            "command failed in {ns}: {args:?}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    }
}

pub fn netns_available() -> bool {
    Command::new("ip")
        .args(["netns", "exec", NS_A, "ip", "link", "show"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn rallyd_bin() -> PathBuf {
    std::env::var_os("RALLYD_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/rallyd")
        })
}

/// Kills the daemon when dropped.
struct Daemon(Child);

impl Drop for Daemon {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

fn spawn_daemon(ns: &str, iface: &str, scratch: &std::path::Path) -> Result<Daemon> {
    let home = scratch.join(ns);
    std::fs::create_dir_all(&home)?;
    let child = Command::new("ip")
        .args(["netns", "exec", ns])
        .arg(rallyd_bin())
        .arg(iface)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start rallyd in {ns}"))?;
    Ok(Daemon(child))
}

fn api_get(ns: &str, path: &str) -> Result<serde_json::Value> {
    let url = format!("http://127.0.0.1:{API_PORT}/api{path}");
    let body = netns_exec(ns, &["curl", "-sf", &url])?;
    serde_json::from_str(&body).context("daemon returned invalid JSON")
}

/// Poll `path` until `ready` accepts the response or `within` elapses.
fn poll_api(
    ns: &str,
    path: &str,
    within: Duration,
    ready: impl Fn(&serde_json::Value) -> bool,
) -> Result<serde_json::Value> {
    let deadline = Instant::now() + within;
    loop {
        if let Ok(value) = api_get(ns, path) {
            if ready(&value) {
                return Ok(value);
            }
        }
        if Instant::now() >= deadline {
            bail!("{ns}{path} not ready after {within:?}");
        }
        std::thread::sleep(Duration::from_millis(250));
    }
}

#[test]
fn test_daemons_discover_each_other() {
    if !netns_available() || !rallyd_bin().exists() {
        eprintln!("SKIP: netns or rallyd binary not available, run sudo ./scripts/netns-up.sh and build rallyd first");
        return;
    }

    let scratch = std::env::temp_dir().join(format!("rally-netns-{}", std::process::id()));
    let _a = spawn_daemon(NS_A, VETH_A, &scratch).unwrap();
    let _b = spawn_daemon(NS_B, VETH_B, &scratch).unwrap();

    let peers = poll_api(NS_A, "/peers", Duration::from_secs(20), |v| v["active"] == 1).unwrap();
    println!("{peers}");
    poll_api(NS_B, "/peers", Duration::from_secs(20), |v| v["active"] == 1).unwrap();

    let latency = poll_api(NS_A, "/latency", Duration::from_secs(10), |v| {
        v["echoesReceived"].as_u64().unwrap_or(0) > 0
    })
    .unwrap();
    assert!(latency["averageMs"].is_number());

    let _ = std::fs::remove_dir_all(&scratch);
}
