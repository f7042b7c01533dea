//! System-level network programming.
//!
//! Thin wrappers over `ip`, `tc`, `iptables`, and the FRR init script. The
//! agent runs inside a privileged sandbox where these tools exist; in
//! dry-run mode (tests, unprivileged development) every operation succeeds
//! without touching the host.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

async fn run(program: &str, args: &[&str]) -> Result<()> {
    debug!("exec: {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("spawning {}", program))?;
    if !status.success() {
        bail!("{} {} exited with {}", program, args.join(" "), status);
    }
    Ok(())
}

/// Create the interface if missing and assign its address. Existing
/// identical addressing is a no-op at the caller's level, so this only
/// runs for genuinely new or changed interfaces.
pub async fn ensure_interface(name: &str, ip: &str, prefix_len: u8) -> Result<()> {
    if !Path::new(&format!("/sys/class/net/{}", name)).exists() {
        run("ip", &["link", "add", name, "type", "dummy"]).await?;
        run("ip", &["link", "set", name, "up"]).await?;
    }
    // Flush first so re-addressing does not accumulate aliases.
    run("ip", &["addr", "flush", "dev", name]).await.ok();
    run(
        "ip",
        &["addr", "add", &format!("{}/{}", ip, prefix_len), "dev", name],
    )
    .await
}

pub async fn set_interface_state(name: &str, up: bool) -> Result<()> {
    run(
        "ip",
        &["link", "set", name, if up { "up" } else { "down" }],
    )
    .await
}

/// Program egress delay shaping on an interface. Removes any previous
/// qdisc first; a delete failure only means none existed.
pub async fn apply_delay(interface: &str, delay_ms: f64) -> Result<()> {
    if let Err(e) = run("tc", &["qdisc", "del", "dev", interface, "root"]).await {
        debug!("no existing qdisc on {}: {}", interface, e);
    }
    run(
        "tc",
        &[
            "qdisc",
            "add",
            "dev",
            interface,
            "root",
            "netem",
            "delay",
            &format!("{}ms", delay_ms),
        ],
    )
    .await
}

pub async fn set_default_route(via: &str) -> Result<()> {
    if let Err(e) = run("ip", &["route", "del", "default"]).await {
        debug!("no previous default route: {}", e);
    }
    run("ip", &["route", "add", "default", "via", via]).await
}

/// Forwarding policy for ground stations and vessels: only traffic toward
/// the satellite link supernet and the node's own uplink peers may transit.
/// Defence in depth next to the OSPF distribute-list.
pub async fn enforce_station_isolation(link_supernet: &str, uplink_peers: &[String]) -> Result<()> {
    run("iptables", &["-F", "FORWARD"]).await?;
    run(
        "iptables",
        &["-A", "FORWARD", "-d", link_supernet, "-j", "ACCEPT"],
    )
    .await?;
    for peer in uplink_peers {
        run("iptables", &["-A", "FORWARD", "-d", peer, "-j", "ACCEPT"]).await?;
    }
    run("iptables", &["-A", "FORWARD", "-j", "DROP"]).await
}

/// Ping one packet with a one-second deadline; returns the RTT in ms.
pub async fn ping(target: &str) -> Result<f64> {
    let output = Command::new("ping")
        .args(["-c", "1", "-W", "1", target])
        .output()
        .await
        .context("spawning ping")?;
    if !output.status.success() {
        bail!("ping {} failed", target);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let rtt = stdout
        .split("time=")
        .nth(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(rtt)
}

/// FRR daemon liveness via pid files.
pub fn frr_service_alive(service: &str) -> bool {
    Path::new(&format!("/var/run/frr/{}.pid", service)).exists()
}

pub async fn reload_frr() -> Result<()> {
    run("/usr/lib/frr/frrinit.sh", &["reload"]).await
}

/// Write routing-config files atomically: temp file in the same directory,
/// then rename over the target.
pub fn write_config_files(
    dir: &Path,
    files: &std::collections::HashMap<String, String>,
) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (filename, content) in files {
        if filename.contains('/') || filename.contains("..") {
            bail!("refusing config filename {:?}", filename);
        }
        let target = dir.join(filename);
        let tmp = dir.join(format!(".{}.tmp", filename));
        std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &target)
            .with_context(|| format!("renaming into {}", target.display()))?;
        debug!("wrote {} ({} bytes)", target.display(), content.len());
    }
    Ok(())
}

/// Diagnostics allow-list for `/execute`.
pub async fn execute_diagnostic(command: &str) -> Result<(bool, String, String, i32)> {
    let mut parts = command.split_whitespace();
    let base = match parts.next() {
        Some(b) => b,
        None => bail!("no command specified"),
    };
    let rest: Vec<&str> = parts.collect();

    let (program, prefix): (&str, Vec<&str>) = match base {
        "ping" => ("ping", vec!["-c", "4"]),
        "traceroute" => ("traceroute", vec![]),
        "ip" => ("ip", vec!["route"]),
        other => bail!("command {:?} not allowed", other),
    };

    let mut args = prefix;
    if base != "ip" {
        args.extend(rest);
    }

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        Command::new(program).args(&args).output(),
    )
    .await
    .context("diagnostic timed out")?
    .with_context(|| format!("spawning {}", program))?;

    let code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        warn!("diagnostic {:?} exited with {}", command, code);
    }
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        code,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_files_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = HashMap::new();
        files.insert("frr.conf".to_string(), "router ospf\n".to_string());
        files.insert("daemons".to_string(), "ospfd=yes\n".to_string());

        write_config_files(dir.path(), &files).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("frr.conf")).unwrap(),
            "router ospf\n"
        );
        // No temp droppings left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn config_filenames_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = HashMap::new();
        files.insert("../evil".to_string(), "x".to_string());
        assert!(write_config_files(dir.path(), &files).is_err());
    }

    #[tokio::test]
    async fn execute_rejects_unlisted_commands() {
        assert!(execute_diagnostic("rm -rf /").await.is_err());
        assert!(execute_diagnostic("").await.is_err());
    }
}
