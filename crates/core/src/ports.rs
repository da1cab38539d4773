//! Forward-port normalization (§6.5)
//!
//! Turns a configuration's `forwardPorts` entries into `-p` argument values
//! for the Launch Controller's start-argument assembly. Integers are
//! loopback-bound by default; strings pass through as already-opaque
//! `host:container` or `ip:host:container` specifications.

use crate::config::ForwardPort;
use crate::errors::{DockerError, Result};

/// Normalize one `forwardPorts` entry into a `-p`-ready specification
/// string (Testable Property 9).
pub fn normalize(entry: &ForwardPort) -> Result<String> {
    match entry {
        ForwardPort::Port(port) => {
            if *port == 0 {
                return Err(DockerError::BadPortSpec {
                    kind: "forwardPorts".to_string(),
                    details: "port 0 is out of range 1..65535".to_string(),
                }
                .into());
            }
            Ok(format!("127.0.0.1:{port}:{port}"))
        }
        ForwardPort::Spec(spec) => Ok(spec.clone()),
    }
}

/// Normalize a full `forwardPorts` list into ordered `-p` spec strings.
pub fn normalize_all(entries: &[ForwardPort]) -> Result<Vec<String>> {
    entries.iter().map(normalize).collect()
}

/// Build `-p <spec>` flag pairs from already-normalized `forwardPorts`
/// entries, followed by the caller's explicit port mappings so they
/// override (§4.K step 7).
pub fn port_args(forward_ports: &[String], explicit: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity((forward_ports.len() + explicit.len()) * 2);
    for spec in forward_ports.iter().chain(explicit.iter()) {
        args.push("-p".to_string());
        args.push(spec.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_normalizes_to_loopback_triplet() {
        assert_eq!(normalize(&ForwardPort::Port(33001)).unwrap(), "127.0.0.1:33001:33001");
    }

    #[test]
    fn string_passes_through() {
        assert_eq!(normalize(&ForwardPort::Spec("33004:33005".to_string())).unwrap(), "33004:33005");
        assert_eq!(
            normalize(&ForwardPort::Spec("127.0.0.1:33006:33006".to_string())).unwrap(),
            "127.0.0.1:33006:33006"
        );
    }

    #[test]
    fn s6_forward_ports_scenario() {
        let entries = vec![
            ForwardPort::Port(33001),
            ForwardPort::Spec("33004:33005".to_string()),
            ForwardPort::Spec("127.0.0.1:33006:33006".to_string()),
        ];
        let normalized = normalize_all(&entries).unwrap();
        let args = port_args(&normalized, &[]);
        assert_eq!(
            args,
            vec![
                "-p", "127.0.0.1:33001:33001",
                "-p", "33004:33005",
                "-p", "127.0.0.1:33006:33006",
            ]
        );
    }

    #[test]
    fn explicit_ports_appended_after_forward_ports() {
        let args = port_args(&["127.0.0.1:1:1".to_string()], &["2:2".to_string()]);
        assert_eq!(args, vec!["-p", "127.0.0.1:1:1", "-p", "2:2"]);
    }
}
