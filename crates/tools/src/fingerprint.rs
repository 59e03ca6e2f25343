//! Approval fingerprints.
//!
//! An approval is bound to a content fingerprint, not just a requirement
//! id: if the planner retries with a subtly different command, the hash
//! changes and the stale approval no longer applies. The command is
//! trimmed identically on the suspend and replay paths so whitespace
//! noise cannot defeat the match.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Deterministic hash over everything an approval covers.
pub fn approval_fingerprint(
    tool_name: &str,
    call_id: &str,
    command: &str,
    workspace_root: &Path,
    timeout_secs: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(call_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(command.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(workspace_root.to_string_lossy().as_bytes());
    hasher.update(b"\n");
    hasher.update(timeout_secs.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fp(command: &str) -> String {
        approval_fingerprint("bash", "call-1", command, &PathBuf::from("/ws"), 30)
    }

    #[test]
    fn identical_inputs_identical_fingerprints() {
        assert_eq!(fp("rm -rf /tmp/x"), fp("rm -rf /tmp/x"));
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(fp("rm -rf /tmp/x"), fp("  rm -rf /tmp/x \n"));
    }

    #[test]
    fn any_field_change_changes_the_hash() {
        let base = fp("rm -rf /tmp/x");
        assert_ne!(base, fp("rm -rf /tmp/y"));
        assert_ne!(
            base,
            approval_fingerprint("bash", "call-2", "rm -rf /tmp/x", &PathBuf::from("/ws"), 30)
        );
        assert_ne!(
            base,
            approval_fingerprint("shell", "call-1", "rm -rf /tmp/x", &PathBuf::from("/ws"), 30)
        );
        assert_ne!(
            base,
            approval_fingerprint("bash", "call-1", "rm -rf /tmp/x", &PathBuf::from("/other"), 30)
        );
        assert_ne!(
            base,
            approval_fingerprint("bash", "call-1", "rm -rf /tmp/x", &PathBuf::from("/ws"), 31)
        );
    }

    #[test]
    fn output_is_hex_sha256() {
        let hash = fp("ls");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
