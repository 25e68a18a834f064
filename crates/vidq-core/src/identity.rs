//! Worker identities used to mark job ownership.
//!
//! The default identity is ephemeral: it embeds the process id, the start
//! time and a random suffix, so it never repeats across restarts. Orphan
//! recovery matches rows by identity, which means a restarted worker cannot
//! see the rows its previous incarnation left in `processing`. Slot
//! identities (`slot-0`, `slot-1`, ...) are stable across restarts and let
//! a replacement worker recover its predecessor's rows.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identity of a coordinator instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// A fresh identity unique to this process instantiation.
    pub fn ephemeral() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(format!("{}_{}_{}", std::process::id(), millis, suffix))
    }

    /// A stable identity for fleet slot `n`.
    pub fn slot(n: usize) -> Self {
        Self(format!("slot-{n}"))
    }

    /// Wrap an existing identity string (e.g. read back from a row).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity survives a restart.
    pub fn is_stable(&self) -> bool {
        self.0.starts_with("slot-")
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_format() {
        let id = WorkerId::ephemeral();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], std::process::id().to_string());
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
        assert!(!id.is_stable());
    }

    #[test]
    fn test_ephemeral_ids_differ() {
        assert_ne!(WorkerId::ephemeral(), WorkerId::ephemeral());
    }

    #[test]
    fn test_slot_is_stable() {
        let id = WorkerId::slot(0);
        assert_eq!(id.as_str(), "slot-0");
        assert_eq!(id, WorkerId::slot(0));
        assert!(id.is_stable());
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkerId::from_string("w-1").to_string(), "w-1");
    }
}
