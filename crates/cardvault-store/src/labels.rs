//! Snapshot labels and instance naming rules.

use cardvault_common::{Error, Result};

/// Canonical pool of snapshot labels, in the order they are handed out.
pub const SNAPSHOT_LABELS: [&str; 17] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "phi", "chi", "psi", "tau", "pi", "rho",
    "sigma", "omega", "eta", "lambda", "kappa",
];

/// Longest accepted storage name.
pub const MAX_NAME_LEN: usize = 40;

/// Pick the first `retention` labels of the pool.
pub fn select(retention: usize) -> Result<Vec<String>> {
    if retention == 0 || retention > SNAPSHOT_LABELS.len() {
        return Err(Error::InvalidRetention {
            requested: retention,
            max: SNAPSHOT_LABELS.len(),
        });
    }
    Ok(SNAPSHOT_LABELS[..retention]
        .iter()
        .map(|label| (*label).to_string())
        .collect())
}

/// Validate a storage name.
///
/// The name is the root of a directory and several file names, so only
/// ASCII alphanumerics, `-` and `_` are accepted.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_name(
            name,
            format!("name is longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::invalid_name(
            name,
            format!("character '{c}' is not allowed"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_bounds() {
        assert_eq!(select(3).unwrap(), vec!["alpha", "beta", "gamma"]);
        assert_eq!(select(17).unwrap().len(), 17);
        assert!(matches!(
            select(0),
            Err(Error::InvalidRetention { requested: 0, .. })
        ));
        assert!(matches!(
            select(18),
            Err(Error::InvalidRetention {
                requested: 18,
                max: 17
            })
        ));
    }

    #[test]
    fn test_labels_unique() {
        let mut labels = SNAPSHOT_LABELS.to_vec();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), SNAPSHOT_LABELS.len());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("cache").is_ok());
        assert!(validate_name("prodUsers_2-a").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("users.db").is_err());
    }
}
