use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = switchboard_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A live transport connection, unique for the process lifetime.
    pub const CONNECTION: &str = "conn";
    /// Correlation id minted when an inbound envelope carried none.
    pub const SYNTHETIC_CORRELATION: &str = "unc";
    /// One engine process participating in the distributed bridge.
    pub const NODE: &str = "node";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid(prefix::CONNECTION);
        assert!(id.starts_with("conn_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 5 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid(prefix::NODE);
        let b = prefixed_ulid(prefix::NODE);
        assert_ne!(a, b);
    }
}
