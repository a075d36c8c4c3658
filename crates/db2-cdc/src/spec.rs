//! Connector specification

/// Describes the connector to the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// Connector name
    pub name: &'static str,
    /// One-line summary
    pub summary: &'static str,
    /// Longer description
    pub description: &'static str,
    /// Connector version
    pub version: &'static str,
}

/// The DB2 connector specification.
pub fn spec() -> Spec {
    Spec {
        name: "db2",
        summary: "DB2 source and destination connector",
        description: "Trigger-based change data capture source for DB2 tables \
                      (snapshot plus CDC with a resumable position) and a \
                      destination that applies record streams to a target table.",
        version: env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec() {
        let spec = spec();
        assert_eq!(spec.name, "db2");
        assert!(!spec.version.is_empty());
    }
}
