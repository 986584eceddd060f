use serde::Serialize;

/// Limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Snapshot of a user's token allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub allowed: bool,
    pub used: i64,
    pub limit: i64,
}

impl Capacity {
    pub fn unlimited(used: i64) -> Self {
        Self {
            allowed: true,
            used,
            limit: UNLIMITED,
        }
    }

    /// Capacity under a finite limit.
    pub fn limited(used: i64, limit: i64) -> Self {
        Self {
            allowed: limit == UNLIMITED || used < limit,
            used,
            limit,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == UNLIMITED
    }

    /// An unlimited allowance always admits, whatever `allowed` says.
    pub fn has_capacity(&self) -> bool {
        self.is_unlimited() || self.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_capacity() {
        assert!(Capacity::limited(99, 100).has_capacity());
        assert!(!Capacity::limited(100, 100).has_capacity());
        assert!(Capacity::limited(5_000, UNLIMITED).has_capacity());
    }

    #[test]
    fn test_unlimited_overrides_denied_flag() {
        let capacity = Capacity {
            allowed: false,
            used: 10,
            limit: UNLIMITED,
        };
        assert!(capacity.has_capacity());
    }
}
