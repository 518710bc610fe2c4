use serde::{Deserialize, Serialize};
use std::fmt;

/// Holder, vendor or fee collector address.
///
/// Serialized as the bare address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Address that collects commissions and liquidation remainders unless
    /// the config names another.
    pub const DEFAULT_COMMISSIONS: &'static str = "commissions";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn commissions() -> Self {
        Self::new(Self::DEFAULT_COMMISSIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_bare_address() {
        let json = serde_json::to_string(&AccountId::from("0xabc:1")).unwrap();
        assert_eq!(json, "\"0xabc:1\"");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "0xabc:1");
    }

    #[test]
    fn test_default_commission_account() {
        assert_eq!(AccountId::commissions().to_string(), "commissions");
    }
}
