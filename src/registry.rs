use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ledger::Address;

/// Every address that has ever staked, in first-stake order.
///
/// Entries are never removed: the registry records participation history,
/// not current status. It is the iteration source for reward distribution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StakerRegistry {
    order: Vec<Address>,
    index: BTreeSet<Address>,
}

impl StakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `address` unless already present. Returns whether it was new.
    pub fn register(&mut self, address: &Address) -> bool {
        if !self.index.insert(address.clone()) {
            return false;
        }
        self.order.push(address.clone());
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.order
    }
}

impl Serialize for StakerRegistry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.order.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StakerRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let order = Vec::<Address>::deserialize(deserializer)?;
        let mut registry = StakerRegistry::new();
        for address in &order {
            if !registry.register(address) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate staker {address} in registry"
                )));
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_keeps_order() {
        let mut registry = StakerRegistry::new();
        assert!(registry.register(&"carol".into()));
        assert!(registry.register(&"alice".into()));
        assert!(!registry.register(&"carol".into()));
        assert!(registry.register(&"bob".into()));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.as_slice(), ["carol", "alice", "bob"]);
        assert!(registry.contains("alice"));
        assert!(!registry.contains("dave"));
    }

    #[test]
    fn deserializing_rejects_duplicates() {
        let ok: StakerRegistry = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<StakerRegistry>(r#"["a","b","a"]"#).is_err());
    }
}
