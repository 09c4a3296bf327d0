use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::UnitKind;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// A campaign the battle belongs to.
    CampaignId
);
entity_id!(
    /// A battle session.
    BattleId
);
entity_id!(
    /// An account identity; the client only ever needs its own.
    UserId
);
entity_id!(
    /// A warband fielded by a participant.
    WarbandId
);
entity_id!(
    /// An entry in the append-only battle event log.
    EventId
);

/// Stable selection key for a prebattle unit, namespaced by kind:
/// `hero:<id>`, `hired_sword:<id>`, `henchman:<group>:<member>`,
/// `custom:<suffix>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitKey(String);

impl UnitKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn hero(id: i64) -> Self {
        Self(format!("hero:{id}"))
    }

    pub fn hired_sword(id: i64) -> Self {
        Self(format!("hired_sword:{id}"))
    }

    pub fn henchman(group_id: i64, member_id: i64) -> Self {
        Self(format!("henchman:{group_id}:{member_id}"))
    }

    pub fn custom(suffix: &str) -> Self {
        Self(format!("custom:{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind encoded in the key's namespace prefix, if recognized.
    pub fn kind(&self) -> Option<UnitKind> {
        let prefix = self.0.split(':').next()?;
        UnitKind::from_prefix(prefix)
    }

    pub fn is_custom(&self) -> bool {
        self.kind() == Some(UnitKind::Custom)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_key_kind_from_prefix() {
        assert_eq!(UnitKey::hero(3).kind(), Some(UnitKind::Hero));
        assert_eq!(UnitKey::hired_sword(9).kind(), Some(UnitKind::HiredSword));
        assert_eq!(UnitKey::henchman(2, 5).kind(), Some(UnitKind::Henchman));
        assert_eq!(UnitKey::custom("ab12").kind(), Some(UnitKind::Custom));
        assert_eq!(UnitKey::new("stray").kind(), None);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = BattleId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let key = UnitKey::hero(7);
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"hero:7\"");
    }
}
