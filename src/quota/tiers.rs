/// Subscription tier catalog
///
/// Static table of per-tier creation ceilings. Changing a value here is a
/// deployment, not a data migration.
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of user-created resources subject to tier limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Products,
    AudioFiles,
    Playlists,
    QrCodes,
    Slideshows,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Products,
        ResourceKind::AudioFiles,
        ResourceKind::Playlists,
        ResourceKind::QrCodes,
        ResourceKind::Slideshows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Products => "products",
            ResourceKind::AudioFiles => "audio_files",
            ResourceKind::Playlists => "playlists",
            ResourceKind::QrCodes => "qr_codes",
            ResourceKind::Slideshows => "slideshows",
        }
    }

    /// Table holding the live rows of this kind
    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Name used in user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ResourceKind::Products => "products",
            ResourceKind::AudioFiles => "audio files",
            ResourceKind::Playlists => "playlists",
            ResourceKind::QrCodes => "QR codes",
            ResourceKind::Slideshows => "slideshows",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngineError::Validation(format!("Unknown resource kind: {}", s)))
    }
}

/// Subscription tier identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    Free,
    Basic,
    Premium,
}

impl TierId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierId::Free => "free",
            TierId::Basic => "basic",
            TierId::Premium => "premium",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierId {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "free" => Ok(TierId::Free),
            "basic" => Ok(TierId::Basic),
            "premium" => Ok(TierId::Premium),
            _ => Err(EngineError::Validation(format!("Unknown subscription tier: {}", s))),
        }
    }
}

/// Default creation ceilings for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub max_products: i64,
    pub max_audio_files: i64,
    pub max_playlists: i64,
    pub max_qr_codes: i64,
    pub max_slideshows: i64,
}

impl TierLimits {
    pub fn limit_for(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Products => self.max_products,
            ResourceKind::AudioFiles => self.max_audio_files,
            ResourceKind::Playlists => self.max_playlists,
            ResourceKind::QrCodes => self.max_qr_codes,
            ResourceKind::Slideshows => self.max_slideshows,
        }
    }
}

/// A catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTier {
    pub id: TierId,
    pub limits: TierLimits,
    pub can_edit_playlists: bool,
}

const CATALOG: [SubscriptionTier; 3] = [
    SubscriptionTier {
        id: TierId::Free,
        limits: TierLimits {
            max_products: 1,
            max_audio_files: 3,
            max_playlists: 1,
            max_qr_codes: 1,
            max_slideshows: 1,
        },
        can_edit_playlists: false,
    },
    SubscriptionTier {
        id: TierId::Basic,
        limits: TierLimits {
            max_products: 10,
            max_audio_files: 25,
            max_playlists: 5,
            max_qr_codes: 10,
            max_slideshows: 5,
        },
        can_edit_playlists: true,
    },
    SubscriptionTier {
        id: TierId::Premium,
        limits: TierLimits {
            max_products: 100,
            max_audio_files: 250,
            max_playlists: 50,
            max_qr_codes: 100,
            max_slideshows: 50,
        },
        can_edit_playlists: true,
    },
];

/// Read-only tier lookup
pub struct TierCatalog;

impl TierCatalog {
    pub fn lookup(id: TierId) -> &'static SubscriptionTier {
        match id {
            TierId::Free => &CATALOG[0],
            TierId::Basic => &CATALOG[1],
            TierId::Premium => &CATALOG[2],
        }
    }

    pub fn all() -> &'static [SubscriptionTier] {
        &CATALOG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_returns_matching_entry() {
        for tier in TierCatalog::all() {
            assert_eq!(TierCatalog::lookup(tier.id).id, tier.id);
        }
    }

    #[test]
    fn test_free_tier_defaults() {
        let free = TierCatalog::lookup(TierId::Free);
        assert_eq!(free.limits.limit_for(ResourceKind::Products), 1);
        assert!(!free.can_edit_playlists);
    }

    #[test]
    fn test_higher_tiers_never_lower_a_limit() {
        let free = TierCatalog::lookup(TierId::Free);
        let basic = TierCatalog::lookup(TierId::Basic);
        let premium = TierCatalog::lookup(TierId::Premium);
        for kind in ResourceKind::ALL {
            assert!(free.limits.limit_for(kind) <= basic.limits.limit_for(kind));
            assert!(basic.limits.limit_for(kind) <= premium.limits.limit_for(kind));
        }
    }

    #[test]
    fn test_parse_kinds_and_tiers() {
        assert_eq!("qr_codes".parse::<ResourceKind>().unwrap(), ResourceKind::QrCodes);
        assert!("videos".parse::<ResourceKind>().is_err());
        assert_eq!("Premium".parse::<TierId>().unwrap(), TierId::Premium);
        assert!("platinum".parse::<TierId>().is_err());
    }
}
