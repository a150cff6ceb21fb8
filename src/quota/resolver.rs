/// Effective limit resolution: per-user overrides layered over tier defaults
use super::tiers::{ResourceKind, TierCatalog};
use crate::error::{EngineError, EngineResult};
use crate::users::UserRecord;
use serde::{Deserialize, Serialize};

/// Administrator-set ceilings that replace the tier default for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaOverrides {
    pub max_products: Option<i64>,
    pub max_audio_files: Option<i64>,
    pub max_playlists: Option<i64>,
    pub max_qr_codes: Option<i64>,
    pub max_slideshows: Option<i64>,
}

impl QuotaOverrides {
    pub fn get(&self, kind: ResourceKind) -> Option<i64> {
        match kind {
            ResourceKind::Products => self.max_products,
            ResourceKind::AudioFiles => self.max_audio_files,
            ResourceKind::Playlists => self.max_playlists,
            ResourceKind::QrCodes => self.max_qr_codes,
            ResourceKind::Slideshows => self.max_slideshows,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        for kind in ResourceKind::ALL {
            if let Some(limit) = self.get(kind) {
                if limit < 0 {
                    return Err(EngineError::Validation(format!(
                        "Override for {} cannot be negative",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }
}

pub struct QuotaResolver;

impl QuotaResolver {
    /// An override, when present, replaces the tier default outright.
    pub fn resolve(user: &UserRecord, kind: ResourceKind) -> i64 {
        user.overrides
            .get(kind)
            .unwrap_or_else(|| TierCatalog::lookup(user.tier).limits.limit_for(kind))
    }

    /// Boolean tier flags have no per-user override.
    pub fn can_edit_playlists(user: &UserRecord) -> bool {
        TierCatalog::lookup(user.tier).can_edit_playlists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::TierId;
    use chrono::Utc;

    fn user(tier: TierId, overrides: QuotaOverrides) -> UserRecord {
        UserRecord {
            id: "user-1".to_string(),
            tier,
            overrides,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tier_default_without_override() {
        let u = user(TierId::Basic, QuotaOverrides::default());
        assert_eq!(QuotaResolver::resolve(&u, ResourceKind::Products), 10);
    }

    #[test]
    fn test_override_replaces_free_default() {
        let u = user(
            TierId::Free,
            QuotaOverrides {
                max_products: Some(5),
                ..Default::default()
            },
        );
        assert_eq!(QuotaResolver::resolve(&u, ResourceKind::Products), 5);
        // Other kinds keep the tier default
        assert_eq!(QuotaResolver::resolve(&u, ResourceKind::AudioFiles), 3);
    }

    #[test]
    fn test_override_may_lower_the_limit() {
        let u = user(
            TierId::Premium,
            QuotaOverrides {
                max_slideshows: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(QuotaResolver::resolve(&u, ResourceKind::Slideshows), 0);
    }

    #[test]
    fn test_playlist_editing_follows_tier() {
        assert!(!QuotaResolver::can_edit_playlists(&user(TierId::Free, QuotaOverrides::default())));
        assert!(QuotaResolver::can_edit_playlists(&user(TierId::Basic, QuotaOverrides::default())));
    }

    #[test]
    fn test_negative_override_rejected() {
        let overrides = QuotaOverrides {
            max_qr_codes: Some(-1),
            ..Default::default()
        };
        assert!(matches!(overrides.validate(), Err(EngineError::Validation(_))));
    }
}
