/// Subscription-tier quota engine
///
/// Tier defaults, per-user override resolution, live usage counting, and the
/// admission decision that gates every resource creation.

pub mod enforcer;
pub mod resolver;
pub mod tiers;
pub mod usage;

pub use enforcer::{QuotaDecision, QuotaEnforcer, QuotaSummary};
pub use resolver::QuotaOverrides;
pub use tiers::{ResourceKind, SubscriptionTier, TierCatalog, TierId};
