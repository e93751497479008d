//! Resource model: a published reusable capability (model/search/storage)
//! that leases are granted against.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ActorId, OfferId, ResourceId};

/// What capability the resource exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Model,
    Search,
    Storage,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "MODEL"),
            Self::Search => write!(f, "SEARCH"),
            Self::Storage => write!(f, "STORAGE"),
        }
    }
}

/// Lifecycle status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Draft,
    Published,
    Unpublished,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::Published => write!(f, "PUBLISHED"),
            Self::Unpublished => write!(f, "UNPUBLISHED"),
        }
    }
}

/// The unit a resource's price is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    Token,
    Call,
    Query,
    GbDay,
    Put,
    Get,
}

impl PriceUnit {
    /// The units each resource kind may be priced in.
    #[must_use]
    pub fn allowed_for(kind: ResourceKind) -> &'static [PriceUnit] {
        match kind {
            ResourceKind::Model => &[Self::Token, Self::Call],
            ResourceKind::Search => &[Self::Query],
            ResourceKind::Storage => &[Self::GbDay, Self::Put, Self::Get],
        }
    }

    #[must_use]
    pub fn valid_for(self, kind: ResourceKind) -> bool {
        Self::allowed_for(kind).contains(&self)
    }
}

impl std::fmt::Display for PriceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Call => write!(f, "call"),
            Self::Query => write!(f, "query"),
            Self::GbDay => write!(f, "gb_day"),
            Self::Put => write!(f, "put"),
            Self::Get => write!(f, "get"),
        }
    }
}

/// Metered price for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePrice {
    pub unit: PriceUnit,
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
}

/// Optional hard limits a provider places on resource use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_mime: Option<Vec<String>>,
}

/// A published reusable capability backed by an offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub provider: ActorId,
    pub offer_id: OfferId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_hash: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub price: ResourcePrice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<ResourcePolicy>,
    /// Bumped on every republish-in-place.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == ResourceStatus::Published
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }
}

/// Filter for resource listings.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub kind: Option<ResourceKind>,
    pub provider: Option<ActorId>,
    pub status: Option<ResourceStatus>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

impl ResourceFilter {
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if self.kind.is_some_and(|k| k != resource.kind) {
            return false;
        }
        if let Some(provider) = &self.provider {
            if !provider.matches(&resource.provider) {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != resource.status) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !resource.has_tag(tag) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_resource() -> Resource {
        let now = Utc::now();
        Resource {
            resource_id: ResourceId::new(),
            kind: ResourceKind::Model,
            status: ResourceStatus::Published,
            provider: ActorId::new("provider-1"),
            offer_id: OfferId::new(),
            offer_hash: None,
            label: "gpt-ish".into(),
            description: None,
            tags: Some(vec!["nlp".into()]),
            price: ResourcePrice {
                unit: PriceUnit::Token,
                amount: Decimal::new(1, 4),
                currency: "USDC".into(),
                token_address: None,
            },
            policy: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn price_units_per_kind() {
        assert!(PriceUnit::Token.valid_for(ResourceKind::Model));
        assert!(PriceUnit::Call.valid_for(ResourceKind::Model));
        assert!(!PriceUnit::Query.valid_for(ResourceKind::Model));
        assert!(PriceUnit::Query.valid_for(ResourceKind::Search));
        assert!(PriceUnit::GbDay.valid_for(ResourceKind::Storage));
        assert!(!PriceUnit::Token.valid_for(ResourceKind::Storage));
    }

    #[test]
    fn filter_by_kind_and_tag() {
        let resource = make_resource();
        let hit = ResourceFilter {
            kind: Some(ResourceKind::Model),
            tag: Some("nlp".into()),
            ..ResourceFilter::default()
        };
        let miss = ResourceFilter {
            kind: Some(ResourceKind::Search),
            ..ResourceFilter::default()
        };
        assert!(hit.matches(&resource));
        assert!(!miss.matches(&resource));
    }

    #[test]
    fn filter_provider_is_case_insensitive() {
        let resource = make_resource();
        let filter = ResourceFilter {
            provider: Some(ActorId::new("PROVIDER-1")),
            ..ResourceFilter::default()
        };
        assert!(filter.matches(&resource));
    }
}
