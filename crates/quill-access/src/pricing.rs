//! Pricing policy: coin price and unlocking subscription tiers per content
//! type. Loaded from the `[pricing]` config section.

use std::collections::HashMap;

use quill_types::content::{ContentType, SubscriptionTier};
use serde::{Deserialize, Serialize};

use crate::{AccessError, Result};

/// Price of one content type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPrice {
    /// Coins charged per unlock. Zero makes the content free.
    pub coins: u64,
    /// Subscription tiers that unlock the content without a purchase.
    #[serde(default)]
    pub tiers: Vec<SubscriptionTier>,
}

impl ContentPrice {
    pub fn new(coins: u64, tiers: &[SubscriptionTier]) -> Self {
        Self {
            coins,
            tiers: tiers.to_vec(),
        }
    }

    pub fn unlocked_by(&self, tier: SubscriptionTier) -> bool {
        self.tiers.contains(&tier)
    }
}

/// Prices keyed by content type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingPolicy {
    prices: HashMap<ContentType, ContentPrice>,
}

impl PricingPolicy {
    pub fn new(prices: HashMap<ContentType, ContentPrice>) -> Self {
        Self { prices }
    }

    pub fn price(&self, content_type: ContentType) -> Result<&ContentPrice> {
        self.prices
            .get(&content_type)
            .ok_or(AccessError::ContentNotPriced(content_type))
    }

    /// Reject tier lists that unlock `free`.
    pub fn validate(&self) -> Result<()> {
        for (content_type, price) in &self.prices {
            if price.unlocked_by(SubscriptionTier::Free) {
                return Err(AccessError::InvalidPricing(format!(
                    "{content_type} cannot be unlocked by the free tier"
                )));
            }
        }
        Ok(())
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        use SubscriptionTier::{Basic, Premium, Vip};
        Self::new(HashMap::from([
            (ContentType::Chapter, ContentPrice::new(10, &[Basic, Premium, Vip])),
            (ContentType::Story, ContentPrice::new(100, &[Premium, Vip])),
            (ContentType::ExclusiveContent, ContentPrice::new(250, &[Vip])),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prices() {
        let policy = PricingPolicy::default();
        assert_eq!(policy.price(ContentType::Chapter).expect("chapter").coins, 10);
        assert!(policy
            .price(ContentType::Story)
            .expect("story")
            .unlocked_by(SubscriptionTier::Premium));
        assert!(!policy
            .price(ContentType::ExclusiveContent)
            .expect("exclusive")
            .unlocked_by(SubscriptionTier::Premium));
        policy.validate().expect("valid");
    }

    #[test]
    fn test_from_toml() {
        let policy: PricingPolicy = toml::from_str(
            r#"
            [chapter]
            coins = 5
            tiers = ["basic"]

            [story]
            coins = 0
            "#,
        )
        .expect("parse");
        assert_eq!(policy.price(ContentType::Chapter).expect("chapter").coins, 5);
        assert!(policy.price(ContentType::Story).expect("story").tiers.is_empty());
        assert!(matches!(
            policy.price(ContentType::ExclusiveContent),
            Err(AccessError::ContentNotPriced(ContentType::ExclusiveContent))
        ));
    }

    #[test]
    fn test_free_tier_rejected() {
        let policy = PricingPolicy::new(HashMap::from([(
            ContentType::Chapter,
            ContentPrice::new(10, &[SubscriptionTier::Free]),
        )]));
        assert!(policy.validate().is_err());
    }
}
