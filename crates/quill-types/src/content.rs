//! Monetized content and subscription descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseTagError;

/// Monetized content category. Pricing is configured per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Chapter,
    Story,
    ExclusiveContent,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::Chapter,
        ContentType::Story,
        ContentType::ExclusiveContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Chapter => "chapter",
            ContentType::Story => "story",
            ContentType::ExclusiveContent => "exclusive_content",
        }
    }
}

impl FromStr for ContentType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTagError::new("content type", s))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tier as reported by the user service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Premium,
    Vip,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Free,
        SubscriptionTier::Basic,
        SubscriptionTier::Premium,
        SubscriptionTier::Vip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Vip => "vip",
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTagError::new("subscription tier", s))
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's current subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tier: SubscriptionTier,
    /// Unix timestamp after which the subscription no longer grants access.
    pub expires_at: u64,
}

impl Subscription {
    pub fn is_active(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_tags() {
        assert_eq!(
            "exclusive_content".parse::<ContentType>().expect("parse"),
            ContentType::ExclusiveContent
        );
        assert!("podcast".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_subscription_expiry() {
        let sub = Subscription {
            tier: SubscriptionTier::Premium,
            expires_at: 100,
        };
        assert!(sub.is_active(99));
        assert!(!sub.is_active(100));
    }

    #[test]
    fn test_tier_serde() {
        let tier: SubscriptionTier = serde_json::from_str("\"vip\"").expect("parse");
        assert_eq!(tier, SubscriptionTier::Vip);
    }
}
