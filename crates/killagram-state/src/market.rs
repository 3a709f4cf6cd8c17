use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use killagram_types::error::{CoreResult, NotFound, PolicyViolation};
use killagram_types::models::{Gift, MarketItem, MarketItemType, Transaction, UserGift};

use crate::lock;
use crate::locks::{KeyedGuard, KeyedLocks};

fn gift(id: &str, title: &str, rarity: &str, premium_only: bool) -> Gift {
    Gift {
        id: id.into(),
        title: title.into(),
        rarity: rarity.into(),
        image: format!("https://cdn.killagram/gifts/{}.png", title.to_lowercase()),
        premium_only,
    }
}

fn item(id: &str, title: &str, item_type: MarketItemType, price_stars: i64) -> MarketItem {
    MarketItem {
        id: id.into(),
        title: title.into(),
        item_type,
        price_stars,
    }
}

/// Gift and item catalog, owned gifts and the transaction ledger.
pub struct Market {
    gifts: Vec<Gift>,
    items: Vec<MarketItem>,
    inner: Mutex<MarketInner>,
    locks: KeyedLocks,
}

#[derive(Default)]
struct MarketInner {
    user_gifts: HashMap<String, Vec<UserGift>>,
    transactions: HashMap<String, Vec<Transaction>>,
}

impl Default for Market {
    fn default() -> Self {
        Self::with_catalog(
            vec![
                gift("gift_rose", "Rose", "common", false),
                gift("gift_phoenix", "Phoenix", "legendary", true),
            ],
            vec![
                item("premium_month", "Premium 1 month", MarketItemType::Premium, 50),
                item("gift_box", "Gift Box", MarketItemType::Gift, 20),
            ],
        )
    }
}

impl Market {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(gifts: Vec<Gift>, items: Vec<MarketItem>) -> Self {
        Self {
            gifts,
            items,
            inner: Mutex::new(MarketInner::default()),
            locks: KeyedLocks::new(),
        }
    }

    pub fn gifts(&self) -> &[Gift] {
        &self.gifts
    }

    pub fn items(&self) -> &[MarketItem] {
        &self.items
    }

    /// Catalog lookup with the premium gate applied.
    pub fn item_for(&self, item_id: &str, premium: bool) -> CoreResult<&MarketItem> {
        let item = self
            .items
            .iter()
            .find(|item| item.id == item_id)
            .ok_or(NotFound::Item)?;
        if item.item_type == MarketItemType::Plugin && !premium {
            return Err(PolicyViolation::PremiumMarketRequired.into());
        }
        Ok(item)
    }

    /// Serializes purchases of one user.
    pub async fn lock_user(&self, user: &str) -> KeyedGuard {
        self.locks.lock(user).await
    }

    // -- Gifts --

    pub fn give_gift(&self, gift_id: &str, owner: &str, premium: bool) -> CoreResult<UserGift> {
        let gift = self
            .gifts
            .iter()
            .find(|gift| gift.id == gift_id)
            .ok_or(NotFound::Gift)?;
        if gift.premium_only && !premium {
            return Err(PolicyViolation::PremiumRequired.into());
        }

        let row = UserGift {
            owner: owner.to_string(),
            gift_id: gift.id.clone(),
            acquired_at: Utc::now(),
        };
        lock(&self.inner)
            .user_gifts
            .entry(owner.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    pub fn user_gifts(&self, owner: &str) -> Vec<UserGift> {
        lock(&self.inner)
            .user_gifts
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    // -- Ledger --

    pub fn record_transaction(&self, transaction: Transaction) {
        lock(&self.inner)
            .transactions
            .entry(transaction.phone.clone())
            .or_default()
            .push(transaction);
    }

    pub fn transactions(&self, user: &str) -> Vec<Transaction> {
        lock(&self.inner)
            .transactions
            .get(user)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killagram_types::CoreError;

    #[test]
    fn premium_only_gift_needs_premium() {
        let market = Market::new();
        assert_eq!(
            market.give_gift("gift_phoenix", "+1", false).unwrap_err(),
            CoreError::Policy(PolicyViolation::PremiumRequired)
        );
        assert!(market.give_gift("gift_phoenix", "+1", true).is_ok());
        assert!(market.give_gift("gift_rose", "+1", false).is_ok());
        assert_eq!(market.user_gifts("+1").len(), 2);
        assert_eq!(
            market.give_gift("gift_unknown", "+1", true).unwrap_err(),
            CoreError::NotFound(NotFound::Gift)
        );
    }

    #[test]
    fn plugins_are_premium_market_items() {
        let market = Market::with_catalog(
            Vec::new(),
            vec![item("theme_plugin", "Themes", MarketItemType::Plugin, 10)],
        );
        assert_eq!(
            market.item_for("theme_plugin", false).unwrap_err(),
            CoreError::Policy(PolicyViolation::PremiumMarketRequired)
        );
        assert!(market.item_for("theme_plugin", true).is_ok());
        assert_eq!(
            market.item_for("nope", true).unwrap_err(),
            CoreError::NotFound(NotFound::Item)
        );
    }
}
