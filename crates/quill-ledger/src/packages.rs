//! Coin package catalog and package purchases.

use quill_db::queries::packages;
use quill_types::ledger::{CoinPackage, Transaction, TransactionType};
use quill_types::{Decimal, UserId, BASE_CURRENCY};

use crate::{Ledger, LedgerError, Result, TransactionMeta};

impl Ledger {
    /// Catalog listing, cheapest first.
    pub fn list_packages(&self, active_only: bool) -> Result<Vec<CoinPackage>> {
        self.db
            .with_conn(|conn| packages::list(conn, active_only).map_err(LedgerError::from))
    }

    /// Create or replace a catalog entry.
    pub fn upsert_package(&self, package: &CoinPackage) -> Result<()> {
        if package.id.trim().is_empty() {
            return Err(LedgerError::InvalidAmount("package id must not be empty".into()));
        }
        if package.coin_amount == 0 {
            return Err(LedgerError::InvalidAmount("package must grant coins".into()));
        }
        if package.bonus_percentage > 100 {
            return Err(LedgerError::InvalidAmount(format!(
                "bonus {}% exceeds 100%",
                package.bonus_percentage
            )));
        }
        if package.base_price_usd < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "negative price {}",
                package.base_price_usd
            )));
        }
        let now = self.clock.now();
        self.db
            .with_conn(|conn| packages::upsert(conn, package, now).map_err(LedgerError::from))?;
        tracing::info!(package_id = %package.id, coins = package.coin_amount, active = package.is_active, "coin package saved");
        Ok(())
    }

    /// Credit a package once the payment gateway reports the charge.
    ///
    /// `external_transaction_id` is the gateway's payment id; a replay returns
    /// the original credit.
    pub fn purchase_package(
        &self,
        user_id: &UserId,
        package_id: &str,
        external_transaction_id: &str,
    ) -> Result<Transaction> {
        let package = self
            .db
            .with_conn(|conn| packages::get(conn, package_id).map_err(LedgerError::from))?
            .ok_or_else(|| LedgerError::PackageNotFound(package_id.to_string()))?;

        // A replayed gateway notification is honoured even if the package has
        // since been retired.
        if let Some(existing) = self.find_by_idempotency_key(user_id, external_transaction_id)? {
            if existing.is_completed() {
                return Ok(existing);
            }
        }
        if !package.is_active {
            return Err(LedgerError::PackageInactive(package_id.to_string()));
        }

        let meta = TransactionMeta::default()
            .with_idempotency_key(external_transaction_id)
            .with_fiat(package.base_price_usd, BASE_CURRENCY)
            .with_description(package.name.clone());
        self.credit(user_id, package.total_coins(), TransactionType::CoinPurchase, meta)
    }
}
