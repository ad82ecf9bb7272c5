//! Order construction, submission, and local lifecycle tracking
//!
//! The manager validates order parameters against the market before any
//! network traffic, signs via the wallet path, submits through the REST
//! client, and then tracks each order through a forward-only status
//! machine fed by server responses and realtime order/trade events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use clob_core::{ClobError, ClobResult, Market, OrderSpec, OrderStatus, OrderType, TrackedOrder};

use crate::client::ClobRestClient;
use crate::types::{OpenOrderResponse, SignedOrder, WireOrder};

/// USDC and outcome tokens both use 6 decimals on chain
const TOKEN_SCALE: u32 = 6;

/// Terminal orders are kept for queries this long before eviction
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Status/fill update extracted from a realtime order or trade event
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: Option<OrderStatus>,
    /// Cumulative matched size, when the event carries one
    pub filled_size: Option<Decimal>,
}

/// Tracks orders submitted through this process
///
/// Local state only changes on confirmed server responses or feed events;
/// optimistic transitions are never applied.
pub struct OrderManager {
    client: Arc<ClobRestClient>,
    orders: RwLock<HashMap<String, TrackedOrder>>,
    retention: Duration,
}

impl OrderManager {
    pub fn new(client: Arc<ClobRestClient>) -> Self {
        Self::with_retention(client, DEFAULT_RETENTION)
    }

    /// Manager with a custom terminal-order retention window
    pub fn with_retention(client: Arc<ClobRestClient>, retention: Duration) -> Self {
        Self {
            client,
            orders: RwLock::new(HashMap::new()),
            retention,
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate, sign, and submit an order
    ///
    /// All parameter validation happens before any network call; a spec
    /// that fails validation never leaves the process. Without a wallet
    /// this fails with `SigningUnavailable` and nothing is tracked.
    #[instrument(skip(self, market), fields(token_id = %spec.token_id, side = %spec.side.as_str()))]
    pub async fn submit_order(&self, spec: &OrderSpec, market: &Market) -> ClobResult<TrackedOrder> {
        validate_spec(spec, market)?;

        let credentials = self.client.credentials();
        let maker = credentials
            .wallet_address()
            .ok_or_else(|| ClobError::signing_unavailable("wallet not configured"))?
            .parse::<Address>()
            .map_err(|e| ClobError::internal(format!("bad wallet address: {}", e)))?;

        let wire = build_wire_order(spec, maker)?;
        let signature = self.client.signer().sign_order(&wire, market.neg_risk).await?;
        let signed = SignedOrder {
            order: wire,
            signature,
        };

        let client_id = Uuid::new_v4().to_string();
        let response = self
            .client
            .post_order(signed, spec.order_type.as_str())
            .await?;

        if !response.success {
            let reason = response
                .error_msg
                .unwrap_or_else(|| "order rejected without reason".to_string());
            // The exchange reports a resubmitted order as an error; the
            // original is already resting, so surface it instead of failing.
            if reason.to_ascii_lowercase().contains("already") {
                if let Some(order_id) = &response.order_id {
                    if let Some(existing) = self.resolve_duplicate(order_id).await {
                        info!(order_id, "duplicate submission, returning resting order");
                        return Ok(existing);
                    }
                }
            }
            warn!(%reason, "order rejected");
            return Err(ClobError::rejected(reason));
        }

        let mut tracked = TrackedOrder::from_spec(client_id, spec);
        tracked.order_id = response.order_id.clone();
        if let Some(status) = response
            .status
            .as_deref()
            .and_then(OrderStatus::from_remote)
        {
            if tracked.status.can_transition_to(status) {
                tracked.status = status;
            }
            if status == OrderStatus::Filled {
                tracked.filled_size = tracked.size;
            }
        }
        tracked.updated_at = Utc::now();

        let key = tracked
            .order_id
            .clone()
            .unwrap_or_else(|| tracked.client_id.clone());
        info!(order_id = %key, status = ?tracked.status, "order accepted");
        self.orders.write().insert(key, tracked.clone());
        Ok(tracked)
    }

    /// Find the resting order behind a duplicate-submission rejection.
    /// Untracked ids (a prior session's order) are adopted from the server.
    async fn resolve_duplicate(&self, order_id: &str) -> Option<TrackedOrder> {
        if let Some(existing) = self.orders.read().get(order_id).cloned() {
            return Some(existing);
        }
        match self.client.get_order(order_id).await {
            Ok(remote) => {
                self.reconcile(&remote);
                self.orders.read().get(order_id).cloned()
            }
            Err(e) => {
                warn!(order_id, %e, "duplicate order could not be adopted");
                None
            }
        }
    }

    // ========================================================================
    // Cancellation and queries
    // ========================================================================

    /// Cancel a resting order; a no-op when it is already terminal
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: &str) -> ClobResult<TrackedOrder> {
        if let Some(existing) = self.orders.read().get(order_id) {
            if existing.status.is_terminal() {
                debug!(order_id, status = ?existing.status, "cancel is a no-op, order terminal");
                return Ok(existing.clone());
            }
        }

        self.client.cancel_order(order_id).await?;

        let mut orders = self.orders.write();
        let order = match orders.get_mut(order_id) {
            Some(order) => {
                if order.status.can_transition_to(OrderStatus::Cancelled) {
                    order.status = OrderStatus::Cancelled;
                    order.updated_at = Utc::now();
                }
                order.clone()
            }
            // Cancelled an order this process never tracked; report what we know
            None => {
                return Err(ClobError::not_found(format!(
                    "order {} cancelled but not tracked locally",
                    order_id
                )))
            }
        };
        info!(order_id, "order cancelled");
        Ok(order)
    }

    /// Cancel every non-terminal tracked order, returning the ids that
    /// were cancelled; failures are logged and skipped
    #[instrument(skip(self))]
    pub async fn cancel_all(&self) -> ClobResult<Vec<String>> {
        let open: Vec<String> = self
            .orders
            .read()
            .iter()
            .filter(|(_, o)| !o.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut cancelled = Vec::with_capacity(open.len());
        for order_id in open {
            match self.cancel_order(&order_id).await {
                Ok(_) => cancelled.push(order_id),
                Err(e) => warn!(order_id, %e, "cancel failed, continuing"),
            }
        }
        Ok(cancelled)
    }

    /// Local view of an order, reconciled with the server when stale
    ///
    /// Non-terminal orders whose last update is older than `max_age` are
    /// refreshed from `GET /data/order/{id}` before returning.
    pub async fn order_status(&self, order_id: &str, max_age: Duration) -> ClobResult<TrackedOrder> {
        let stale = {
            let orders = self.orders.read();
            match orders.get(order_id) {
                Some(order) if order.status.is_terminal() => return Ok(order.clone()),
                Some(order) => {
                    let age = Utc::now() - order.updated_at;
                    age.to_std().map(|a| a > max_age).unwrap_or(true)
                }
                None => true,
            }
        };

        if stale {
            let remote = self.client.get_order(order_id).await?;
            self.reconcile(&remote);
        }

        self.orders
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ClobError::not_found(format!("order {} not tracked", order_id)))
    }

    /// Open orders on the server, merged into local tracking
    #[instrument(skip(self))]
    pub async fn list_active_orders(&self) -> ClobResult<Vec<TrackedOrder>> {
        self.evict_expired(self.retention);
        let remote = self.client.get_open_orders().await?;
        for order in &remote {
            self.reconcile(order);
        }
        Ok(self
            .orders
            .read()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    /// Whether each tracked open order currently earns liquidity scoring
    pub async fn check_order_scoring(
        &self,
        order_ids: &[String],
    ) -> ClobResult<HashMap<String, bool>> {
        self.client.check_order_scoring(order_ids).await
    }

    /// Snapshot of every tracked order, terminal ones included
    pub fn tracked_orders(&self) -> Vec<TrackedOrder> {
        self.orders.read().values().cloned().collect()
    }

    // ========================================================================
    // Event application
    // ========================================================================

    /// Apply a realtime order/trade update
    ///
    /// Backward transitions and unknown orders are logged and ignored;
    /// cumulative fills never decrease.
    pub fn apply_update(&self, update: &OrderUpdate) {
        self.evict_expired(self.retention);
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&update.order_id) else {
            debug!(order_id = %update.order_id, "update for untracked order ignored");
            return;
        };

        let mut changed = false;
        if let Some(filled) = update.filled_size {
            if filled > order.filled_size {
                order.filled_size = filled.min(order.size);
                changed = true;
            }
        }
        if let Some(status) = update.status {
            if order.status.can_transition_to(status) {
                order.status = status;
                changed = true;
            } else if status != order.status {
                debug!(
                    order_id = %update.order_id,
                    current = ?order.status,
                    incoming = ?status,
                    "ignoring backward status transition"
                );
            }
        }
        if changed {
            order.updated_at = Utc::now();
        }
    }

    /// Drop terminal orders whose last update is older than `retention`
    pub fn evict_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut orders = self.orders.write();
        let before = orders.len();
        orders.retain(|_, o| !(o.status.is_terminal() && o.updated_at < cutoff));
        before - orders.len()
    }

    /// Merge a server-side order view into local state (confirmed data, so
    /// forward-only rules still apply)
    fn reconcile(&self, remote: &OpenOrderResponse) {
        let status = OrderStatus::from_remote(&remote.status);
        let filled = remote.size_matched.parse::<Decimal>().ok();

        let mut orders = self.orders.write();
        match orders.get_mut(&remote.id) {
            Some(order) => {
                if let Some(filled) = filled {
                    if filled > order.filled_size {
                        order.filled_size = filled.min(order.size);
                        order.updated_at = Utc::now();
                    }
                }
                if let Some(status) = status {
                    if order.status.can_transition_to(status) {
                        order.status = status;
                        order.updated_at = Utc::now();
                    }
                }
            }
            None => {
                // Order from a previous session; adopt it
                let Ok(price) = remote.price.parse::<Decimal>() else {
                    warn!(order_id = %remote.id, "open order with unparseable price skipped");
                    return;
                };
                let size = remote.original_size.parse::<Decimal>().unwrap_or(Decimal::ZERO);
                let side = match remote.side.to_ascii_uppercase().as_str() {
                    "SELL" => clob_core::OrderSide::Sell,
                    _ => clob_core::OrderSide::Buy,
                };
                let now = Utc::now();
                orders.insert(
                    remote.id.clone(),
                    TrackedOrder {
                        client_id: remote.id.clone(),
                        order_id: Some(remote.id.clone()),
                        condition_id: remote.market.clone(),
                        token_id: remote.asset_id.clone(),
                        side,
                        price,
                        size,
                        filled_size: filled.unwrap_or(Decimal::ZERO),
                        status: status.unwrap_or(OrderStatus::Open),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("tracked", &self.orders.read().len())
            .finish()
    }
}

// ============================================================================
// Validation and wire construction
// ============================================================================

/// Check an order spec against its market before signing
pub fn validate_spec(spec: &OrderSpec, market: &Market) -> ClobResult<()> {
    if market.status != clob_core::MarketStatus::Active {
        return Err(ClobError::invalid_order(format!(
            "market {} is closed",
            market.condition_id
        )));
    }
    if !market.tokens.iter().any(|t| t.token_id == spec.token_id) {
        return Err(ClobError::invalid_order(format!(
            "token {} does not belong to market {}",
            spec.token_id, market.condition_id
        )));
    }
    if spec.price <= Decimal::ZERO || spec.price >= Decimal::ONE {
        return Err(ClobError::invalid_order(format!(
            "price {} outside (0, 1)",
            spec.price
        )));
    }
    if market.tick_size > Decimal::ZERO && !(spec.price % market.tick_size).is_zero() {
        return Err(ClobError::invalid_order(format!(
            "price {} not aligned to tick size {}",
            spec.price, market.tick_size
        )));
    }
    if spec.size < market.min_order_size {
        return Err(ClobError::invalid_order(format!(
            "size {} below market minimum {}",
            spec.size, market.min_order_size
        )));
    }
    match (spec.order_type, spec.expiration) {
        (OrderType::Gtd, None) => {
            return Err(ClobError::invalid_order("GTD order requires an expiration"))
        }
        (OrderType::Gtd, Some(0)) => {
            return Err(ClobError::invalid_order("GTD expiration must be non-zero"))
        }
        _ => {}
    }
    Ok(())
}

/// Build the exchange's order structure from a validated spec
///
/// Maker/taker amounts are in 6-decimal base units. A BUY offers USDC
/// (price x size) for shares; a SELL offers shares for USDC.
pub fn build_wire_order(spec: &OrderSpec, maker: Address) -> ClobResult<WireOrder> {
    let token_id = U256::from_str_radix(&spec.token_id, 10)
        .map_err(|e| ClobError::invalid_order(format!("token id is not numeric: {}", e)))?;

    let usd = (spec.price * spec.size).round_dp(TOKEN_SCALE);
    let shares = spec.size.round_dp(TOKEN_SCALE);
    let (maker_amount, taker_amount) = match spec.side {
        clob_core::OrderSide::Buy => (to_base_units(usd)?, to_base_units(shares)?),
        clob_core::OrderSide::Sell => (to_base_units(shares)?, to_base_units(usd)?),
    };

    Ok(WireOrder {
        salt: crate::signer::generate_salt(),
        maker,
        signer: maker,
        taker: Address::ZERO,
        token_id,
        maker_amount,
        taker_amount,
        expiration: U256::from(spec.expiration.unwrap_or(0)),
        nonce: U256::ZERO,
        fee_rate_bps: U256::ZERO,
        side: match spec.side {
            clob_core::OrderSide::Buy => 0,
            clob_core::OrderSide::Sell => 1,
        },
        // EOA signature
        signature_type: 0,
    })
}

/// Scale a decimal quantity to 6-decimal integer base units
fn to_base_units(value: Decimal) -> ClobResult<U256> {
    let scaled = (value * Decimal::from(10u64.pow(TOKEN_SCALE))).round();
    let units = scaled
        .to_u128()
        .ok_or_else(|| ClobError::invalid_order(format!("amount {} out of range", value)))?;
    Ok(U256::from(units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clob_core::{MarketStatus, OrderSide, OutcomeToken};
    use rust_decimal_macros::dec;

    fn test_market() -> Market {
        Market {
            condition_id: "0xcond".into(),
            question: "Will it?".into(),
            tokens: vec![
                OutcomeToken {
                    token_id: "111".into(),
                    outcome: "Yes".into(),
                    price: None,
                },
                OutcomeToken {
                    token_id: "222".into(),
                    outcome: "No".into(),
                    price: None,
                },
            ],
            tick_size: dec!(0.01),
            min_order_size: dec!(5),
            status: MarketStatus::Active,
            category: None,
            end_date: None,
            neg_risk: false,
        }
    }

    fn buy_spec() -> OrderSpec {
        OrderSpec {
            condition_id: "0xcond".into(),
            token_id: "111".into(),
            side: OrderSide::Buy,
            price: dec!(0.45),
            size: dec!(10),
            order_type: OrderType::Gtc,
            expiration: None,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(validate_spec(&buy_spec(), &test_market()).is_ok());
    }

    #[test]
    fn price_out_of_bounds_rejected() {
        let market = test_market();
        for bad in [dec!(0), dec!(1), dec!(1.5), dec!(-0.1)] {
            let mut spec = buy_spec();
            spec.price = bad;
            assert!(matches!(
                validate_spec(&spec, &market).unwrap_err(),
                ClobError::InvalidOrderParameters(_)
            ));
        }
    }

    #[test]
    fn tick_misalignment_rejected() {
        let mut spec = buy_spec();
        spec.price = dec!(0.455);
        assert!(validate_spec(&spec, &test_market()).is_err());
    }

    #[test]
    fn undersized_order_rejected() {
        let mut spec = buy_spec();
        spec.size = dec!(4.9);
        assert!(validate_spec(&spec, &test_market()).is_err());
    }

    #[test]
    fn wrong_token_rejected() {
        let mut spec = buy_spec();
        spec.token_id = "999".into();
        assert!(validate_spec(&spec, &test_market()).is_err());
    }

    #[test]
    fn closed_market_rejected() {
        let mut market = test_market();
        market.status = MarketStatus::Closed;
        assert!(validate_spec(&buy_spec(), &market).is_err());
    }

    #[test]
    fn gtd_requires_expiration() {
        let mut spec = buy_spec();
        spec.order_type = OrderType::Gtd;
        assert!(validate_spec(&spec, &test_market()).is_err());
        spec.expiration = Some(1_900_000_000);
        assert!(validate_spec(&spec, &test_market()).is_ok());
    }

    #[test]
    fn buy_amounts_offer_usdc_for_shares() {
        let maker = Address::ZERO;
        let order = build_wire_order(&buy_spec(), maker).unwrap();
        // 0.45 x 10 = 4.5 USDC offered for 10 shares, at 6 decimals
        assert_eq!(order.maker_amount, U256::from(4_500_000u64));
        assert_eq!(order.taker_amount, U256::from(10_000_000u64));
        assert_eq!(order.side, 0);
        assert_eq!(order.token_id, U256::from(111u64));
    }

    #[test]
    fn sell_amounts_are_reversed() {
        let mut spec = buy_spec();
        spec.side = OrderSide::Sell;
        let order = build_wire_order(&spec, Address::ZERO).unwrap();
        assert_eq!(order.maker_amount, U256::from(10_000_000u64));
        assert_eq!(order.taker_amount, U256::from(4_500_000u64));
        assert_eq!(order.side, 1);
    }

    #[test]
    fn non_numeric_token_id_rejected() {
        let mut spec = buy_spec();
        spec.token_id = "0xdeadbeef".into();
        assert!(matches!(
            build_wire_order(&spec, Address::ZERO).unwrap_err(),
            ClobError::InvalidOrderParameters(_)
        ));
    }

    // The manager's event application is pure local state; exercise it
    // without a server by seeding the map through reconcile.
    fn manager_with_order(order_id: &str) -> OrderManager {
        let store = Arc::new(crate::credentials::CredentialStore::unauthenticated());
        let client = Arc::new(
            ClobRestClient::new("http://localhost:1", store, Default::default()).unwrap(),
        );
        let manager = OrderManager::new(client);
        manager.reconcile(&OpenOrderResponse {
            id: order_id.to_string(),
            market: "0xcond".into(),
            asset_id: "111".into(),
            side: "BUY".into(),
            original_size: "10".into(),
            size_matched: "0".into(),
            price: "0.45".into(),
            status: "LIVE".into(),
            created_at: None,
        });
        manager
    }

    #[test]
    fn updates_move_status_forward_only() {
        let manager = manager_with_order("ord-1");

        manager.apply_update(&OrderUpdate {
            order_id: "ord-1".into(),
            status: Some(OrderStatus::PartiallyFilled),
            filled_size: Some(dec!(4)),
        });
        let order = manager.order_for_test("ord-1");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_size, dec!(4));
        assert_eq!(order.remaining_size(), dec!(6));

        // Backward transition ignored, fill regression ignored
        manager.apply_update(&OrderUpdate {
            order_id: "ord-1".into(),
            status: Some(OrderStatus::Open),
            filled_size: Some(dec!(2)),
        });
        let order = manager.order_for_test("ord-1");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_size, dec!(4));

        manager.apply_update(&OrderUpdate {
            order_id: "ord-1".into(),
            status: Some(OrderStatus::Filled),
            filled_size: Some(dec!(10)),
        });
        let order = manager.order_for_test("ord-1");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_size(), Decimal::ZERO);
    }

    #[test]
    fn update_for_unknown_order_is_ignored() {
        let manager = manager_with_order("ord-1");
        manager.apply_update(&OrderUpdate {
            order_id: "ghost".into(),
            status: Some(OrderStatus::Filled),
            filled_size: None,
        });
        assert_eq!(manager.tracked_orders().len(), 1);
    }

    #[test]
    fn fills_are_capped_at_order_size() {
        let manager = manager_with_order("ord-1");
        manager.apply_update(&OrderUpdate {
            order_id: "ord-1".into(),
            status: None,
            filled_size: Some(dec!(50)),
        });
        assert_eq!(manager.order_for_test("ord-1").filled_size, dec!(10));
    }

    #[tokio::test]
    async fn duplicate_resolution_prefers_local_then_server() {
        let manager = manager_with_order("ord-1");
        // Tracked locally: resolved without any network call
        let resolved = manager.resolve_duplicate("ord-1").await.unwrap();
        assert_eq!(resolved.order_id.as_deref(), Some("ord-1"));
        // Untracked: the server lookup fails here (no API credentials), so
        // the duplicate cannot be adopted and the caller sees the rejection
        assert!(manager.resolve_duplicate("ghost").await.is_none());
    }

    #[test]
    fn feed_updates_sweep_expired_terminal_orders() {
        let store = Arc::new(crate::credentials::CredentialStore::unauthenticated());
        let client = Arc::new(
            ClobRestClient::new("http://localhost:1", store, Default::default()).unwrap(),
        );
        let manager = OrderManager::with_retention(client, Duration::ZERO);
        manager.reconcile(&OpenOrderResponse {
            id: "ord-done".into(),
            market: "0xcond".into(),
            asset_id: "111".into(),
            side: "SELL".into(),
            original_size: "5".into(),
            size_matched: "5".into(),
            price: "0.5".into(),
            status: "MATCHED".into(),
            created_at: None,
        });
        manager.reconcile(&OpenOrderResponse {
            id: "ord-live".into(),
            market: "0xcond".into(),
            asset_id: "111".into(),
            side: "BUY".into(),
            original_size: "10".into(),
            size_matched: "0".into(),
            price: "0.45".into(),
            status: "LIVE".into(),
            created_at: None,
        });
        assert_eq!(manager.tracked_orders().len(), 2);

        // An unrelated realtime update triggers the retention sweep
        manager.apply_update(&OrderUpdate {
            order_id: "ghost".into(),
            status: None,
            filled_size: None,
        });
        let tracked = manager.tracked_orders();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].order_id.as_deref(), Some("ord-live"));
    }

    #[test]
    fn eviction_drops_only_old_terminal_orders() {
        let manager = manager_with_order("ord-1");
        manager.reconcile(&OpenOrderResponse {
            id: "ord-2".into(),
            market: "0xcond".into(),
            asset_id: "111".into(),
            side: "SELL".into(),
            original_size: "5".into(),
            size_matched: "5".into(),
            price: "0.5".into(),
            status: "MATCHED".into(),
            created_at: None,
        });

        // Nothing old enough yet
        assert_eq!(manager.evict_expired(Duration::from_secs(60)), 0);
        // Zero retention evicts the terminal order but keeps the open one
        assert_eq!(manager.evict_expired(Duration::ZERO), 1);
        assert_eq!(manager.tracked_orders().len(), 1);
        assert_eq!(manager.tracked_orders()[0].status, OrderStatus::Open);
    }

    impl OrderManager {
        fn order_for_test(&self, id: &str) -> TrackedOrder {
            self.orders.read().get(id).cloned().unwrap()
        }
    }
}
