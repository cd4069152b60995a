//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::Repositories;
use crate::services::payment::{GatewayError, PaymentGateway, StripeGateway, WebhookVerifier};
use crate::services::{CartService, CheckoutService, OrderFactory, SettlementReconciler};

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; services are built once at start-up.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    carts: CartService,
    checkout: CheckoutService,
    reconciler: SettlementReconciler,
    verifier: WebhookVerifier,
}

impl AppState {
    /// Create the production state over `PostgreSQL` and Stripe.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway HTTP client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, GatewayError> {
        let repos = Repositories::postgres(&pool);
        let gateway = Arc::new(StripeGateway::new(&config.stripe)?);
        Ok(Self::from_parts(config, &repos, gateway, Some(pool)))
    }

    /// Assemble state from explicit collaborators.
    ///
    /// Without a pool, readiness always reports healthy.
    #[must_use]
    pub fn from_parts(
        config: StorefrontConfig,
        repos: &Repositories,
        gateway: Arc<dyn PaymentGateway>,
        pool: Option<PgPool>,
    ) -> Self {
        let factory = OrderFactory::new(repos.orders.clone(), config.stripe.currency);
        let checkout =
            CheckoutService::new(repos, gateway, factory, config.checkout.tax_rate);
        let verifier = WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            config.stripe.webhook_tolerance_secs,
        );

        Self {
            inner: Arc::new(AppStateInner {
                carts: CartService::new(repos.carts.clone(), repos.products.clone()),
                reconciler: SettlementReconciler::new(repos.payments.clone()),
                checkout,
                verifier,
                pool,
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// The database pool, if the state is backed by `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn reconciler(&self) -> &SettlementReconciler {
        &self.inner.reconciler
    }

    #[must_use]
    pub fn webhook_verifier(&self) -> &WebhookVerifier {
        &self.inner.verifier
    }
}
