pub mod checkout;
pub mod common;
pub mod links;
pub mod webhooks;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::commerce::CheckoutUrlBuilder;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    CheckoutService, OrderReconciliationService, ReservationService, ShortLinkService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub links: ShortLinkService,
    pub checkout: CheckoutService,
    pub orders: OrderReconciliationService,
    pub reservations: ReservationService,
}

impl AppServices {
    /// Wires the service graph from shared infrastructure handles.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        url_builder: Arc<dyn CheckoutUrlBuilder>,
        config: &AppConfig,
    ) -> Self {
        let links = ShortLinkService::new(db.clone());
        let checkout = CheckoutService::new(
            db.clone(),
            links.clone(),
            url_builder,
            event_sender.clone(),
            config.session_ttl(),
            config.reservation_ttl(),
        );
        let orders = OrderReconciliationService::new(db.clone(), event_sender.clone());
        let reservations = ReservationService::new(db, event_sender);

        Self {
            links,
            checkout,
            orders,
            reservations,
        }
    }
}
