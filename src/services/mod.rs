// Core services
pub mod checkout;
pub mod links;
pub mod orders;
pub mod reservations;

// Pure pricing engine shared by checkout and tests
pub mod pricing;

pub use checkout::{CheckoutOutcome, CheckoutService, StartCheckoutRequest};
pub use links::{CreateLinkRequest, ShortLinkService};
pub use orders::{OrderNotification, OrderReconciliationService, ReconcileOutcome};
pub use reservations::{start_sweeper, ReservationService, SweepResult};
