pub mod checkout_session;
pub mod inventory_reservation;
pub mod offer;
pub mod order;
pub mod product_variant;
pub mod short_link;

// Re-export entities
pub use checkout_session::{CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel};
pub use inventory_reservation::{
    Entity as InventoryReservation, Model as InventoryReservationModel, ReservationStatus,
};
pub use offer::{DiscountKind, Entity as Offer, Model as OfferModel, OfferStatus};
pub use order::{Entity as Order, Model as OrderModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use short_link::{Entity as ShortLink, Model as ShortLinkModel};
