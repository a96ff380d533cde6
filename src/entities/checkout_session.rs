use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "redirected")]
    Redirected,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl CheckoutStatus {
    /// Statuses a session can still progress from. Terminal sessions release
    /// their idempotency key.
    pub const LIVE: [CheckoutStatus; 2] = [CheckoutStatus::Pending, CheckoutStatus::Redirected];

    pub fn is_terminal(&self) -> bool {
        !Self::LIVE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::Redirected => "redirected",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Abandoned => "abandoned",
            CheckoutStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// `visitor:code:variant`, unique among live sessions (partial index).
    pub idempotency_key: String,

    pub short_link_id: Uuid,
    pub offer_id: Uuid,
    pub variant_id: Uuid,
    pub visitor_id: String,
    pub status: CheckoutStatus,

    // Cart snapshot, all amounts in minor currency units.
    pub quantity: i32,
    pub unit_price: i64,
    pub discounted_unit_price: i64,
    pub subtotal: i64,
    pub discount_total: i64,
    pub total: i64,
    pub currency: String,

    pub external_checkout_url: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::short_link::Entity",
        from = "Column::ShortLinkId",
        to = "super::short_link::Column::Id"
    )]
    ShortLink,
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::VariantId",
        to = "super::product_variant::Column::Id"
    )]
    ProductVariant,
    #[sea_orm(has_many = "super::inventory_reservation::Entity")]
    InventoryReservations,
}

impl Related<super::short_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShortLink.def()
    }
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductVariant.def()
    }
}

impl Related<super::inventory_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryReservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
