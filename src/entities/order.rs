use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An order recorded from an external commerce-backend notification.
///
/// `(connection_id, external_order_id)` is the natural key; a composite
/// unique index makes duplicate webhook deliveries collapse onto one row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connection_id: Uuid,
    pub external_order_id: String,
    pub order_number: String,

    /// Total in minor currency units as reported by the backend.
    pub total: i64,
    pub currency: String,

    // Attribution back-references, set only when the notification's note
    // matched a known checkout session.
    pub checkout_session_id: Option<Uuid>,
    pub short_link_id: Option<Uuid>,

    pub note: Option<String>,

    /// Raw line items from the notification, serialized as JSON.
    #[sea_orm(column_type = "Text", nullable)]
    pub line_items: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::checkout_session::Entity",
        from = "Column::CheckoutSessionId",
        to = "super::checkout_session::Column::Id"
    )]
    CheckoutSession,
}

impl Related<super::checkout_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
