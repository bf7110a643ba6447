//! `SeaORM` Entity
//!
//! Append-only event log per `email_tracking` row. Idempotence (spec
//! property 5/7) is enforced by the writer checking for an existing event of
//! the same `(email_tracking_id, event_type, reply_message_id)` before
//! inserting, not by a DB constraint — a duplicate push must not double count,
//! but bounce/open rows legitimately repeat (`open_count` increments).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "email_event")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub email_tracking_id: i32,
    pub event_type: EmailEventType,
    pub reply_message_id: Option<String>,
    pub metadata: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum EmailEventType {
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "opened")]
    Opened,
    #[sea_orm(string_value = "clicked")]
    Clicked,
    #[sea_orm(string_value = "replied")]
    Replied,
    #[sea_orm(string_value = "bounced")]
    Bounced,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::email_tracking::Entity",
        from = "Column::EmailTrackingId",
        to = "super::email_tracking::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    EmailTracking,
}

impl Related<super::email_tracking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailTracking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
