//! `SeaORM` Entity
//!
//! One row per send attempt. `hash` is the opaque id embedded in pixel and
//! click URLs; `metadata` carries the `{email, userId, sequenceId, stepId,
//! contactId}` bundle the inbound pipeline and stats use to attribute events.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "email_tracking")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub hash: String,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub status: EmailTrackingStatus,
    pub open_count: i32,
    pub sent_at: Option<DateTimeWithTimeZone>,
    pub opened_at: Option<DateTimeWithTimeZone>,
    pub clicked_at: Option<DateTimeWithTimeZone>,
    pub metadata: Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum EmailTrackingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "bounced")]
    Bounced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTrackingMetadata {
    pub email: String,
    pub user_id: i32,
    pub sequence_id: i32,
    pub step_id: i32,
    pub contact_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tracked_link::Entity")]
    TrackedLink,
    #[sea_orm(has_many = "super::email_event::Entity")]
    EmailEvent,
}

impl Related<super::tracked_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackedLink.def()
    }
}

impl Related<super::email_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
