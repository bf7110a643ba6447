//! `SeaORM` Entity
//!
//! The per-(sequence, contact) progress row. Only the sequence processor, the
//! sweeper, the email worker and the inbound pipeline write to this table —
//! see `server::scheduler` and `server::sweeper` for the state machine.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "sequence_contact")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub sequence_id: i32,
    pub contact_id: i32,
    pub status: SequenceContactStatus,
    /// Index of the next step to send; `steps.len()` means done.
    pub current_step: i32,
    pub next_scheduled_at: Option<DateTimeWithTimeZone>,
    pub thread_id: Option<String>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub last_processed_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SequenceContactStatus {
    #[sea_orm(string_value = "not_sent")]
    NotSent,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "replied")]
    Replied,
    #[sea_orm(string_value = "bounced")]
    Bounced,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "opted_out")]
    OptedOut,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sequence::Entity",
        from = "Column::SequenceId",
        to = "super::sequence::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Sequence,
    #[sea_orm(
        belongs_to = "super::contact::Entity",
        from = "Column::ContactId",
        to = "super::contact::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Contact,
}

impl Related<super::sequence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sequence.def()
    }
}

impl Related<super::contact::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contact.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
