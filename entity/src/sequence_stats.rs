//! `SeaORM` Entity
//!
//! One row per sequence, mutated only by event ingestion (never by the
//! processor or sweeper directly).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sequence_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub sequence_id: i32,
    pub people_contacted: i32,
    pub sent_emails: i32,
    pub opened_emails: i32,
    pub unique_opens: i32,
    pub clicked_emails: i32,
    pub replied_emails: i32,
    pub bounced_emails: i32,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
    pub updated_at: DateTimeWithTimeZone,
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
}

impl Related<super::sequence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sequence.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
