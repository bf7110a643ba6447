//! `SeaORM` Entity
//!
//! Append-only: one row per click, never updated or deleted outside a
//! sequence reset.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_click")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tracked_link_id: i32,
    pub timestamp: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tracked_link::Entity",
        from = "Column::TrackedLinkId",
        to = "super::tracked_link::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    TrackedLink,
}

impl Related<super::tracked_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackedLink.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
