//! `SeaORM` Entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "tracked_link")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub email_tracking_id: i32,
    pub original_url: String,
    pub click_count: i32,
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
    #[sea_orm(has_many = "super::link_click::Entity")]
    LinkClick,
}

impl Related<super::email_tracking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailTracking.def()
    }
}

impl Related<super::link_click::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LinkClick.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
