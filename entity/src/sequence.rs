//! `SeaORM` Entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "sequence")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub status: SequenceStatus,
    pub business_hours_id: Option<i32>,
    pub test_mode: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "paused")]
    Paused,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::app_user::Entity",
        from = "Column::UserId",
        to = "super::app_user::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    AppUser,
    #[sea_orm(
        belongs_to = "super::business_hours::Entity",
        from = "Column::BusinessHoursId",
        to = "super::business_hours::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    BusinessHours,
    #[sea_orm(has_many = "super::sequence_step::Entity")]
    SequenceStep,
    #[sea_orm(has_many = "super::sequence_contact::Entity")]
    SequenceContact,
    #[sea_orm(has_one = "super::sequence_stats::Entity")]
    SequenceStats,
    #[sea_orm(has_one = "super::sequence_health::Entity")]
    SequenceHealth,
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AppUser.def()
    }
}

impl Related<super::business_hours::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BusinessHours.def()
    }
}

impl Related<super::sequence_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SequenceStep.def()
    }
}

impl Related<super::sequence_contact::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SequenceContact.def()
    }
}

impl Related<super::sequence_stats::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SequenceStats.def()
    }
}

impl Related<super::sequence_health::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SequenceHealth.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
