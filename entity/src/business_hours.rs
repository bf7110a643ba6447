//! `SeaORM` Entity
//!
//! One row per user or per sequence; a sequence-level row overrides the
//! user-level one (resolved by the scheduler, not here).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "business_hours")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub timezone: String,
    /// Bitmask over Mon=0..Sun=6.
    pub work_days: i32,
    /// Minutes since midnight, wall-clock in `timezone`.
    pub work_hours_start: i32,
    pub work_hours_end: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::business_hours_holiday::Entity")]
    BusinessHoursHoliday,
    #[sea_orm(has_many = "super::sequence::Entity")]
    Sequence,
}

impl Related<super::business_hours_holiday::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BusinessHoursHoliday.def()
    }
}

impl Related<super::sequence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sequence.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
