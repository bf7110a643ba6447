//! `SeaORM` Entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "business_hours_holiday")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub business_hours_id: i32,
    pub holiday_date: Date,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::business_hours::Entity",
        from = "Column::BusinessHoursId",
        to = "super::business_hours::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    BusinessHours,
}

impl Related<super::business_hours::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BusinessHours.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
