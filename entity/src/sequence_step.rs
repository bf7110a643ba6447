//! `SeaORM` Entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "sequence_step")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub sequence_id: i32,
    /// 0-based, strictly monotonic within a sequence.
    pub order: i32,
    pub step_type: StepType,
    pub timing: StepTiming,
    pub delay_amount: Option<i32>,
    pub delay_unit: Option<DelayUnit>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub reply_to_thread: bool,
    pub previous_step_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[sea_orm(string_value = "manual_email")]
    ManualEmail,
    #[sea_orm(string_value = "automated_email")]
    AutomatedEmail,
    #[sea_orm(string_value = "wait")]
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum StepTiming {
    #[sea_orm(string_value = "immediate")]
    Immediate,
    #[sea_orm(string_value = "delay")]
    Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    #[sea_orm(string_value = "minutes")]
    Minutes,
    #[sea_orm(string_value = "hours")]
    Hours,
    #[sea_orm(string_value = "days")]
    Days,
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
