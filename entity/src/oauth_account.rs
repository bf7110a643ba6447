//! `SeaORM` Entity
//!
//! Stores the per-user Gmail OAuth tokens the core consumes. Access and
//! refresh tokens are encrypted at rest with `lib_utils::crypt` before being
//! written here; this entity never sees plaintext tokens outside that layer.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "oauth_account")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub user_id: i32,
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub expires_at: DateTimeWithTimeZone,
    /// Gmail `historyId` cursor the inbound pipeline last consumed.
    pub last_history_id: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AppUser.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
