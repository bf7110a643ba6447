use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AppUser::Table)
                    .if_not_exists()
                    .col(pk_auto(AppUser::Id))
                    .col(string(AppUser::Email).not_null())
                    .col(
                        timestamp_with_time_zone(AppUser::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-app_user-email")
                    .table(AppUser::Table)
                    .col(AppUser::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OauthAccount::Table)
                    .if_not_exists()
                    .col(pk_auto(OauthAccount::Id))
                    .col(integer(OauthAccount::UserId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-oauth_account-user_id")
                            .from(OauthAccount::Table, OauthAccount::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(text(OauthAccount::AccessTokenEnc).not_null())
                    .col(text(OauthAccount::RefreshTokenEnc).not_null())
                    .col(timestamp_with_time_zone(OauthAccount::ExpiresAt).not_null())
                    .col(big_integer_null(OauthAccount::LastHistoryId))
                    .col(
                        timestamp_with_time_zone(OauthAccount::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(OauthAccount::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-oauth_account-user_id")
                    .table(OauthAccount::Table)
                    .col(OauthAccount::UserId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OauthAccount::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppUser::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum AppUser {
    Table,
    Id,
    Email,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OauthAccount {
    Table,
    Id,
    UserId,
    AccessTokenEnc,
    RefreshTokenEnc,
    ExpiresAt,
    LastHistoryId,
    CreatedAt,
    UpdatedAt,
}
