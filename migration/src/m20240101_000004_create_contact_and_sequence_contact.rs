use sea_orm_migration::{prelude::*, schema::*};

use crate::m20240101_000001_create_user_and_oauth::AppUser;
use crate::m20240101_000003_create_sequence::Sequence;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contact::Table)
                    .if_not_exists()
                    .col(pk_auto(Contact::Id))
                    .col(integer(Contact::UserId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-contact-user_id")
                            .from(Contact::Table, Contact::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(Contact::Email).not_null())
                    .col(string_null(Contact::Company))
                    .col(
                        timestamp_with_time_zone(Contact::CreatedAt)
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
                    .name("idx-contact-email")
                    .table(Contact::Table)
                    .col(Contact::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SequenceContact::Table)
                    .if_not_exists()
                    .col(pk_auto(SequenceContact::Id))
                    .col(integer(SequenceContact::SequenceId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence_contact-sequence_id")
                            .from(SequenceContact::Table, SequenceContact::SequenceId)
                            .to(Sequence::Table, Sequence::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(integer(SequenceContact::ContactId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence_contact-contact_id")
                            .from(SequenceContact::Table, SequenceContact::ContactId)
                            .to(Contact::Table, Contact::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(SequenceContact::Status).not_null().default("not_sent"))
                    .col(integer(SequenceContact::CurrentStep).not_null().default(0))
                    .col(timestamp_with_time_zone_null(
                        SequenceContact::NextScheduledAt,
                    ))
                    .col(string_null(SequenceContact::ThreadId))
                    .col(timestamp_with_time_zone_null(SequenceContact::StartedAt))
                    .col(timestamp_with_time_zone_null(
                        SequenceContact::LastProcessedAt,
                    ))
                    .col(timestamp_with_time_zone_null(SequenceContact::CompletedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-sequence_contact-sequence_id-contact_id")
                    .table(SequenceContact::Table)
                    .col(SequenceContact::SequenceId)
                    .col(SequenceContact::ContactId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-sequence_contact-next_scheduled_at")
                    .table(SequenceContact::Table)
                    .col(SequenceContact::NextScheduledAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SequenceContact::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contact::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Contact {
    Table,
    Id,
    UserId,
    Email,
    Company,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SequenceContact {
    Table,
    Id,
    SequenceId,
    ContactId,
    Status,
    CurrentStep,
    NextScheduledAt,
    ThreadId,
    StartedAt,
    LastProcessedAt,
    CompletedAt,
}
