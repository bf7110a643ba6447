use sea_orm_migration::{prelude::*, schema::*};

use crate::m20240101_000003_create_sequence::Sequence;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SequenceStats::Table)
                    .if_not_exists()
                    .col(pk_auto(SequenceStats::Id))
                    .col(integer(SequenceStats::SequenceId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence_stats-sequence_id")
                            .from(SequenceStats::Table, SequenceStats::SequenceId)
                            .to(Sequence::Table, Sequence::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(
                        integer(SequenceStats::PeopleContacted)
                            .not_null()
                            .default(0),
                    )
                    .col(integer(SequenceStats::SentEmails).not_null().default(0))
                    .col(integer(SequenceStats::OpenedEmails).not_null().default(0))
                    .col(integer(SequenceStats::UniqueOpens).not_null().default(0))
                    .col(integer(SequenceStats::ClickedEmails).not_null().default(0))
                    .col(integer(SequenceStats::RepliedEmails).not_null().default(0))
                    .col(integer(SequenceStats::BouncedEmails).not_null().default(0))
                    .col(double(SequenceStats::OpenRate).not_null().default(0.0))
                    .col(double(SequenceStats::ClickRate).not_null().default(0.0))
                    .col(double(SequenceStats::ReplyRate).not_null().default(0.0))
                    .col(
                        timestamp_with_time_zone(SequenceStats::UpdatedAt)
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
                    .name("idx-sequence_stats-sequence_id")
                    .table(SequenceStats::Table)
                    .col(SequenceStats::SequenceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SequenceHealth::Table)
                    .if_not_exists()
                    .col(pk_auto(SequenceHealth::Id))
                    .col(integer(SequenceHealth::SequenceId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence_health-sequence_id")
                            .from(SequenceHealth::Table, SequenceHealth::SequenceId)
                            .to(Sequence::Table, Sequence::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(SequenceHealth::Status).not_null().default("healthy"))
                    .col(integer(SequenceHealth::ErrorCount).not_null().default(0))
                    .col(text_null(SequenceHealth::LastError))
                    .col(json(SequenceHealth::Metrics).not_null())
                    .col(
                        timestamp_with_time_zone(SequenceHealth::UpdatedAt)
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
                    .name("idx-sequence_health-sequence_id")
                    .table(SequenceHealth::Table)
                    .col(SequenceHealth::SequenceId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SequenceHealth::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SequenceStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SequenceStats {
    Table,
    Id,
    SequenceId,
    PeopleContacted,
    SentEmails,
    OpenedEmails,
    UniqueOpens,
    ClickedEmails,
    RepliedEmails,
    BouncedEmails,
    OpenRate,
    ClickRate,
    ReplyRate,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SequenceHealth {
    Table,
    Id,
    SequenceId,
    Status,
    ErrorCount,
    LastError,
    Metrics,
    UpdatedAt,
}
