use sea_orm_migration::{prelude::*, schema::*};

use crate::m20240101_000001_create_user_and_oauth::AppUser;
use crate::m20240101_000002_create_business_hours::BusinessHours;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sequence::Table)
                    .if_not_exists()
                    .col(pk_auto(Sequence::Id))
                    .col(integer(Sequence::UserId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence-user_id")
                            .from(Sequence::Table, Sequence::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(Sequence::Name).not_null())
                    .col(string(Sequence::Status).not_null().default("draft"))
                    .col(integer_null(Sequence::BusinessHoursId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence-business_hours_id")
                            .from(Sequence::Table, Sequence::BusinessHoursId)
                            .to(BusinessHours::Table, BusinessHours::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .col(boolean(Sequence::TestMode).not_null().default(false))
                    .col(
                        timestamp_with_time_zone(Sequence::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Sequence::UpdatedAt)
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
                    .name("idx-sequence-user_id")
                    .table(Sequence::Table)
                    .col(Sequence::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SequenceStep::Table)
                    .if_not_exists()
                    .col(pk_auto(SequenceStep::Id))
                    .col(integer(SequenceStep::SequenceId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sequence_step-sequence_id")
                            .from(SequenceStep::Table, SequenceStep::SequenceId)
                            .to(Sequence::Table, Sequence::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(integer(SequenceStep::Order).not_null())
                    .col(string(SequenceStep::StepType).not_null())
                    .col(string(SequenceStep::Timing).not_null())
                    .col(integer_null(SequenceStep::DelayAmount))
                    .col(string_null(SequenceStep::DelayUnit))
                    .col(string_null(SequenceStep::Subject))
                    .col(text_null(SequenceStep::HtmlContent))
                    .col(
                        boolean(SequenceStep::ReplyToThread)
                            .not_null()
                            .default(false),
                    )
                    .col(integer_null(SequenceStep::PreviousStepId))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-sequence_step-sequence_id-order")
                    .table(SequenceStep::Table)
                    .col(SequenceStep::SequenceId)
                    .col(SequenceStep::Order)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SequenceStep::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sequence::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Sequence {
    Table,
    Id,
    UserId,
    Name,
    Status,
    BusinessHoursId,
    TestMode,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SequenceStep {
    Table,
    Id,
    SequenceId,
    Order,
    StepType,
    Timing,
    DelayAmount,
    DelayUnit,
    Subject,
    HtmlContent,
    ReplyToThread,
    PreviousStepId,
}
