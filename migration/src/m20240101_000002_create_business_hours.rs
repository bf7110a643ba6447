use sea_orm_migration::{prelude::*, schema::*};

use crate::m20240101_000001_create_user_and_oauth::AppUser;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BusinessHours::Table)
                    .if_not_exists()
                    .col(pk_auto(BusinessHours::Id))
                    .col(integer(BusinessHours::UserId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-business_hours-user_id")
                            .from(BusinessHours::Table, BusinessHours::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(BusinessHours::Timezone).not_null())
                    .col(integer(BusinessHours::WorkDays).not_null())
                    .col(integer(BusinessHours::WorkHoursStart).not_null())
                    .col(integer(BusinessHours::WorkHoursEnd).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BusinessHoursHoliday::Table)
                    .if_not_exists()
                    .col(pk_auto(BusinessHoursHoliday::Id))
                    .col(integer(BusinessHoursHoliday::BusinessHoursId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-business_hours_holiday-business_hours_id")
                            .from(
                                BusinessHoursHoliday::Table,
                                BusinessHoursHoliday::BusinessHoursId,
                            )
                            .to(BusinessHours::Table, BusinessHours::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(date(BusinessHoursHoliday::HolidayDate).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-business_hours_holiday-business_hours_id")
                    .table(BusinessHoursHoliday::Table)
                    .col(BusinessHoursHoliday::BusinessHoursId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BusinessHoursHoliday::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BusinessHours::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum BusinessHours {
    Table,
    Id,
    UserId,
    Timezone,
    WorkDays,
    WorkHoursStart,
    WorkHoursEnd,
}

#[derive(DeriveIden)]
enum BusinessHoursHoliday {
    Table,
    Id,
    BusinessHoursId,
    HolidayDate,
}
