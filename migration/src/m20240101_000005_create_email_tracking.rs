use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailTracking::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailTracking::Id))
                    .col(string(EmailTracking::Hash).not_null())
                    .col(string_null(EmailTracking::MessageId))
                    .col(string_null(EmailTracking::ThreadId))
                    .col(string(EmailTracking::Status).not_null().default("pending"))
                    .col(integer(EmailTracking::OpenCount).not_null().default(0))
                    .col(timestamp_with_time_zone_null(EmailTracking::SentAt))
                    .col(timestamp_with_time_zone_null(EmailTracking::OpenedAt))
                    .col(timestamp_with_time_zone_null(EmailTracking::ClickedAt))
                    .col(json(EmailTracking::Metadata).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-email_tracking-hash")
                    .table(EmailTracking::Table)
                    .col(EmailTracking::Hash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TrackedLink::Table)
                    .if_not_exists()
                    .col(pk_auto(TrackedLink::Id))
                    .col(integer(TrackedLink::EmailTrackingId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-tracked_link-email_tracking_id")
                            .from(TrackedLink::Table, TrackedLink::EmailTrackingId)
                            .to(EmailTracking::Table, EmailTracking::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(text(TrackedLink::OriginalUrl).not_null())
                    .col(integer(TrackedLink::ClickCount).not_null().default(0))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-tracked_link-email_tracking_id")
                    .table(TrackedLink::Table)
                    .col(TrackedLink::EmailTrackingId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LinkClick::Table)
                    .if_not_exists()
                    .col(pk_auto(LinkClick::Id))
                    .col(integer(LinkClick::TrackedLinkId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-link_click-tracked_link_id")
                            .from(LinkClick::Table, LinkClick::TrackedLinkId)
                            .to(TrackedLink::Table, TrackedLink::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(timestamp_with_time_zone(LinkClick::Timestamp).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-link_click-tracked_link_id")
                    .table(LinkClick::Table)
                    .col(LinkClick::TrackedLinkId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailEvent::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailEvent::Id))
                    .col(integer(EmailEvent::EmailTrackingId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_event-email_tracking_id")
                            .from(EmailEvent::Table, EmailEvent::EmailTrackingId)
                            .to(EmailTracking::Table, EmailTracking::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(EmailEvent::EventType).not_null())
                    .col(string_null(EmailEvent::ReplyMessageId))
                    .col(json_null(EmailEvent::Metadata))
                    .col(
                        timestamp_with_time_zone(EmailEvent::CreatedAt)
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
                    .name("idx-email_event-email_tracking_id")
                    .table(EmailEvent::Table)
                    .col(EmailEvent::EmailTrackingId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailEvent::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LinkClick::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackedLink::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailTracking::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum EmailTracking {
    Table,
    Id,
    Hash,
    MessageId,
    ThreadId,
    Status,
    OpenCount,
    SentAt,
    OpenedAt,
    ClickedAt,
    Metadata,
}

#[derive(DeriveIden)]
pub enum TrackedLink {
    Table,
    Id,
    EmailTrackingId,
    OriginalUrl,
    ClickCount,
}

#[derive(DeriveIden)]
enum LinkClick {
    Table,
    Id,
    TrackedLinkId,
    Timestamp,
}

#[derive(DeriveIden)]
enum EmailEvent {
    Table,
    Id,
    EmailTrackingId,
    EventType,
    ReplyMessageId,
    Metadata,
    CreatedAt,
}
