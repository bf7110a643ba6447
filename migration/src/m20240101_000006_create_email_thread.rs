use sea_orm_migration::{prelude::*, schema::*};

use crate::m20240101_000003_create_sequence::Sequence;
use crate::m20240101_000004_create_contact_and_sequence_contact::Contact;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailThread::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailThread::Id))
                    .col(integer(EmailThread::UserId).not_null())
                    .col(string(EmailThread::GmailThreadId).not_null())
                    .col(integer(EmailThread::SequenceId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_thread-sequence_id")
                            .from(EmailThread::Table, EmailThread::SequenceId)
                            .to(Sequence::Table, Sequence::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(integer(EmailThread::ContactId).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_thread-contact_id")
                            .from(EmailThread::Table, EmailThread::ContactId)
                            .to(Contact::Table, Contact::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .col(string(EmailThread::FirstMessageId).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-email_thread-user_id-gmail_thread_id")
                    .table(EmailThread::Table)
                    .col(EmailThread::UserId)
                    .col(EmailThread::GmailThreadId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailThread::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailThread {
    Table,
    Id,
    UserId,
    GmailThreadId,
    SequenceId,
    ContactId,
    FirstMessageId,
}
