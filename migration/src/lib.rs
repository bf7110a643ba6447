pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_user_and_oauth;
mod m20240101_000002_create_business_hours;
mod m20240101_000003_create_sequence;
mod m20240101_000004_create_contact_and_sequence_contact;
mod m20240101_000005_create_email_tracking;
mod m20240101_000006_create_email_thread;
mod m20240101_000007_create_sequence_stats_and_health;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_user_and_oauth::Migration),
            Box::new(m20240101_000002_create_business_hours::Migration),
            Box::new(m20240101_000003_create_sequence::Migration),
            Box::new(m20240101_000004_create_contact_and_sequence_contact::Migration),
            Box::new(m20240101_000005_create_email_tracking::Migration),
            Box::new(m20240101_000006_create_email_thread::Migration),
            Box::new(m20240101_000007_create_sequence_stats_and_health::Migration),
        ]
    }
}
