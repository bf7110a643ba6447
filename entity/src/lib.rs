pub mod app_user;
pub mod business_hours;
pub mod business_hours_holiday;
pub mod contact;
pub mod email_event;
pub mod email_thread;
pub mod email_tracking;
pub mod link_click;
pub mod oauth_account;
pub mod sequence;
pub mod sequence_contact;
pub mod sequence_health;
pub mod sequence_stats;
pub mod sequence_step;
pub mod tracked_link;

pub mod prelude {
    pub use super::app_user::Entity as AppUser;
    pub use super::business_hours::Entity as BusinessHours;
    pub use super::business_hours_holiday::Entity as BusinessHoursHoliday;
    pub use super::contact::Entity as Contact;
    pub use super::email_event::Entity as EmailEvent;
    pub use super::email_thread::Entity as EmailThread;
    pub use super::email_tracking::Entity as EmailTracking;
    pub use super::link_click::Entity as LinkClick;
    pub use super::oauth_account::Entity as OauthAccount;
    pub use super::sequence::Entity as Sequence;
    pub use super::sequence_contact::Entity as SequenceContact;
    pub use super::sequence_health::Entity as SequenceHealth;
    pub use super::sequence_stats::Entity as SequenceStats;
    pub use super::sequence_step::Entity as SequenceStep;
    pub use super::tracked_link::Entity as TrackedLink;
}
