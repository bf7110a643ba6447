pub mod gmail;
pub mod mime;
pub mod worker;
