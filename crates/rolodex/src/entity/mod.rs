//! SeaORM entity definitions for the rolodex database schema.

pub mod crm_token;
pub mod mirror_contact;
pub mod prelude;
pub mod sync_job;
pub mod sync_status;
