pub mod config;
pub mod frame;
pub mod member_id;
