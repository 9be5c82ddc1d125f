pub mod config;
pub mod net;
pub mod policy;
pub mod smtp;
pub mod spool;
