pub mod contact;
pub mod datetime;
pub mod intent;
pub mod service;
