pub mod app_error;
pub mod jwt;
pub mod masking;
pub mod ports;
pub mod use_cases;
