pub mod billing_event;
pub mod payment_profile;
pub mod processed_event;
pub mod subscription;
