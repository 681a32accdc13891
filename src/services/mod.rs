// Services module - Business logic

pub mod code_generator;
pub mod geolocation;
pub mod lifecycle;
pub mod qr_code;
pub mod redemption;
pub mod reporting;
