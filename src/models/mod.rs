pub mod log_entry;
pub mod payment_config;
pub mod status;

pub use log_entry::{NewLogEntry, OperationType, PaymentLogEntry};
pub use payment_config::{NewPaymentConfig, PaymentConfig, Provider, ResolvedConfig};
pub use status::PaymentStatus;

/// БИН организации - ровно 12 цифр.
pub fn is_valid_bin(bin: &str) -> bool {
    bin.len() == 12 && bin.bytes().all(|b| b.is_ascii_digit())
}

/// Токен устройства (торговой точки) выдаётся Kaspi в формате UUID.
pub fn is_valid_device_token(token: &str) -> bool {
    uuid::Uuid::parse_str(token).is_ok()
}
