use serde::{Deserialize, Serialize};
use std::fmt;

/// Статус платежа в терминах Kaspi Pay.
///
/// Оплата по номеру телефона: `Wait → Processed | Error`.
/// Оплата по ссылке: `QrTokenCreated → RemotePaymentCreated → Processed | Error`.
/// `Unknown` выставляется локально, когда исход создания платежа неизвестен (таймаут).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Wait,
    QrTokenCreated,
    RemotePaymentCreated,
    Processed,
    Error,
    Unknown,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Wait => "Wait",
            PaymentStatus::QrTokenCreated => "QrTokenCreated",
            PaymentStatus::RemotePaymentCreated => "RemotePaymentCreated",
            PaymentStatus::Processed => "Processed",
            PaymentStatus::Error => "Error",
            PaymentStatus::Unknown => "Unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "Wait" => PaymentStatus::Wait,
            "QrTokenCreated" => PaymentStatus::QrTokenCreated,
            "RemotePaymentCreated" => PaymentStatus::RemotePaymentCreated,
            "Processed" => PaymentStatus::Processed,
            "Error" => PaymentStatus::Error,
            _ => PaymentStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Processed | PaymentStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Unknown => 0,
            PaymentStatus::Wait | PaymentStatus::QrTokenCreated => 1,
            PaymentStatus::RemotePaymentCreated => 2,
            PaymentStatus::Processed | PaymentStatus::Error => 3,
        }
    }

    /// Допустим ли переход `self → next`. Из терминального состояния выйти нельзя,
    /// повторное наблюдение того же статуса допустимо.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        if *self == next || *self == PaymentStatus::Unknown || next == PaymentStatus::Unknown {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == PaymentStatus::Error {
            return true;
        }
        // Ссылочный платёж не может перейти в Wait и наоборот
        if matches!(
            (self, next),
            (PaymentStatus::Wait, PaymentStatus::RemotePaymentCreated)
                | (PaymentStatus::QrTokenCreated, PaymentStatus::Wait)
                | (PaymentStatus::RemotePaymentCreated, PaymentStatus::Wait)
        ) {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl From<String> for PaymentStatus {
    fn from(raw: String) -> Self {
        PaymentStatus::parse(&raw)
    }
}

impl From<PaymentStatus> for String {
    fn from(status: PaymentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::PaymentStatus::*;
    use super::*;

    #[test]
    fn phone_payment_lifecycle() {
        assert!(Wait.can_transition_to(Processed));
        assert!(Wait.can_transition_to(Error));
        assert!(!Wait.can_transition_to(RemotePaymentCreated));
    }

    #[test]
    fn link_payment_lifecycle() {
        assert!(QrTokenCreated.can_transition_to(RemotePaymentCreated));
        assert!(RemotePaymentCreated.can_transition_to(Processed));
        assert!(!RemotePaymentCreated.can_transition_to(QrTokenCreated));
        assert!(!RemotePaymentCreated.can_transition_to(Wait));
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(!Processed.can_transition_to(Wait));
        assert!(!Processed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Processed));
        assert!(Processed.can_transition_to(Processed));
    }

    #[test]
    fn unrecognized_gateway_status_is_unknown() {
        assert_eq!(PaymentStatus::parse("Cancelled"), Unknown);
        let parsed: PaymentStatus = serde_json::from_str("\"Processed\"").unwrap();
        assert_eq!(parsed, Processed);
        assert_eq!(serde_json::to_string(&Wait).unwrap(), "\"Wait\"");
    }
}
