use crate::SharedAppState;
use axum::Router;
use axum::routing::any;

pub mod webhook;

pub fn router() -> Router<SharedAppState> {
    Router::new().route("/webhook", any(webhook::handler))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Ready,
    Paid,
    Failed,
    Cancelled,
    PartialCancelled,
    PayPending,
    VirtualAccountIssued,
    Other,
}

impl From<&str> for PaymentStatus {
    fn from(value: &str) -> Self {
        match value {
            "READY" => PaymentStatus::Ready,
            "PAID" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            "CANCELLED" => PaymentStatus::Cancelled,
            "PARTIAL_CANCELLED" => PaymentStatus::PartialCancelled,
            "PAY_PENDING" => PaymentStatus::PayPending,
            "VIRTUAL_ACCOUNT_ISSUED" => PaymentStatus::VirtualAccountIssued,
            _ => PaymentStatus::Other,
        }
    }
}

impl From<Option<&str>> for PaymentStatus {
    fn from(value: Option<&str>) -> Self {
        value.map_or(PaymentStatus::Other, PaymentStatus::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_paid_is_paid() {
        assert_eq!(PaymentStatus::from("PAID"), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from("paid"), PaymentStatus::Other);
        assert_eq!(PaymentStatus::from(" PAID"), PaymentStatus::Other);
        assert_eq!(PaymentStatus::from(None), PaymentStatus::Other);
        assert_eq!(PaymentStatus::from(Some("CANCELLED")), PaymentStatus::Cancelled);
    }
}
