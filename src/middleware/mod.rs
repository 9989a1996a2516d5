pub mod payment;

pub use payment::{require_payment, PaymentGate};
