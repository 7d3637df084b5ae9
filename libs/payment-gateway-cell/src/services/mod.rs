pub mod vnpay;

pub use vnpay::VnPayGateway;
