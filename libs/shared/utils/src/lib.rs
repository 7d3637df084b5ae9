pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod notification;
pub mod retry;
pub mod test_utils;
