pub mod address;
pub mod catalog;
pub mod commerce;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod user;

pub use order::OrderStatus;
pub use payment::PaymentStatus;
