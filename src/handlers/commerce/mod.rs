pub mod carts;
pub mod checkout;
pub mod products;
