pub mod cart_service;
pub mod checkout_service;

pub use cart_service::{AddToCartInput, CartLineView, CartService, CartView};
pub use checkout_service::CheckoutService;
