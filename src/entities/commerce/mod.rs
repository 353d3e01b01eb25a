/// Commerce entities module
pub mod cart;
pub mod cart_line;

pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_line::{Entity as CartLine, Model as CartLineModel};
