//! Catalog entities: product types, attributes, products and their variants.
pub mod attribute_choice_value;
pub mod product;
pub mod product_attribute;
pub mod product_type;
pub mod product_variant;

pub use attribute_choice_value::{Entity as AttributeChoiceValue, Model as AttributeChoiceValueModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_attribute::{Entity as ProductAttribute, Model as ProductAttributeModel};
pub use product_type::{Entity as ProductType, Model as ProductTypeModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
