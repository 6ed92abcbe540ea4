/// Persistence entities for the checkout/payment core
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{
    Entity as Order, FulfillmentStatus, Model as OrderModel, OrderStatus, PaymentState,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, GatewayKind, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
