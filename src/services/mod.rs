/// Business logic for the checkout/payment core
pub mod carts;
pub mod checkout;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;

pub use carts::{AddItemInput, CartIssue, CartOwner, CartService, CartWithItems};
pub use checkout::{Address, CheckoutService, CreateOrderInput, CustomerInfo};
pub use inventory::StockLedger;
pub use orders::{OrderFilter, OrderPage, OrderService, OrderWithItems, TrackingInput};
pub use payments::{
    ConfirmPaymentInput, CreatePaymentInput, CreatedPayment, PaymentService, WebhookOutcome,
};
pub use pricing::{totals, PricedLine, Totals};
