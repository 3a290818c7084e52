pub mod model;
pub mod repository;

pub use model::{PaymentStatus, Purchase};
pub use repository::{FakePurchaseRepository, PgPurchaseRepository, PurchaseRepository};
