pub mod model;
pub mod repository;

pub use model::{PurchaseSlot, ReclaimKind, SlotStatus};
pub use repository::{FakeSlotRepository, PgSlotRepository, SlotRepository};
