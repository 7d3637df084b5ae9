pub mod booking;
pub mod lifecycle;
pub mod providers;
pub mod slot;
pub mod store;

pub use booking::BookingCoordinator;
pub use lifecycle::BookingLifecycle;
pub use providers::{InMemoryProviderDirectory, ProviderDirectory, SupabaseProviderDirectory};
pub use slot::SlotAllocator;
pub use store::{BookingStore, InMemoryBookingStore, SupabaseBookingStore};
