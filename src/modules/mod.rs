//! Stablewatch scanning modules

pub mod cursor_store;
pub mod supply_scanner;
pub mod whale_registry;
pub mod whale_scanner;

pub use cursor_store::CursorStore;
pub use supply_scanner::SupplyScanner;
pub use whale_registry::WhaleRegistry;
pub use whale_scanner::WhaleScanner;
