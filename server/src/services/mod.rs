// server/src/services/mod.rs

pub mod cart_sweeper;
pub mod gateway_mock;

pub use cart_sweeper::spawn_cart_sweeper;
pub use gateway_mock::{MockGateway, MockSettlement};
