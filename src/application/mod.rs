pub mod driver;
pub mod manager;

pub use driver::{ChessnutDriver, PositionListener};
pub use manager::{AutoConnectConfig, DriverManager};
