pub mod calculator;
pub mod collateral;
pub mod state;
pub mod vendors;
