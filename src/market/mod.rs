pub mod ledger;
pub mod price;
