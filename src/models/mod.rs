pub mod order;
pub mod rider;
pub mod tracking;
