pub mod delivery;
pub mod lead;
pub mod order;
pub mod quota;
