pub mod gateway;
pub mod repositories;
pub mod signature;
