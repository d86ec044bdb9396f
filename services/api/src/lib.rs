pub mod bounded_contexts;
pub mod router;
pub mod shared;
