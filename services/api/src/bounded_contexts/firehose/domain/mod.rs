pub mod commit;
pub mod cursor;
pub mod repository;
