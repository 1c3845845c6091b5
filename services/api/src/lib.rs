pub mod config;
pub mod db;
pub mod routes;

pub use routes::router;
