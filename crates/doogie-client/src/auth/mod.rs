pub mod auth_service;
pub mod jwt;
pub mod token_store;

pub use auth_service::AuthService;
pub use token_store::{TokenLifetime, TokenPair, TokenStore};
