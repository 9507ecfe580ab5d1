//! User accounts and credential verification.

mod models;
mod repository;
mod service;

pub use models::{AddEditUserRequest, User, UserInfo};
pub use repository::UserRepository;
pub use service::UserService;
