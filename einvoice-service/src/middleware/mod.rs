pub mod credential;
pub mod user_id;

pub use credential::AuthorityToken;
pub use user_id::CallerId;
