mod auth;
mod client;

pub use auth::{AccessToken, TokenClient, TokenError};
pub use client::{FileItem, FileList, MoveitClient, MoveitError, Paging, UserProfile};
