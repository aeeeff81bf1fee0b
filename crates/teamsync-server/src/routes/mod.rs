pub mod subscribe;
pub mod teams;
pub mod users;
