pub mod conversation;
pub mod identity;
pub mod rate_limit;
pub mod research;
pub mod study;
