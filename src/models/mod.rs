pub mod circuit_breaker;
pub mod email;
pub mod fcm;
pub mod health;
pub mod message;
pub mod record;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
pub mod user;
pub mod validation;
