// Services module - Business logic

pub mod accounts;
pub mod credentials;
pub mod events;
pub mod inventory;
pub mod lifecycle;
pub mod policy;
pub mod qr_generator;
pub mod ticketing;
