// Models module - Database entity representations

pub mod event;
pub mod ticket;
pub mod user;

pub use event::{Event, EventStatus, TicketType};
pub use ticket::{Ticket, TicketStatus, TransferRecord};
pub use user::{Role, User};
