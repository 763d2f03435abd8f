use std::collections::HashSet;

use crate::models::event::{NewTicketType, TicketType};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Ticket type not found")]
    TicketTypeNotFound,

    #[error("No tickets available for this type")]
    SoldOut,

    #[error("An event needs at least one ticket type")]
    NoTicketTypes,

    #[error("Ticket type name is required")]
    EmptyName,

    #[error("Duplicate ticket type: {0}")]
    DuplicateName(String),

    #[error("Ticket type {0} must have a non-negative price and quantity")]
    NegativeValue(String),
}

pub fn find<'a>(ticket_types: &'a [TicketType], name: &str) -> Result<&'a TicketType, InventoryError> {
    ticket_types
        .iter()
        .find(|t| t.name == name)
        .ok_or(InventoryError::TicketTypeNotFound)
}

/// Fails fast before any write when the type is missing or sold out
pub fn check_available<'a>(
    ticket_types: &'a [TicketType],
    name: &str,
) -> Result<&'a TicketType, InventoryError> {
    let ticket_type = find(ticket_types, name)?;
    if ticket_type.available_quantity <= 0 {
        return Err(InventoryError::SoldOut);
    }
    Ok(ticket_type)
}

/// Takes one unit and returns the price to capture on the ticket.
/// The Postgres store does this in SQL; see `TicketType::reserve_one`.
#[cfg(test)]
pub(crate) fn reserve(ticket_types: &mut [TicketType], name: &str) -> Result<i64, InventoryError> {
    let ticket_type = ticket_types
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or(InventoryError::TicketTypeNotFound)?;

    if ticket_type.available_quantity <= 0 {
        return Err(InventoryError::SoldOut);
    }

    ticket_type.available_quantity -= 1;

    Ok(ticket_type.price)
}

/// Returns one unit, capped at the type's total
#[cfg(test)]
pub(crate) fn release(ticket_types: &mut [TicketType], name: &str) -> Result<(), InventoryError> {
    let ticket_type = ticket_types
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or(InventoryError::TicketTypeNotFound)?;

    ticket_type.available_quantity = (ticket_type.available_quantity + 1).min(ticket_type.total_quantity);

    Ok(())
}

pub fn validate_new(ticket_types: &[NewTicketType]) -> Result<(), InventoryError> {
    if ticket_types.is_empty() {
        return Err(InventoryError::NoTicketTypes);
    }

    let mut seen = HashSet::new();
    for ticket_type in ticket_types {
        let name = ticket_type.name.trim();
        if name.is_empty() {
            return Err(InventoryError::EmptyName);
        }
        if ticket_type.price < 0 || ticket_type.total_quantity < 0 {
            return Err(InventoryError::NegativeValue(name.to_string()));
        }
        if !seen.insert(name) {
            return Err(InventoryError::DuplicateName(name.to_string()));
        }
    }

    Ok(())
}
