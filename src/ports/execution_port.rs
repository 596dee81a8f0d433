//! Order execution port trait.

use crate::domain::execution::{Balance, ExecutionError, Fill, OrderRequest};
use crate::domain::snapshot::Venue;

pub trait OrderExecutionClient {
    fn execute(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError>;
    fn balance(&self, venue: Venue) -> Result<Balance, ExecutionError>;
}

impl<C: OrderExecutionClient + ?Sized> OrderExecutionClient for Box<C> {
    fn execute(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        (**self).execute(order)
    }

    fn balance(&self, venue: Venue) -> Result<Balance, ExecutionError> {
        (**self).balance(venue)
    }
}
