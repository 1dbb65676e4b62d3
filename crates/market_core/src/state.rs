//! Orchestrator state and the reducer that is the only way to change it.

use alloy_primitives::Address;
use shared::domain::{Listing, Purchase};

use crate::MarketEvent;

/// Read-only view of the orchestrator state handed to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketState {
    pub account: Option<Address>,
    pub loading: bool,
    pub listings: Option<Vec<Listing>>,
    pub purchases: Option<Vec<Purchase>>,
}

impl MarketState {
    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}

/// Tickets order snapshot reads by the moment they were issued.
pub type ReadTicket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    AccountAdopted(Address),
    AccountCleared,
    LoadingSet(bool),
    ListingsReplaced {
        ticket: ReadTicket,
        listings: Vec<Listing>,
    },
    PurchasesReplaced {
        ticket: ReadTicket,
        purchases: Vec<Purchase>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: MarketState,
    listings_ticket: Option<ReadTicket>,
    purchases_ticket: Option<ReadTicket>,
}

impl StateCell {
    pub(crate) fn state(&self) -> &MarketState {
        &self.state
    }

    /// Applies `change` and returns the event to publish, or `None` when the
    /// change was a no-op or a snapshot older than the one already held.
    pub(crate) fn apply(&mut self, change: StateChange) -> Option<MarketEvent> {
        match change {
            StateChange::AccountAdopted(account) => {
                if self.state.account == Some(account) {
                    return None;
                }
                self.state.account = Some(account);
                Some(MarketEvent::AccountChanged(Some(account)))
            }
            StateChange::AccountCleared => {
                self.state.account.take()?;
                Some(MarketEvent::AccountChanged(None))
            }
            StateChange::LoadingSet(loading) => {
                if self.state.loading == loading {
                    return None;
                }
                self.state.loading = loading;
                Some(MarketEvent::LoadingChanged(loading))
            }
            StateChange::ListingsReplaced { ticket, listings } => {
                if is_stale(self.listings_ticket, ticket) {
                    return None;
                }
                self.listings_ticket = Some(ticket);
                self.state.listings = Some(listings.clone());
                Some(MarketEvent::ListingsUpdated(listings))
            }
            StateChange::PurchasesReplaced { ticket, purchases } => {
                if is_stale(self.purchases_ticket, ticket) {
                    return None;
                }
                self.purchases_ticket = Some(ticket);
                self.state.purchases = Some(purchases.clone());
                Some(MarketEvent::PurchasesUpdated(purchases))
            }
        }
    }
}

fn is_stale(held: Option<ReadTicket>, incoming: ReadTicket) -> bool {
    held.is_some_and(|held| incoming < held)
}
