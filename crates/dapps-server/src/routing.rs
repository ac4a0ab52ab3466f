//! Next-hop resolution for outbound messages.

use dapps_shared::constants::DEFAULT_ROUTE;
use dapps_shared::types::{destination_system, same_station};
use dapps_store::{Database, Neighbour, RouteHint};

use crate::error::RoutingError;

/// Snapshot of neighbours and route hints taken at the start of a sweep.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    neighbours: Vec<Neighbour>,
    hints: Vec<RouteHint>,
}

impl RoutingTable {
    pub fn new(neighbours: Vec<Neighbour>, hints: Vec<RouteHint>) -> Self {
        Self { neighbours, hints }
    }

    pub fn load(db: &Database) -> dapps_store::Result<Self> {
        Ok(Self::new(db.list_neighbours()?, db.list_route_hints()?))
    }

    /// Pick the neighbour a message for `destination` should be handed to.
    ///
    /// Precedence: a neighbour that is the destination itself, then a hint
    /// for the destination's system, then the `*` hint.
    pub fn resolve_next_hop(&self, destination: &str) -> Result<&Neighbour, RoutingError> {
        if let Some(direct) = self.neighbour(destination) {
            return Ok(direct);
        }

        let system = destination_system(destination);
        let hint = self
            .hint(system)
            .or_else(|| self.hint(DEFAULT_ROUTE))
            .ok_or_else(|| RoutingError::NoRoute {
                destination: destination.to_string(),
            })?;

        self.neighbour(&hint.next_hop)
            .ok_or_else(|| RoutingError::UnknownNeighbour {
                destination: destination.to_string(),
                next_hop: hint.next_hop.clone(),
            })
    }

    fn neighbour(&self, callsign: &str) -> Option<&Neighbour> {
        self.neighbours
            .iter()
            .find(|n| same_station(&n.callsign, callsign))
    }

    fn hint(&self, system: &str) -> Option<&RouteHint> {
        self.hints
            .iter()
            .find(|h| h.destination.eq_ignore_ascii_case(system))
    }
}
