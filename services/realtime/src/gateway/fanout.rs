//! Best-effort delivery of one event to every live connection of a user set

use tracing::debug;
use uuid::Uuid;

use super::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Push `event` to every connection currently bound to one of `users`,
/// skipping `exclude`. Returns the number of connections that accepted it.
///
/// Targets are a snapshot taken per user; a connection that closes in
/// between is skipped without retry.
pub fn deliver<'a, I>(
    registry: &ConnectionRegistry,
    users: I,
    event: &ServerEvent,
    exclude: Option<Uuid>,
) -> usize
where
    I: IntoIterator<Item = &'a Uuid>,
{
    let mut delivered = 0;
    for user_id in users {
        if Some(*user_id) == exclude {
            continue;
        }
        for handle in registry.connections_for(*user_id) {
            if handle.send(event.clone()) {
                delivered += 1;
            } else {
                debug!(
                    user_id = %user_id,
                    connection_id = %handle.id(),
                    "Skipped {} for closed connection",
                    event.name()
                );
            }
        }
    }
    delivered
}

/// Push `event` to every bound connection. Unauthenticated connections are
/// not reachable.
pub fn broadcast(registry: &ConnectionRegistry, event: &ServerEvent) -> usize {
    registry
        .all_connections()
        .into_iter()
        .filter(|handle| handle.send(event.clone()))
        .count()
}
