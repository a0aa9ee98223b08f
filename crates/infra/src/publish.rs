//! Publish-after-commit.
//!
//! Engines record every applied domain event in an [`Outbox`] while the store
//! transaction runs. Only once the transaction has committed is the outbox
//! flushed to the bus. If the transaction rolls back the outbox is dropped, so
//! nothing is published for changes that never happened.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use agroledger_core::{Aggregate, AggregateId, DomainError};
use agroledger_events::{EnvelopeHeader, Event, EventBus, EventEnvelope};

use crate::error::LedgerError;

pub const INPUT_AGGREGATE: &str = "inventory.input";
pub const REMITTANCE_AGGREGATE: &str = "reception.remittance";
pub const ALERT_AGGREGATE: &str = "alerts.alert";

#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one committed-to-be event. `sequence_number` is the aggregate
    /// version reached by applying it.
    pub fn record<E>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        sequence_number: u64,
        event: &E,
    ) -> Result<(), LedgerError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            LedgerError::Publish(format!(
                "failed to serialize {}: {e}",
                event.event_type()
            ))
        })?;
        let header = EnvelopeHeader {
            event_id: Uuid::now_v7(),
            firm_id: event.firm_id(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            sequence_number,
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
        };
        self.envelopes.push(EventEnvelope::new(header, payload));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Publish every recorded envelope in order. Call only after commit.
    ///
    /// A rejected envelope does not stop the rest from going out; all
    /// failures are reported together once the outbox is drained.
    pub fn publish<B>(self, bus: &B) -> Result<(), LedgerError>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let mut failures = Vec::new();
        for envelope in self.envelopes {
            let event_type = envelope.event_type().to_string();
            let aggregate_id = envelope.aggregate_id();
            if let Err(e) = bus.publish(envelope) {
                warn!(%event_type, %aggregate_id, error = ?e, "event publication failed");
                failures.push(format!("{event_type} ({aggregate_id}): {e:?}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Publish(failures.join("; ")))
        }
    }
}

/// Decide and apply `command` on `aggregate`, recording each applied event.
///
/// Returns the applied events; an empty vector means the command was a no-op.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    outbox: &mut Outbox,
) -> Result<Vec<A::Event>, LedgerError>
where
    A: Aggregate<Error = DomainError>,
    A::Event: Event + Serialize,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
        outbox.record(aggregate_id, aggregate_type, aggregate.version(), event)?;
    }
    Ok(events)
}
