use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agroledger_core::{AggregateId, FirmId};

/// Where a committed event sits: which firm, which aggregate stream, and at
/// which version of that stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub event_id: Uuid,
    pub firm_id: FirmId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Aggregate version reached by applying the event.
    pub sequence_number: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
}

/// A committed event as seen by bus consumers.
///
/// Consumers filter on `firm_id` before looking at the payload; an envelope
/// never crosses firms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    #[serde(flatten)]
    header: EnvelopeHeader,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(header: EnvelopeHeader, payload: E) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    pub fn event_id(&self) -> Uuid {
        self.header.event_id
    }

    pub fn firm_id(&self) -> FirmId {
        self.header.firm_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.header.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.header.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.header.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.header.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap a transformed payload under the same header.
    pub fn map_payload<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            header: self.header,
            payload: f(self.payload),
        }
    }
}
