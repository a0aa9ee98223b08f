//! Decide/apply contract shared by the ledger's aggregates (inputs,
//! remittances, alerts).

/// Identity and version of a persisted aggregate.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far. Stores compare it on write and the
    /// outbox stamps it on envelopes as the sequence number.
    fn version(&self) -> u64;
}

/// What a store write expects to find before it overwrites a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    /// Insert only.
    New,
    /// The stored record must still be at this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `stored` is the current version, or `None` when no record exists.
    pub fn matches(self, stored: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::New => stored.is_none(),
            ExpectedVersion::Exact(version) => stored == Some(version),
        }
    }
}

/// Pure decision logic plus state evolution. No IO.
///
/// The engines load an aggregate inside a store transaction, call `handle`,
/// `apply` each returned event and save the aggregate in that same
/// transaction. An empty event list means the command changed nothing.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Fold one event into state. Bumps the version.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        events.iter().for_each(|event| self.apply(event));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matching() {
        assert!(ExpectedVersion::Any.matches(None));
        assert!(ExpectedVersion::Any.matches(Some(7)));
        assert!(ExpectedVersion::New.matches(None));
        assert!(!ExpectedVersion::New.matches(Some(1)));
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
    }
}
