//! Request/response correlation for bidirectional, order-insensitive streams.
//!
//! Calls whose outbound stream carries many independent logical requests tag
//! each one with a numeric id. On drain, every request about to be sent is
//! recorded here with an empty response slot; inbound results (tagged with
//! the same ids, possibly batched or out of order) are matched back into
//! their slots. A lookup therefore distinguishes three cases: answered,
//! requested-but-unanswered, and never requested - the last one is an error.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One tracked request and, once it arrived, the result it produced.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Exchange<Req, Res> {
    pub request: Req,
    pub response: Option<Res>,
}

/// Id-keyed map of in-flight and completed exchanges, scoped to one call.
#[derive(Debug)]
pub struct CorrelationMap<Req, Res> {
    entries: BTreeMap<u64, Exchange<Req, Res>>,
    counter: u64,
}

impl<Req, Res> Default for CorrelationMap<Req, Res> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            counter: 0,
        }
    }
}

impl<Req, Res> CorrelationMap<Req, Res> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused id. Caller-assigned ids are skipped over so
    /// assignment stays monotonically increasing and collision free.
    pub fn next_id(&mut self) -> u64 {
        loop {
            self.counter += 1;
            if !self.entries.contains_key(&self.counter) {
                return self.counter;
            }
        }
    }

    /// Records a request about to be sent. Re-recording an id replaces the
    /// previous exchange, dropping any stale response.
    pub fn record(&mut self, id: u64, request: Req) {
        self.counter = self.counter.max(id);
        self.entries.insert(
            id,
            Exchange {
                request,
                response: None,
            },
        );
    }

    /// Matches an inbound result into the slot its id names.
    ///
    /// # Errors
    ///
    /// [`Error::Correlation`] when no request was ever recorded under `id`.
    pub fn resolve(&mut self, id: u64, response: Res) -> Result<()> {
        match self.entries.get_mut(&id) {
            Some(exchange) => {
                exchange.response = Some(response);
                Ok(())
            }
            None => Err(Error::Correlation(id)),
        }
    }

    /// Looks up the exchange recorded under `id`.
    ///
    /// A present exchange with `response: None` means "not yet answered";
    /// an absent id is a [`Error::Correlation`] failure.
    pub fn lookup(&self, id: u64) -> Result<&Exchange<Req, Res>> {
        self.entries.get(&id).ok_or(Error::Correlation(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Exchange<Req, Res>)> {
        self.entries.iter().map(|(id, exchange)| (*id, exchange))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every tracked exchange. The id counter keeps running so ids are
    /// never reused within one call.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Correlation state shared between the drain hook, the response handler and
/// the front end.
pub type SharedCorrelation<Req, Res> = Arc<Mutex<CorrelationMap<Req, Res>>>;

/// Convenience constructor for a [`SharedCorrelation`].
pub fn shared<Req, Res>() -> SharedCorrelation<Req, Res> {
    Arc::new(Mutex::new(CorrelationMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanswered_and_unknown_are_distinct() {
        let mut map: CorrelationMap<&str, &str> = CorrelationMap::new();
        map.record(1, "a");
        map.record(2, "b");
        map.record(3, "c");
        map.resolve(2, "b-result").expect("id 2 was recorded");

        assert_eq!(map.lookup(2).unwrap().response, Some("b-result"));
        assert_eq!(map.lookup(1).unwrap().response, None);
        assert_eq!(map.lookup(3).unwrap().response, None);
        assert_eq!(map.lookup(4), Err(Error::Correlation(4)));
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let mut map: CorrelationMap<&str, &str> = CorrelationMap::new();
        assert_eq!(map.resolve(7, "x"), Err(Error::Correlation(7)));
    }

    #[test]
    fn assigned_ids_skip_caller_supplied_ones() {
        let mut map: CorrelationMap<&str, &str> = CorrelationMap::new();
        assert_eq!(map.next_id(), 1);
        map.record(1, "a");
        // Caller jumps ahead; assignment continues past it.
        map.record(5, "e");
        assert_eq!(map.next_id(), 6);
    }

    #[test]
    fn clear_keeps_the_counter_running() {
        let mut map: CorrelationMap<&str, &str> = CorrelationMap::new();
        let first = map.next_id();
        map.record(first, "a");
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.next_id(), first + 1);
    }
}
