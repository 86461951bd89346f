//! Stock response handlers.
//!
//! A call's response handler is a plain reassignable closure invoked once per
//! inbound message - no dispatch hierarchy, just a stored `FnMut`. Different
//! services want different defaults: a unary version probe keeps the last
//! answer, a capability exchange accumulates, a route-programming stream
//! matches results back by id. Handlers must not fail; a miss inside one is
//! logged and swallowed, because a defect in presentation is not a call-level
//! failure.

use crate::correlate::SharedCorrelation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Invoked once per inbound message, in transport order.
pub type ResponseHandler<Resp> = Box<dyn FnMut(Resp) + Send + 'static>;

/// Shared slot holding the most recent response.
pub type Stored<Resp> = Arc<Mutex<Option<Resp>>>;

/// Shared list of every response received so far.
pub type Collected<Resp> = Arc<Mutex<Vec<Resp>>>;

/// Keeps only the most recent response. Returns the handler and the shared
/// slot the front end reads from.
pub fn store_last<Resp: Send + 'static>() -> (ResponseHandler<Resp>, Stored<Resp>) {
    let slot: Stored<Resp> = Arc::new(Mutex::new(None));
    let writer = Arc::clone(&slot);
    let handler: ResponseHandler<Resp> = Box::new(move |resp| {
        *writer.lock() = Some(resp);
    });
    (handler, slot)
}

/// Appends every response to a shared list.
pub fn accumulate<Resp: Send + 'static>() -> (ResponseHandler<Resp>, Collected<Resp>) {
    let list: Collected<Resp> = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&list);
    let handler: ResponseHandler<Resp> = Box::new(move |resp| {
        writer.lock().push(resp);
    });
    (handler, list)
}

/// Matches id-tagged results carried by each inbound message back into a
/// shared correlation map.
///
/// `extract` splits one inbound message into its `(id, result)` entries; a
/// result naming an id that was never recorded is logged and dropped rather
/// than raised.
pub fn correlate<Req, Resp, Res, F>(
    map: SharedCorrelation<Req, Res>,
    extract: F,
) -> ResponseHandler<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Res: Send + 'static,
    F: Fn(&Resp) -> Vec<(u64, Res)> + Send + 'static,
{
    Box::new(move |resp| {
        let mut map = map.lock();
        for (id, result) in extract(&resp) {
            if let Err(e) = map.resolve(id, result) {
                tracing::warn!("discarding unmatched result: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate;

    #[test]
    fn store_last_overwrites() {
        let (mut handler, slot) = store_last::<u32>();
        handler(1);
        handler(2);
        assert_eq!(*slot.lock(), Some(2));
    }

    #[test]
    fn accumulate_keeps_order() {
        let (mut handler, list) = accumulate::<&str>();
        handler("a");
        handler("b");
        assert_eq!(*list.lock(), vec!["a", "b"]);
    }

    #[test]
    fn correlate_matches_by_id_and_drops_unknown() {
        let map = correlate::shared::<&str, &str>();
        map.lock().record(1, "req-1");
        // One inbound message carrying a known and an unknown result.
        let mut handler = super::correlate(Arc::clone(&map), |resp: &Vec<(u64, &str)>| resp.clone());
        handler(vec![(1, "ok"), (9, "stray")]);

        let map = map.lock();
        assert_eq!(map.lookup(1).unwrap().response, Some("ok"));
        assert!(map.lookup(9).is_err());
    }
}
