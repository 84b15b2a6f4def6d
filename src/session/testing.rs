//! Actor test helpers.

use crate::protocol::ServerEvent;
use actix::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub type Events = Arc<Mutex<Vec<ServerEvent>>>;

/// Stands in for a client connection and records what it receives.
struct Collector {
    events: Events,
}

impl Actor for Collector {
    type Context = Context<Self>;
}

impl Handler<ServerEvent> for Collector {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, _ctx: &mut Self::Context) {
        self.events.lock().push(msg);
    }
}

pub fn collector() -> (Recipient<ServerEvent>, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let addr = Collector {
        events: events.clone(),
    }
    .start();
    (addr.recipient(), events)
}

/// Let queued messages and spawned futures run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Poll until `predicate` holds for the recorded events, or panic after two seconds.
pub async fn wait_for(events: &Events, what: &str, predicate: impl Fn(&[ServerEvent]) -> bool) {
    for _ in 0..200 {
        if predicate(&events.lock()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}: {:#?}", what, events.lock());
}

pub fn names(events: &Events) -> Vec<&'static str> {
    events.lock().iter().map(ServerEvent::name).collect()
}
