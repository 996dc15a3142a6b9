//! Events plugins (and the control surface) hand to the daemon, and the
//! bus that carries them to the control thread.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::Config;

/// A request to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The emitting plugin's settings fragment changed; the schema must be rebuilt.
    Settings,
    /// Insert a profile, or merge into the existing one of the same name.
    Profile { name: String, config: Config },
    /// Merge the named profile into the live Config.
    Apply { name: String },
    /// Merge a partial tree into the live Config.
    State { config: Config },
}

impl Event {
    pub fn profile(name: impl Into<String>, config: Config) -> Self {
        Self::Profile {
            name: name.into(),
            config,
        }
    }

    pub fn apply(name: impl Into<String>) -> Self {
        Self::Apply { name: name.into() }
    }

    pub fn state(config: Config) -> Self {
        Self::State { config }
    }
}

struct Shared {
    events: Mutex<Vec<Event>>,
    wake: Arc<Notify>,
}

/// Multi-producer, single-consumer event buffer.
///
/// The bus itself is owned by the control thread; producers hold
/// [`Emitter`] clones. Draining takes `&mut self`, so at most one drain can
/// run at a time.
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_wake(Arc::new(Notify::new()))
    }

    /// Build a bus that signals `wake` on every emission, so the control loop
    /// can wait on one condition for events and reload requests alike.
    pub fn with_wake(wake: Arc<Notify>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(Vec::new()),
                wake,
            }),
        }
    }

    pub fn emitter(&self) -> Emitter {
        Emitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Swap the buffer for an empty one and return what was queued, in
    /// emission order. With `block`, waits until at least one event exists.
    pub async fn get_events(&mut self, block: bool) -> Vec<Event> {
        loop {
            {
                let mut events = self.shared.events.lock();
                if !block || !events.is_empty() {
                    return std::mem::take(&mut *events);
                }
            }
            self.shared.wake.notified().await;
        }
    }

    pub fn has_events(&self) -> bool {
        !self.shared.events.lock().is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-only, thread-safe handle for submitting events.
#[derive(Clone)]
pub struct Emitter {
    shared: Arc<Shared>,
}

impl Emitter {
    pub fn emit(&self, event: Event) {
        self.shared.events.lock().push(event);
        self.shared.wake.notify_one();
    }

    /// Append a batch atomically: no other producer's events interleave with it.
    pub fn emit_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        let appended = {
            let mut queue = self.shared.events.lock();
            let before = queue.len();
            queue.extend(events);
            queue.len() > before
        };
        if appended {
            self.shared.wake.notify_one();
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn tagged(producer: usize, seq: usize) -> Event {
        Event::apply(format!("{producer}:{seq}"))
    }

    fn parse(event: &Event) -> (usize, usize) {
        let Event::Apply { name } = event else {
            panic!("unexpected event {event:?}");
        };
        let (p, s) = name.split_once(':').expect("tag");
        (p.parse().unwrap(), s.parse().unwrap())
    }

    #[tokio::test]
    async fn drain_preserves_emission_order() {
        let mut bus = EventBus::new();
        let emit = bus.emitter();
        emit.emit(Event::Settings);
        emit.emit_all([Event::apply("a"), Event::apply("b")]);
        emit.emit(Event::state(Config::new()));

        assert!(bus.has_events());
        let events = bus.get_events(false).await;
        assert_eq!(
            events,
            vec![
                Event::Settings,
                Event::apply("a"),
                Event::apply("b"),
                Event::state(Config::new()),
            ]
        );
        assert!(!bus.has_events());
        assert!(bus.get_events(false).await.is_empty(), "drained exactly once");
    }

    #[tokio::test]
    async fn concurrent_producers_lose_nothing_and_keep_per_producer_order() {
        let mut bus = EventBus::new();
        let producers = 4;
        let per_producer = 250;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let emit = bus.emitter();
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        emit.emit(tagged(p, seq));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = bus.get_events(false).await;
        assert_eq!(events.len(), producers * per_producer);

        let mut next = vec![0usize; producers];
        for event in &events {
            let (p, seq) = parse(event);
            assert_eq!(seq, next[p], "producer {p} reordered");
            next[p] += 1;
        }
    }

    #[tokio::test]
    async fn blocking_drain_waits_for_an_event() {
        let mut bus = EventBus::new();
        let emit = bus.emitter();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            emit.emit(Event::apply("late"));
        });

        let events = tokio::time::timeout(Duration::from_secs(5), bus.get_events(true))
            .await
            .expect("blocking drain returned");
        assert_eq!(events, vec![Event::apply("late")]);
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn non_blocking_drain_on_empty_bus_returns_immediately() {
        let mut bus = EventBus::new();
        assert!(bus.get_events(false).await.is_empty());
    }

    #[test]
    fn empty_batch_does_not_wake() {
        let bus = EventBus::new();
        bus.emitter().emit_all(Vec::new());
        assert!(!bus.has_events());
    }
}
