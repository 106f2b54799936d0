use crate::cycle::CycleToken;

/// An event tagged with the cycle that was live when it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<E> {
    pub cycle: Option<CycleToken>,
    pub event: E,
}

/// Ordered buffer of events for a single consumer.
///
/// Producers push; the consumer drains in emission order.
#[derive(Debug)]
pub struct EventBus<E> {
    events: Vec<Stamped<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, cycle: Option<CycleToken>, event: E) {
        self.events.push(Stamped { cycle, event });
    }

    pub fn events(&self) -> &[Stamped<E>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Stamped<E>> {
        std::mem::take(&mut self.events)
    }
}
