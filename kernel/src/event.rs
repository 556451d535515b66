use crate::arch::IsrGuard;
use crate::space::Space;
use crate::EVENT_MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventState {
    Reset,
    Set,
}

/// Binary signal. A manual-reset event stays set until reset explicitly;
/// an auto-reset event is consumed by the first wait that observes it.
#[derive(Debug)]
pub(crate) struct Event {
    state: EventState,
    manual_reset: bool,
    name: Option<&'static str>,
}

#[derive(Debug, Default)]
pub(crate) struct EventTable {
    data: Space<Event, EVENT_MAX>,
}

impl EventTable {
    /// Events are created in the reset state.
    pub fn create(&mut self, manual_reset: bool, name: Option<&'static str>) -> Option<usize> {
        let _guard = IsrGuard::new();
        self.data.push(Event {
            state: EventState::Reset,
            manual_reset,
            name,
        })
    }

    /// Look up a named event.
    pub fn open(&self, name: &str) -> Option<usize> {
        let _guard = IsrGuard::new();
        self.data
            .entries()
            .find(|(_, event)| event.name == Some(name))
            .map(|(id, _)| id)
    }

    pub fn destroy(&mut self, id: usize) {
        let _guard = IsrGuard::new();
        self.data.remove(id);
    }

    pub fn set(&mut self, id: usize) {
        let _guard = IsrGuard::new();
        if let Some(event) = self.data.get_mut(id) {
            event.state = EventState::Set;
        }
    }

    pub fn reset(&mut self, id: usize) {
        let _guard = IsrGuard::new();
        if let Some(event) = self.data.get_mut(id) {
            event.state = EventState::Reset;
        }
    }

    /// Reset as part of a wait consuming the signal. Manual-reset events
    /// are left alone.
    pub fn consume(&mut self, id: usize) {
        let _guard = IsrGuard::new();
        if let Some(event) = self.data.get_mut(id) {
            if !event.manual_reset {
                event.state = EventState::Reset;
            }
        }
    }

    /// `None` when the slot holds no event (stale handle).
    pub fn is_signaled(&self, id: usize) -> Option<bool> {
        let _guard = IsrGuard::new();
        self.data.get(id).map(|e| e.state == EventState::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reset_cycle() {
        let mut events = EventTable::default();
        let id = events.create(false, None).unwrap();
        assert_eq!(events.is_signaled(id), Some(false));
        events.set(id);
        assert_eq!(events.is_signaled(id), Some(true));
        events.reset(id);
        assert_eq!(events.is_signaled(id), Some(false));
    }

    #[test]
    fn consume_resets_only_auto_reset_events() {
        let mut events = EventTable::default();
        let auto = events.create(false, None).unwrap();
        let manual = events.create(true, None).unwrap();
        events.set(auto);
        events.set(manual);

        events.consume(auto);
        events.consume(manual);
        assert_eq!(events.is_signaled(auto), Some(false));
        assert_eq!(events.is_signaled(manual), Some(true));
    }

    #[test]
    fn open_finds_named_event() {
        let mut events = EventTable::default();
        events.create(false, None).unwrap();
        let named = events.create(false, Some("uart-rx")).unwrap();
        assert_eq!(events.open("uart-rx"), Some(named));
        assert_eq!(events.open("missing"), None);
    }

    #[test]
    fn destroyed_event_reports_no_state() {
        let mut events = EventTable::default();
        let id = events.create(false, None).unwrap();
        events.destroy(id);
        assert_eq!(events.is_signaled(id), None);
        // Mutations on the stale id are silently ignored.
        events.set(id);
        assert_eq!(events.is_signaled(id), None);
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut events = EventTable::default();
        for _ in 0..crate::EVENT_MAX {
            assert!(events.create(false, None).is_some());
        }
        assert!(events.create(false, None).is_none());
    }
}
