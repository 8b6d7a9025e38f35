//! Connection observer that records callbacks.

use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use framelock_core::StateError;
use framelock_net::ConnectionObserver;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    /// `on_status_changed`
    StatusChanged,
    /// `on_decode` with a copy of the state
    Decode {
        /// Frame number
        frame_number: i32,
        /// State bytes
        state: Vec<u8>,
    },
    /// `on_frame_published`
    Published(i32),
    /// `on_acknowledged`
    Acknowledged(i32),
    /// `on_cluster_connected`
    ClusterConnected,
    /// `on_size_hint`
    SizeHint(usize),
    /// `on_command`
    Command(String),
    /// `on_data_package` with a copy of the data
    DataPackage {
        /// Package id
        package_id: i32,
        /// Package bytes
        data: Vec<u8>,
    },
    /// `on_data_acknowledged`
    DataAcknowledged(i32),
}

/// Records every callback in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    arrived: Condvar,
}

impl RecordingObserver {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until an event matching `predicate` has been recorded.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&ObservedEvent) -> bool) -> bool {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let (events, _) = self
            .arrived
            .wait_timeout_while(events, timeout, |events| !events.iter().any(&predicate))
            .unwrap_or_else(PoisonError::into_inner);
        events.iter().any(predicate)
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        self.arrived.notify_all();
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_status_changed(&self, _connection: usize) {
        self.push(ObservedEvent::StatusChanged);
    }

    fn on_decode(
        &self,
        _connection: usize,
        frame_number: i32,
        state: &[u8],
    ) -> Result<(), StateError> {
        self.push(ObservedEvent::Decode { frame_number, state: state.to_vec() });
        Ok(())
    }

    fn on_frame_published(&self, _connection: usize, frame_number: i32) {
        self.push(ObservedEvent::Published(frame_number));
    }

    fn on_acknowledged(&self, _connection: usize, frame_number: i32, _loop_time: Option<Duration>) {
        self.push(ObservedEvent::Acknowledged(frame_number));
    }

    fn on_cluster_connected(&self, _connection: usize) {
        self.push(ObservedEvent::ClusterConnected);
    }

    fn on_size_hint(&self, _connection: usize, capacity: usize) {
        self.push(ObservedEvent::SizeHint(capacity));
    }

    fn on_command(&self, _connection: usize, command: &str) {
        self.push(ObservedEvent::Command(command.to_owned()));
    }

    fn on_data_package(&self, _connection: usize, package_id: i32, data: &[u8]) {
        self.push(ObservedEvent::DataPackage { package_id, data: data.to_vec() });
    }

    fn on_data_acknowledged(&self, _connection: usize, package_id: i32) {
        self.push(ObservedEvent::DataAcknowledged(package_id));
    }
}
