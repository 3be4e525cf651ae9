use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Records every event emitted on the current thread while installed.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl EventCapture {
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn count(&self, level: Level) -> usize {
        let events = self.events.lock().expect("capture lock");
        events.iter().filter(|(lvl, _)| *lvl == level).count()
    }

    pub fn count_message(&self, level: Level, message: &str) -> usize {
        let events = self.events.lock().expect("capture lock");
        events
            .iter()
            .filter(|(lvl, text)| *lvl == level && text.contains(message))
            .count()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageField(String::new());
        event.record(&mut message);
        self.events
            .lock()
            .expect("capture lock")
            .push((*event.metadata().level(), message.0));
    }
}

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}
