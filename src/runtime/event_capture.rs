//! Test layer that records emitted events so tests can assert on logging.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone)]
pub(crate) struct CapturedEvent {
    pub(crate) level: Level,
    pub(crate) message: String,
    pub(crate) fields: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub(crate) struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    /// Routes events from the current thread into this capture until the
    /// guard is dropped. Pair with a current-thread runtime so spawned tasks
    /// are captured too.
    pub(crate) fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn count(&self, level: Level) -> usize {
        self.events()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    pub(crate) fn count_message(&self, level: Level, message: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.level == level && event.message.contains(message))
            .count()
    }

    /// Values recorded for `field` on events at `level`, in emission order.
    pub(crate) fn field_values(&self, level: Level, field: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter(|event| event.level == level)
            .flat_map(|event| {
                event
                    .fields
                    .iter()
                    .filter(|(name, _)| name == field)
                    .map(|(_, value)| value.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().expect("capture lock").clear();
    }

    fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().expect("capture lock").clone()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().expect("capture lock").push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_owned(), format!("{value:?}")));
        }
    }
}
