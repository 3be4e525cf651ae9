use crate::transport::messages::TriggerRecord;

/// Transformation applied to every received record before it is forwarded.
///
/// One record in, one record out. Implementations run on the worker loop task
/// between two endpoint calls, so they must not block or perform I/O.
pub trait RecordProtocol: Send + 'static {
    fn process(&mut self, record: TriggerRecord) -> TriggerRecord;
}

/// Forwards records unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl RecordProtocol for PassThrough {
    fn process(&mut self, record: TriggerRecord) -> TriggerRecord {
        record
    }
}

/// Adapts a closure into a [`RecordProtocol`].
pub struct FnProtocol<F>(F);

pub fn from_fn<F>(transform: F) -> FnProtocol<F>
where
    F: FnMut(TriggerRecord) -> TriggerRecord + Send + 'static,
{
    FnProtocol(transform)
}

impl<F> RecordProtocol for FnProtocol<F>
where
    F: FnMut(TriggerRecord) -> TriggerRecord + Send + 'static,
{
    fn process(&mut self, record: TriggerRecord) -> TriggerRecord {
        (self.0)(record)
    }
}
