//! Endpoint plumbing: timeout-bounded send/receive contracts, in-process
//! channel endpoints, TCP endpoints, and the messages they carry.

mod backoff;
pub mod channel;
pub mod endpoint;
pub mod messages;
pub mod tcp;

pub use channel::{channel, ChannelReceiver, ChannelSender};
pub use endpoint::{EndpointRole, RecordReceiver, RecordSender, TransportError};
pub use messages::{RecordRequest, TriggerRecord, TriggerTypeMask};
pub use tcp::{TcpRecordReceiver, TcpRecordSender};
