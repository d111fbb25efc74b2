pub mod buffer;
pub mod channel;
pub mod config;
pub mod copy;
pub mod diagnostics;
pub mod error;
pub mod inspect;
pub mod layout;
mod ring;
pub mod waiter;

pub use buffer::{AlignedBuf, BufferAllocator, SystemAllocator};
pub use channel::{Channel, ChannelBuilder, ChannelId, RecvStatus, SendStatus};
pub use config::ChannelConfig;
pub use copy::{ByteCopy, ElementCopy};
pub use diagnostics::{BufferedSink, DiagnosticSink, NullSink, TracingSink};
pub use error::{ChannelError, ConfigError};
pub use inspect::{BatchPolicy, BatchRead, PeekReport, RingView};
pub use layout::ElementLayout;
pub use waiter::{Completion, WaiterKind, WaiterRegistry, WaiterStatus, WaiterToken};
