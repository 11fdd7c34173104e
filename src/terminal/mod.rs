//! Point-of-sale payment terminal integration.
//!
//! A payment line is submitted to the provider through the backend, then
//! confirmed by whichever arrives first: a push on the notification bus or
//! the status poll.

pub mod bus;
pub mod coordinator;
pub mod line;
pub mod manager;
pub mod pending;
pub mod protocol;

pub use bus::{BusMessage, NotificationBus};
pub use coordinator::MollieTerminal;
pub use line::{LineStatus, PaymentLine};
pub use manager::{create_terminal, TerminalManager};
pub use protocol::{
    ConfirmPrompt, Operator, PaymentRequest, PaymentTerminal, PollSettings, ProviderResponse,
    ProviderStatus, TerminalBackend,
};
