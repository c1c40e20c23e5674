mod command;
mod connector;
mod message;
mod notify;
mod settings;
mod state;
mod transport;

pub use command::ChargePointCommand;
pub use connector::{ConnectionState, Connector, ConnectorClient, ConnectorError};
pub use message::{ApiMessage, MessageTopic};
pub use notify::{ChangeNotifier, ChangeTopic, SubscriptionId};
pub use settings::{ClientSettings, ReconnectDelays};
pub use state::{Attributes, StateStore};
pub use transport::{ApiTransport, TransportError};
