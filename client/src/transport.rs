use std::time::Duration;

use crate::command::ChargePointCommand;
use crate::message::ApiMessage;

#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum TransportError {
    #[display("api token rejected: {reason}")]
    InvalidToken { reason: String },
    #[display("request limit reached")]
    RequestLimit,
    #[display("connection error: {reason}")]
    Connection { reason: String },
}

//Implementations own the websocket protocol (framing, handshake, token
//exchange); this crate only drives the session and interprets the messages
//it yields. Request methods take &self so independent requests can be issued
//concurrently. Replies arrive as regular inbound messages via receive().
pub trait ApiTransport {
    async fn connect(&mut self, api_token: &str) -> Result<(), TransportError>;

    //next inbound message; an error means the connection is gone. Dropping
    //the returned future must not lose messages.
    async fn receive(&mut self) -> Result<ApiMessage, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    async fn request_charge_points(&self) -> Result<(), TransportError>;
    async fn request_status(&self, evse_id: &str) -> Result<(), TransportError>;
    async fn request_settings(&self, evse_id: &str) -> Result<(), TransportError>;

    //the vendor API needs a representative charge point id for grid telemetry
    async fn request_grid_status(&self, evse_id: &str) -> Result<(), TransportError>;

    async fn send_command(
        &self,
        evse_id: &str,
        command: &ChargePointCommand,
    ) -> Result<(), TransportError>;

    fn rate_limit_reset_delay(&self) -> Duration;
}
